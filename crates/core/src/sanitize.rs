//! Invisible and formatting code point cleanup applied on save.
//! （儲存時清除不可見與排版用的 Unicode 字元。）

use std::borrow::Cow;

/// Space variants rewritten to a plain ASCII space.
const SPACE_LIKE: &[char] = &[
    '\u{00A0}', // no-break space
    '\u{202F}', // narrow no-break space
    '\u{2009}', // thin space
    '\u{200A}', // hair space
];

/// Code points removed outright.
const REMOVED: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200C}', // zero width non-joiner
    '\u{200D}', // zero width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // byte order mark
    '\u{00AD}', // soft hyphen
    '\u{200E}', // left-to-right mark
    '\u{200F}', // right-to-left mark
    '\u{061C}', // arabic letter mark
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}',
    '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}',
];

fn needs_cleanup(ch: char) -> bool {
    SPACE_LIKE.contains(&ch) || REMOVED.contains(&ch)
}

/// Returns the text with formatting code points normalised; borrows when clean.
/// （回傳清理後的文字，若無需清理則直接借用。）
pub fn sanitize_text(text: &str) -> Cow<'_, str> {
    if !text.chars().any(needs_cleanup) {
        return Cow::Borrowed(text);
    }
    let mut cleaned = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPACE_LIKE.contains(&ch) {
            cleaned.push(' ');
        } else if !REMOVED.contains(&ch) {
            cleaned.push(ch);
        }
    }
    Cow::Owned(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn messy_text() -> impl Strategy<Value = String> {
        let pool: Vec<char> = SPACE_LIKE
            .iter()
            .chain(REMOVED)
            .copied()
            .chain("int x=1;\n 中é".chars())
            .collect();
        prop::collection::vec(prop::sample::select(pool), 0..48)
            .prop_map(|chars| chars.into_iter().collect())
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(text in messy_text()) {
            let once = sanitize_text(&text).into_owned();
            prop_assert!(!once.chars().any(needs_cleanup));
            prop_assert!(matches!(sanitize_text(&once), Cow::Borrowed(_)));
        }

        #[test]
        fn sanitize_keeps_arbitrary_text_stable(text in any::<String>()) {
            let once = sanitize_text(&text).into_owned();
            let twice = sanitize_text(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn clean_text_is_borrowed() {
        let text = "int main() { return 0; }\n";
        assert!(matches!(sanitize_text(text), Cow::Borrowed(_)));
    }

    #[test]
    fn spaces_are_normalised_and_invisibles_removed() {
        let dirty = "\u{FEFF}int\u{00A0}x\u{202F}=\u{2009}1;\u{200B}\u{200D}// so\u{00AD}ft\u{200E}\u{2066}";
        assert_eq!(sanitize_text(dirty), "int x = 1;// soft");
    }

    #[test]
    fn sanitizing_twice_matches_once() {
        let dirty = "a\u{200A}b\u{200C}c\u{202E}d\u{2060}";
        let once = sanitize_text(dirty).into_owned();
        let twice = sanitize_text(&once).into_owned();
        assert_eq!(once, twice);
        assert_eq!(once, "a bcd");
    }

    #[test]
    fn ordinary_unicode_survives() {
        assert_eq!(sanitize_text("中文 ünïcode — ok"), "中文 ünïcode — ok");
    }
}
