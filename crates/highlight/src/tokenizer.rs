use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::theme::ThemeRules;

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:\\(?s:.)|[^"\\\n])*""#).expect("string literal pattern must compile")
});

static CHAR_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"'(?:\\(?s:.)|[^'\\\n])*'").expect("char literal pattern must compile")
});

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//[^\n]*").expect("line comment pattern must compile"));

// Unterminated block comments run to the end of the text.
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)/\*.*?(?:\*/|\z)").expect("block comment pattern must compile")
});

static PREPROCESSOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(#[ \t]*[A-Za-z_][A-Za-z0-9_]*)")
        .expect("preprocessor pattern must compile")
});

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9]+(?:\.[0-9]+)?[A-Za-z]?\b").expect("number pattern must compile")
});

/// Stream input/output names tagged apart from ordinary keywords.
/// （與一般關鍵字分開標示的串流輸入輸出名稱。）
pub const SPECIAL_CALLS: &[&str] = &[
    "cin", "cout", "cerr", "clog", "endl", "getline", "printf", "scanf",
];

static SPECIAL_CALL: Lazy<Regex> = Lazy::new(|| {
    let pattern = SPECIAL_CALLS
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{pattern})\b")).expect("special call pattern must compile")
});

/// Category of a highlighted span.
/// （上色區段的分類。）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HighlightKind {
    String,
    Char,
    LineComment,
    BlockComment,
    Preprocessor,
    Number,
    /// A configured keyword; carries the theme group it belongs to.
    Keyword(String),
    SpecialCall,
}

impl HighlightKind {
    /// Key used to look the category up in a theme's style table.
    pub fn style_key(&self) -> &str {
        match self {
            HighlightKind::String => "string",
            HighlightKind::Char => "char",
            HighlightKind::LineComment => "line_comment",
            HighlightKind::BlockComment => "block_comment",
            HighlightKind::Preprocessor => "preprocessor",
            HighlightKind::Number => "number",
            HighlightKind::Keyword(group) => group,
            HighlightKind::SpecialCall => "special_call",
        }
    }

    /// Literal and comment spans shadow every later category.
    pub fn is_literal_or_comment(&self) -> bool {
        matches!(
            self,
            HighlightKind::String
                | HighlightKind::Char
                | HighlightKind::LineComment
                | HighlightKind::BlockComment
        )
    }
}

/// Half-open character range `[start, end)` plus its category.
/// （半開區間的字元範圍與其分類。）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightToken {
    pub range: Range<usize>,
    pub kind: HighlightKind,
}

/// Tokenizes `text` into ordered, non-overlapping highlight tokens.
/// （將文字切分為有序且互不重疊的上色區段。）
///
/// Passes run in priority order: strings, chars, line comments, block
/// comments, preprocessor directives, numbers, theme keywords, special calls.
/// A later match that touches any already tagged character is dropped whole.
/// Empty rules produce no tokens at all.
pub fn tokenize(text: &str, rules: &ThemeRules) -> Vec<HighlightToken> {
    if text.is_empty() || rules.is_empty() {
        return Vec::new();
    }

    let mut pass = Pass::new(text);
    pass.apply(&STRING_LITERAL, |_| Some(HighlightKind::String));
    pass.apply(&CHAR_LITERAL, |_| Some(HighlightKind::Char));
    pass.apply(&LINE_COMMENT, |_| Some(HighlightKind::LineComment));
    pass.apply(&BLOCK_COMMENT, |_| Some(HighlightKind::BlockComment));
    pass.apply_group(&PREPROCESSOR, 1, HighlightKind::Preprocessor);
    pass.apply(&NUMBER, |_| Some(HighlightKind::Number));
    if let Some(regex) = rules.keyword_regex() {
        pass.apply(regex, |word| {
            rules
                .keyword_group(word)
                .map(|group| HighlightKind::Keyword(group.to_string()))
        });
    }
    pass.apply(&SPECIAL_CALL, |_| Some(HighlightKind::SpecialCall));
    pass.finish()
}

struct Pass<'t> {
    text: &'t str,
    occupied: Vec<bool>,
    spans: Vec<(Range<usize>, HighlightKind)>,
}

impl<'t> Pass<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            occupied: vec![false; text.len()],
            spans: Vec::new(),
        }
    }

    fn apply<F>(&mut self, regex: &Regex, mut classify: F)
    where
        F: FnMut(&str) -> Option<HighlightKind>,
    {
        let mut at = 0;
        while at < self.text.len() {
            let Some(found) = regex.find_at(self.text, at) else {
                break;
            };
            let range = found.start()..found.end();
            if range.is_empty() || self.is_claimed(&range) {
                at = self.step_past(found.start());
                continue;
            }
            match classify(found.as_str()) {
                Some(kind) => {
                    self.claim(range.clone(), kind);
                    at = range.end;
                }
                None => at = self.step_past(found.start()),
            }
        }
    }

    fn apply_group(&mut self, regex: &Regex, group: usize, kind: HighlightKind) {
        let mut at = 0;
        while at < self.text.len() {
            let Some(captures) = regex.captures_at(self.text, at) else {
                break;
            };
            let Some(whole) = captures.get(0) else {
                break;
            };
            match captures.get(group) {
                Some(part) if !self.is_claimed(&(part.start()..part.end())) => {
                    self.claim(part.start()..part.end(), kind.clone());
                    at = whole.end().max(self.step_past(whole.start()));
                }
                _ => at = self.step_past(whole.start()),
            }
        }
    }

    fn is_claimed(&self, range: &Range<usize>) -> bool {
        self.occupied[range.clone()].iter().any(|taken| *taken)
    }

    fn claim(&mut self, range: Range<usize>, kind: HighlightKind) {
        for slot in &mut self.occupied[range.clone()] {
            *slot = true;
        }
        self.spans.push((range, kind));
    }

    fn step_past(&self, index: usize) -> usize {
        self.text[index..]
            .chars()
            .next()
            .map_or(self.text.len(), |ch| index + ch.len_utf8())
    }

    fn finish(mut self) -> Vec<HighlightToken> {
        self.spans.sort_by_key(|(range, _)| range.start);
        let mut cursor = CharCursor::new(self.text);
        self.spans
            .into_iter()
            .map(|(range, kind)| {
                let start = cursor.advance_to(range.start);
                let end = cursor.advance_to(range.end);
                HighlightToken {
                    range: start..end,
                    kind,
                }
            })
            .collect()
    }
}

/// Converts monotonically increasing byte offsets into char offsets.
struct CharCursor<'t> {
    text: &'t str,
    byte: usize,
    chars: usize,
}

impl<'t> CharCursor<'t> {
    fn new(text: &'t str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    fn advance_to(&mut self, byte: usize) -> usize {
        if byte > self.byte {
            self.chars += self.text[self.byte..byte].chars().count();
            self.byte = byte;
        }
        self.chars
    }
}
