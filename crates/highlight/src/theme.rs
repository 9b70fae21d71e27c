use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::tokenizer::HighlightKind;

const BUILTIN_THEME: &str = r##"{
    "syntax": {
        "string":        { "foreground": "#CE9178" },
        "char":          { "foreground": "#D7BA7D" },
        "line_comment":  { "foreground": "#6A9955", "italic": true },
        "block_comment": { "foreground": "#6A9955", "italic": true },
        "preprocessor":  { "foreground": "#C586C0" },
        "number":        { "foreground": "#B5CEA8" },
        "keyword":       { "foreground": "#569CD6", "bold": true },
        "type":          { "foreground": "#4EC9B0" },
        "control":       { "foreground": "#C586C0" },
        "special_call":  { "foreground": "#DCDCAA" }
    },
    "keywords": {
        "keyword": [
            "using", "namespace", "class", "struct", "enum", "union", "public", "private",
            "protected", "template", "typename", "typedef", "const", "constexpr", "static",
            "virtual", "override", "friend", "inline", "new", "delete", "this", "true",
            "false", "nullptr", "operator", "sizeof", "explicit", "mutable", "volatile",
            "extern", "noexcept"
        ],
        "type": [
            "int", "long", "short", "char", "float", "double", "bool", "void", "unsigned",
            "signed", "auto", "size_t", "string", "vector", "map", "set", "pair"
        ],
        "control": [
            "if", "else", "for", "while", "do", "switch", "case", "default", "break",
            "continue", "return", "goto", "try", "catch", "throw"
        ]
    }
}"##;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightStyle {
    pub foreground: Color,
    pub background: Option<Color>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

/// Keyword table and category styles consumed by the tokenizer.
/// （供 tokenizer 使用的關鍵字表與分類樣式。）
///
/// Reloading is always a full replacement; rules are never merged.
#[derive(Debug, Clone, Default)]
pub struct ThemeRules {
    styles: HashMap<String, HighlightStyle>,
    keywords: BTreeMap<String, String>,
    keyword_regex: Option<Regex>,
}

#[derive(Debug, thiserror::Error)]
pub enum ThemeParseError {
    #[error("theme is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("syntax entries must be objects")]
    InvalidSyntax,
    #[error("invalid color '{value}': {reason}")]
    InvalidColor {
        value: String,
        reason: ColorParseError,
    },
    #[error("entries must contain foreground color")]
    MissingForeground,
    #[error("keyword pattern failed to compile: {0}")]
    KeywordPattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorParseError {
    MissingHash,
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorParseError::MissingHash => write!(f, "missing leading '#'"),
            ColorParseError::InvalidLength => write!(f, "expected 6 or 8 hex digits"),
            ColorParseError::InvalidHex => write!(f, "contains non-hex digits"),
        }
    }
}

#[derive(Deserialize)]
struct ThemeFile {
    #[serde(default)]
    syntax: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    keywords: BTreeMap<String, Vec<String>>,
}

impl ThemeRules {
    /// The C++ theme shipped with the editor.
    /// （內建的 C++ 佈景主題。）
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_THEME) {
            Ok(rules) => rules,
            Err(err) => {
                tracing::error!(error = %err, "built-in theme failed to parse");
                Self::default()
            }
        }
    }

    /// Parses a theme document of the form
    /// `{ "syntax": { category: style }, "keywords": { group: [word] } }`.
    pub fn from_json_str(input: &str) -> Result<Self, ThemeParseError> {
        let file: ThemeFile = serde_json::from_str(input)?;
        let mut styles = HashMap::new();
        for (name, entry) in &file.syntax {
            styles.insert(name.clone(), parse_style(entry)?);
        }
        let mut keywords = BTreeMap::new();
        for (group, words) in file.keywords {
            for word in words {
                let word = word.trim();
                if !word.is_empty() {
                    keywords.insert(word.to_string(), group.clone());
                }
            }
        }
        let keyword_regex = build_keyword_regex(&keywords)?;
        Ok(Self {
            styles,
            keywords,
            keyword_regex,
        })
    }

    /// Loads a theme file; unreadable or malformed themes yield empty rules.
    /// （載入佈景主題檔；讀取或解析失敗時回傳空規則。）
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|text| Self::from_json_str(&text).map_err(|err| err.to_string()));
        match parsed {
            Ok(rules) => rules,
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "theme rejected; highlighting disabled");
                Self::default()
            }
        }
    }

    /// True when the rules carry neither styles nor keywords.
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty() && self.keywords.is_empty()
    }

    pub fn keyword_group(&self, word: &str) -> Option<&str> {
        self.keywords.get(word).map(String::as_str)
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    pub fn style_for(&self, kind: &HighlightKind) -> Option<&HighlightStyle> {
        self.styles.get(kind.style_key())
    }

    pub(crate) fn keyword_regex(&self) -> Option<&Regex> {
        self.keyword_regex.as_ref()
    }
}

fn build_keyword_regex(keywords: &BTreeMap<String, String>) -> Result<Option<Regex>, regex::Error> {
    if keywords.is_empty() {
        return Ok(None);
    }
    let pattern = keywords
        .keys()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{pattern})\b")).map(Some)
}

fn parse_style(value: &serde_json::Value) -> Result<HighlightStyle, ThemeParseError> {
    let map = value.as_object().ok_or(ThemeParseError::InvalidSyntax)?;

    let foreground = map
        .get("foreground")
        .and_then(|value| value.as_str())
        .ok_or(ThemeParseError::MissingForeground)?;
    let foreground = parse_color(foreground).map_err(|reason| ThemeParseError::InvalidColor {
        value: foreground.to_string(),
        reason,
    })?;

    let background = map
        .get("background")
        .and_then(|value| value.as_str())
        .map(|value| {
            parse_color(value).map_err(|reason| ThemeParseError::InvalidColor {
                value: value.to_string(),
                reason,
            })
        })
        .transpose()?;

    let flag = |key: &str| map.get(key).and_then(|value| value.as_bool()).unwrap_or(false);

    Ok(HighlightStyle {
        foreground,
        background,
        bold: flag("bold"),
        italic: flag("italic"),
        underline: flag("underline"),
    })
}

/// Parses `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_color(input: &str) -> Result<Color, ColorParseError> {
    let trimmed = input.trim();
    let hex = trimmed
        .strip_prefix('#')
        .ok_or(ColorParseError::MissingHash)?;
    if hex.len() != 6 && hex.len() != 8 {
        return Err(ColorParseError::InvalidLength);
    }
    let mut components = [0u8; 4];
    for index in 0..(hex.len() / 2) {
        let slice = hex
            .get(index * 2..index * 2 + 2)
            .ok_or(ColorParseError::InvalidHex)?;
        components[index] =
            u8::from_str_radix(slice, 16).map_err(|_| ColorParseError::InvalidHex)?;
    }
    if hex.len() == 6 {
        components[3] = 255;
    }
    Ok(Color {
        r: components[0],
        g: components[1],
        b: components[2],
        a: components[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_theme_maps_keywords_to_groups() {
        let rules = ThemeRules::builtin();
        assert_eq!(rules.keyword_group("int"), Some("type"));
        assert_eq!(rules.keyword_group("return"), Some("control"));
        assert_eq!(rules.keyword_group("namespace"), Some("keyword"));
        assert!(rules.keyword_group("main").is_none());
        let style = rules
            .style_for(&HighlightKind::Keyword("keyword".into()))
            .expect("keyword style");
        assert!(style.bold);
    }

    #[test]
    fn parses_custom_theme() {
        let rules = ThemeRules::from_json_str(
            r##"{
                "syntax": { "number": { "foreground": "#112233", "background": "#00000080" } },
                "keywords": { "flow": ["loop", "yield"] }
            }"##,
        )
        .unwrap();
        assert_eq!(rules.keyword_group("loop"), Some("flow"));
        let number = rules.style_for(&HighlightKind::Number).unwrap();
        assert_eq!(number.foreground, Color { r: 0x11, g: 0x22, b: 0x33, a: 255 });
        assert_eq!(number.background.map(|c| c.a), Some(0x80));
    }

    #[test]
    fn rejects_bad_colors() {
        let err = ThemeRules::from_json_str(r#"{ "syntax": { "string": { "foreground": "red" } } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ThemeParseError::InvalidColor {
                reason: ColorParseError::MissingHash,
                ..
            }
        ));
        assert_eq!(parse_color("#12345"), Err(ColorParseError::InvalidLength));
        assert_eq!(parse_color("#12345G"), Err(ColorParseError::InvalidHex));
    }

    #[test]
    fn unparseable_theme_file_yields_empty_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(ThemeRules::load_or_empty(&path).is_empty());
        assert!(ThemeRules::load_or_empty(dir.path().join("missing.json")).is_empty());
    }
}
