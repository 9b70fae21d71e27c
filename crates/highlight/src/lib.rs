//! C++ token highlighting for Run++.
//! （Run++ 的 C++ 語法上色。）
//!
//! The crate is split into a pure tokenizer, the theme rules that feed it and
//! a debounce scheduler that decides when a fresh pass is due.

mod scheduler;
mod theme;
mod tokenizer;

pub use scheduler::{HighlightScheduler, DEFAULT_DEBOUNCE};
pub use theme::{
    parse_color, Color, ColorParseError, HighlightStyle, ThemeParseError, ThemeRules,
};
pub use tokenizer::{tokenize, HighlightKind, HighlightToken, SPECIAL_CALLS};
