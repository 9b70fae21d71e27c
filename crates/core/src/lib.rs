pub mod document;
pub mod documents;
pub mod sanitize;

pub use document::{BufferId, Document, DocumentError, SaveOutcome};
pub use documents::DocumentSet;
pub use sanitize::sanitize_text;
