use std::path::PathBuf;

use runpp_core::{BufferId, Document};
use runpp_highlight::HighlightToken;

/// 傳送給畫面層的通知。 / Notifications published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Tab title changed, usually the dirty marker.
    TitleChanged { buffer: BufferId, title: String },
    ActiveChanged { buffer: BufferId },
    BufferClosed { buffer: BufferId },
    /// Saving rewrote the text; the view must show `contents`.
    ContentReplaced { buffer: BufferId, contents: String },
    /// Replaces every span previously published for `buffer`.
    Highlighted {
        buffer: BufferId,
        tokens: Vec<HighlightToken>,
    },
    Status(String),
    CompileFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    Output(String),
    /// The in-app program ended; `None` when it was killed by a signal.
    ProgramExited { exit_code: Option<i32> },
    Error(String),
}

/// 關閉未儲存分頁時的選擇。 / Answer to the unsaved-changes prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    Save,
    Discard,
    Cancel,
}

/// The user-facing side of a session.
///
/// Prompts are answered synchronously; the session blocks on them before
/// continuing a close or a save.
pub trait Presenter {
    fn on_event(&mut self, event: SessionEvent);

    /// Asked only for dirty buffers.
    fn confirm_close(&mut self, document: &Document) -> CloseDisposition;

    /// Asked when saving a buffer that has no backing file. `None` cancels.
    fn request_save_path(&mut self, document: &Document) -> Option<PathBuf>;
}
