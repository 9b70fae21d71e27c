//! The editor session: the single owner of buffers, highlighting, builds
//! and settings, talking to the user interface through [`Presenter`].
//! （編輯器工作階段，透過 `Presenter` 與使用者介面溝通。）

mod presenter;
mod session;

pub use presenter::{CloseDisposition, Presenter, SessionEvent};
pub use session::{CloseOutcome, EditorSession, SessionError, STARTER_TEMPLATE};
