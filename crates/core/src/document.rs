use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::sanitize::sanitize_text;

/// 分頁的不透明識別碼。 / Opaque identifier of one open buffer (tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer-{}", self.0)
    }
}

/// 文件載入或儲存時可能發生的錯誤。 / Errors raised while reading, saving or addressing buffers.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("buffer has no backing file; choose a path first")]
    NoPath,
    #[error("{0} is not open")]
    UnknownBuffer(BufferId),
    #[error("{path} is already open in {buffer}")]
    AlreadyOpen { path: PathBuf, buffer: BufferId },
}

/// 儲存完成後的結果。 / Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// 內容在儲存時被清理過，畫面需要重新載入。 / The content changed during sanitisation and the view must refresh.
    pub sanitized: bool,
}

/// 單一分頁的記憶體模型。 / In-memory model of one tab.
///
/// Dirty state is derived, never stored: a buffer is dirty exactly when its
/// content differs from the last saved snapshot.
#[derive(Debug, Clone)]
pub struct Document {
    id: BufferId,
    name: String,
    contents: String,
    saved_contents: String,
    path: Option<PathBuf>,
}

impl Document {
    /// 建立尚未儲存的空白文件。 / Creates an untitled document with the given contents as its clean state.
    pub(crate) fn untitled(id: BufferId, name: String, contents: String) -> Self {
        Self {
            id,
            name,
            saved_contents: contents.clone(),
            contents,
            path: None,
        }
    }

    /// 從磁碟以 UTF-8 讀取文件。 / Reads a UTF-8 document from disk.
    pub(crate) fn open(id: BufferId, path: &Path) -> Result<Self, DocumentError> {
        let contents = fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            id,
            name: display_name(path),
            saved_contents: contents.clone(),
            contents,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 標題列文字，未儲存時加上星號。 / Tab title, suffixed with `*` while dirty.
    pub fn title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn saved_contents(&self) -> &str {
        &self.saved_contents
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.contents != self.saved_contents
    }

    pub(crate) fn set_contents(&mut self, text: String) {
        self.contents = text;
    }

    /// 儲存至既有路徑。 / Saves to the backing path; fails with `NoPath` for untitled buffers.
    pub(crate) fn save(&mut self) -> Result<SaveOutcome, DocumentError> {
        let path = self.path.clone().ok_or(DocumentError::NoPath)?;
        self.write_to(&path)
    }

    /// 另存新檔並更新顯示名稱。 / Saves to `path`, binding it and renaming the tab.
    pub(crate) fn save_as(&mut self, path: &Path) -> Result<SaveOutcome, DocumentError> {
        let outcome = self.write_to(path)?;
        self.path = Some(path.to_path_buf());
        self.name = display_name(path);
        Ok(outcome)
    }

    fn write_to(&mut self, path: &Path) -> Result<SaveOutcome, DocumentError> {
        let cleaned = sanitize_text(&self.contents).into_owned();
        write_atomically(path, cleaned.as_bytes()).map_err(|source| DocumentError::Save {
            path: path.to_path_buf(),
            source,
        })?;

        let sanitized = cleaned != self.contents;
        if sanitized {
            tracing::debug!(buffer = %self.id, "invisible characters removed on save");
        }
        self.saved_contents = cleaned.clone();
        self.contents = cleaned;
        Ok(SaveOutcome { sanitized })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// 先寫入暫存檔再重新命名，避免出現部分寫入的情況。 / Temporary file plus rename guards against partial writes.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp_runpp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
    }
    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}
