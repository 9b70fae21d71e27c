use std::fs;
use std::path::{Path, PathBuf};

use crate::document::{BufferId, Document, DocumentError, SaveOutcome};

/// 擁有所有開啟中分頁的集合。 / Owns every open buffer and tracks the active one.
///
/// The set is never empty: it starts with one untitled buffer and closing the
/// last buffer replaces it with a fresh untitled one.
#[derive(Debug)]
pub struct DocumentSet {
    documents: Vec<Document>,
    active: BufferId,
    previous_active: Option<BufferId>,
    next_id: u64,
    untitled_counter: u32,
}

impl Default for DocumentSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::with_initial_contents("")
    }

    /// 以指定內容建立第一個分頁。 / Starts with one untitled buffer holding `contents` as its clean state.
    pub fn with_initial_contents(contents: &str) -> Self {
        let mut set = Self {
            documents: Vec::new(),
            active: BufferId::new(0),
            previous_active: None,
            next_id: 0,
            untitled_counter: 0,
        };
        let id = set.push_untitled(contents.to_string());
        set.active = id;
        set
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    pub fn get(&self, id: BufferId) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id() == id)
    }

    pub fn active_id(&self) -> BufferId {
        self.active
    }

    pub fn active(&self) -> &Document {
        self.get(self.active).unwrap_or(&self.documents[0])
    }

    pub fn previous_active(&self) -> Option<BufferId> {
        self.previous_active
    }

    /// 切換目前分頁。 / Makes `id` the active buffer.
    pub fn activate(&mut self, id: BufferId) -> Result<(), DocumentError> {
        if self.get(id).is_none() {
            return Err(DocumentError::UnknownBuffer(id));
        }
        self.switch_to(id);
        Ok(())
    }

    /// 建立新的空白分頁並設為目前分頁。 / Creates an empty untitled buffer and activates it.
    pub fn new_buffer(&mut self) -> BufferId {
        let id = self.push_untitled(String::new());
        self.switch_to(id);
        id
    }

    /// 開啟檔案；同一路徑只會有一個分頁。 / Opens `path`, reusing the existing tab if it is already open.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<BufferId, DocumentError> {
        let path = path.as_ref();
        let key = canonical(path);
        if let Some(existing) = self.find_by_path(&key) {
            self.switch_to(existing);
            return Ok(existing);
        }

        let id = self.allocate_id();
        let document = Document::open(id, &key)?;
        tracing::debug!(buffer = %id, path = %key.display(), "opened document");
        self.documents.push(document);
        self.switch_to(id);
        Ok(id)
    }

    /// 取代內容並重新計算 dirty；啟用自動儲存時同步寫檔。 / Replaces the content and recomputes dirty state.
    ///
    /// With `auto_save` set and a backing path bound, the buffer is persisted
    /// immediately. A failed auto-save is reported as `DocumentError::Save`
    /// but the edit itself is kept. Returns the dirty flag after the edit.
    pub fn edit(
        &mut self,
        id: BufferId,
        contents: impl Into<String>,
        auto_save: bool,
    ) -> Result<bool, DocumentError> {
        let document = self.get_mut(id)?;
        document.set_contents(contents.into());
        if auto_save && document.path().is_some() && document.is_dirty() {
            if let Err(err) = document.save() {
                tracing::warn!(buffer = %id, error = %err, "auto-save failed");
                return Err(err);
            }
        }
        Ok(document.is_dirty())
    }

    /// 儲存至既有路徑。 / Saves to the backing path; untitled buffers yield `NoPath`.
    pub fn save(&mut self, id: BufferId) -> Result<SaveOutcome, DocumentError> {
        self.get_mut(id)?.save()
    }

    /// 另存新檔。 / Saves to `path` and binds it as the backing file.
    ///
    /// A path already bound to another tab is refused with `AlreadyOpen`
    /// before anything is written, so one file never has two tabs.
    pub fn save_as(
        &mut self,
        id: BufferId,
        path: impl AsRef<Path>,
    ) -> Result<SaveOutcome, DocumentError> {
        let target = canonical(path.as_ref());
        if let Some(buffer) = self.find_by_path(&target).filter(|other| *other != id) {
            return Err(DocumentError::AlreadyOpen {
                path: target,
                buffer,
            });
        }
        self.get_mut(id)?.save_as(&target)
    }

    /// 關閉分頁並回傳新的目前分頁。 / Removes `id` and returns the buffer that is active afterwards.
    ///
    /// The caller must already have resolved any unsaved-changes prompt.
    /// Closing the active buffer selects the previously active buffer when it
    /// is still open, otherwise a neighbouring tab, otherwise a fresh untitled
    /// buffer.
    pub fn close(&mut self, id: BufferId) -> Result<BufferId, DocumentError> {
        let index = self
            .documents
            .iter()
            .position(|doc| doc.id() == id)
            .ok_or(DocumentError::UnknownBuffer(id))?;
        self.documents.remove(index);
        if self.previous_active == Some(id) {
            self.previous_active = None;
        }

        if id != self.active {
            return Ok(self.active);
        }

        let successor = self
            .previous_active
            .take()
            .filter(|prev| self.get(*prev).is_some())
            .or_else(|| {
                self.documents
                    .get(index)
                    .or_else(|| self.documents.last())
                    .map(Document::id)
            });
        let successor = match successor {
            Some(id) => id,
            None => self.push_untitled(String::new()),
        };
        self.active = successor;
        Ok(successor)
    }

    fn switch_to(&mut self, id: BufferId) {
        if id != self.active {
            self.previous_active = Some(self.active);
            self.active = id;
        }
    }

    fn get_mut(&mut self, id: BufferId) -> Result<&mut Document, DocumentError> {
        self.documents
            .iter_mut()
            .find(|doc| doc.id() == id)
            .ok_or(DocumentError::UnknownBuffer(id))
    }

    fn find_by_path(&self, path: &Path) -> Option<BufferId> {
        self.documents
            .iter()
            .find(|doc| doc.path() == Some(path))
            .map(Document::id)
    }

    fn push_untitled(&mut self, contents: String) -> BufferId {
        let id = self.allocate_id();
        self.untitled_counter += 1;
        let name = format!("Untitled {}", self.untitled_counter);
        self.documents.push(Document::untitled(id, name, contents));
        id
    }

    fn allocate_id(&mut self) -> BufferId {
        self.next_id += 1;
        BufferId::new(self.next_id)
    }
}

/// Resolves the parent directory so that differently spelled paths compare equal.
fn canonical(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    fs::canonicalize(parent)
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize_text;
    use proptest::prelude::*;

    fn seed(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn starts_with_one_clean_untitled_buffer() {
        let set = DocumentSet::new();
        assert_eq!(set.len(), 1);
        assert!(!set.active().is_dirty());
        assert!(set.active().path().is_none());
    }

    #[test]
    fn opening_same_path_twice_reuses_tab() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path(), "a.cpp", "int main(){}");
        let mut set = DocumentSet::new();

        let first = set.open(&path).unwrap();
        set.new_buffer();
        let second = set.open(dir.path().join(".").join("a.cpp")).unwrap();

        assert_eq!(first, second);
        assert_eq!(set.len(), 3);
        assert_eq!(set.active_id(), first);
        assert_eq!(set.active().contents(), "int main(){}");
    }

    #[test]
    fn edit_recomputes_dirty_flag() {
        let mut set = DocumentSet::new();
        let id = set.active_id();
        assert!(set.edit(id, "x", false).unwrap());
        assert!(!set.edit(id, "", false).unwrap());
    }

    #[test]
    fn auto_save_persists_when_path_is_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path(), "auto.cpp", "");
        let mut set = DocumentSet::new();
        let id = set.open(&path).unwrap();

        assert!(!set.edit(id, "int x;", true).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "int x;");

        let untitled = set.new_buffer();
        assert!(set.edit(untitled, "int y;", true).unwrap());
    }

    #[test]
    fn failed_auto_save_keeps_the_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path(), "gone.cpp", "");
        let mut set = DocumentSet::new();
        let id = set.open(&path).unwrap();
        fs::remove_dir_all(dir.path()).unwrap();

        let err = set.edit(id, "kept", true).unwrap_err();
        assert!(matches!(err, DocumentError::Save { .. }));
        assert_eq!(set.get(id).unwrap().contents(), "kept");
        assert!(set.get(id).unwrap().is_dirty());
    }

    #[test]
    fn closing_active_prefers_previous_active() {
        let mut set = DocumentSet::new();
        let first = set.active_id();
        let second = set.new_buffer();
        let third = set.new_buffer();
        set.activate(first).unwrap();
        set.activate(third).unwrap();

        assert_eq!(set.close(third).unwrap(), first);
        assert_eq!(set.active_id(), first);
        assert!(set.get(second).is_some());
    }

    #[test]
    fn closing_active_without_history_picks_neighbour() {
        let mut set = DocumentSet::new();
        let first = set.active_id();
        let second = set.new_buffer();
        let third = set.new_buffer();
        set.close(second).unwrap();
        assert_eq!(set.previous_active(), None);

        assert_eq!(set.close(third).unwrap(), first);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn closing_last_buffer_spawns_fresh_untitled() {
        let mut set = DocumentSet::new();
        let only = set.active_id();
        let successor = set.close(only).unwrap();
        assert_ne!(successor, only);
        assert_eq!(set.len(), 1);
        assert_eq!(set.active().name(), "Untitled 2");
    }

    #[test]
    fn closing_inactive_buffer_keeps_active() {
        let mut set = DocumentSet::new();
        let first = set.active_id();
        let second = set.new_buffer();
        assert_eq!(set.close(first).unwrap(), second);
        assert_eq!(set.previous_active(), None);
    }

    #[test]
    fn save_as_binds_path_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = DocumentSet::new();
        let id = set.active_id();
        set.edit(id, "int main(){}", false).unwrap();
        set.save_as(id, dir.path().join("prog.cpp")).unwrap();

        let doc = set.get(id).unwrap();
        assert_eq!(doc.name(), "prog.cpp");
        assert!(!doc.is_dirty());
        let reopened = set.open(dir.path().join("prog.cpp")).unwrap();
        assert_eq!(reopened, id);
    }

    #[test]
    fn save_as_onto_a_path_open_elsewhere_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path(), "a.cpp", "old");
        let mut set = DocumentSet::new();
        let first = set.open(&path).unwrap();
        let second = set.new_buffer();
        set.edit(second, "new", false).unwrap();

        let err = set.save_as(second, &path).unwrap_err();
        assert!(matches!(err, DocumentError::AlreadyOpen { buffer, .. } if buffer == first));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
        assert!(set.get(second).unwrap().path().is_none());
        assert_eq!(
            set.iter().filter(|doc| doc.path().is_some()).count(),
            1
        );

        // Re-saving a tab onto its own path is still allowed.
        set.edit(first, "again", false).unwrap();
        set.save_as(first, &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "again");
    }

    #[test]
    fn unknown_buffer_is_reported() {
        let mut set = DocumentSet::new();
        let id = set.active_id();
        set.close(id).unwrap();
        assert!(matches!(set.save(id), Err(DocumentError::UnknownBuffer(_))));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Edit { text: String, auto_save: bool },
        Save,
        SaveAs(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => ("[a-z;{} \u{00A0}\u{200B}]{0,12}", any::<bool>())
                .prop_map(|(text, auto_save)| Step::Edit { text, auto_save }),
            1 => Just(Step::Save),
            1 => (0u8..3).prop_map(Step::SaveAs),
        ]
    }

    proptest! {
        #[test]
        fn dirty_follows_unsaved_content(steps in prop::collection::vec(step(), 1..24)) {
            let dir = tempfile::tempdir().unwrap();
            let mut set = DocumentSet::new();
            let id = set.active_id();
            let mut contents = String::new();
            let mut saved = String::new();
            let mut bound = false;

            for step in steps {
                match step {
                    Step::Edit { text, auto_save } => {
                        set.edit(id, text.clone(), auto_save).unwrap();
                        contents = text;
                        if auto_save && bound && contents != saved {
                            saved = sanitize_text(&contents).into_owned();
                            contents = saved.clone();
                        }
                    }
                    Step::Save => {
                        prop_assert_eq!(set.save(id).is_ok(), bound);
                        if bound {
                            saved = sanitize_text(&contents).into_owned();
                            contents = saved.clone();
                        }
                    }
                    Step::SaveAs(slot) => {
                        set.save_as(id, dir.path().join(format!("f{slot}.cpp"))).unwrap();
                        bound = true;
                        saved = sanitize_text(&contents).into_owned();
                        contents = saved.clone();
                    }
                }

                let doc = set.get(id).unwrap();
                prop_assert_eq!(doc.contents(), contents.as_str());
                prop_assert_eq!(doc.saved_contents(), saved.as_str());
                prop_assert_eq!(doc.is_dirty(), contents != saved);
                if let Some(path) = doc.path() {
                    prop_assert_eq!(fs::read_to_string(path).unwrap(), saved.clone());
                }
            }
        }
    }
}
