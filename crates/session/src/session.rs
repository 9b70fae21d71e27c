use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use runpp_core::{BufferId, DocumentError, DocumentSet, SaveOutcome};
use runpp_highlight::{HighlightScheduler, ThemeRules};
use runpp_runexec::{
    BuildError, BuildEvent, BuildOrchestrator, BuildRequest, JobId, JobState, TerminalLauncher,
    ToolchainInvocation, ToolchainLocator,
};
use runpp_settings::{Preferences, PreferencesError, PreferencesStore};

use crate::presenter::{CloseDisposition, Presenter, SessionEvent};

/// 新工作階段的起始範本。 / Text of the first buffer in a new session.
pub const STARTER_TEMPLATE: &str = r#"#include <iostream>
using namespace std;

int main() {
    cout << "Hello, C++!" << endl;
    return 0;
}
"#;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

/// 關閉分頁的結果。 / Result of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed { successor: BufferId },
    Cancelled,
}

/// 編輯器工作階段。 / One editor instance: buffers, highlighting, builds and settings.
///
/// Every method runs on the interactive thread. Background work reaches the
/// session only as build events, which [`EditorSession::tick`] turns into
/// presenter notifications.
pub struct EditorSession<P: Presenter> {
    documents: DocumentSet,
    scheduler: HighlightScheduler,
    theme: ThemeRules,
    orchestrator: BuildOrchestrator,
    preferences: PreferencesStore,
    locator: ToolchainLocator,
    presenter: P,
}

impl<P: Presenter> EditorSession<P> {
    /// Opens a session seeded with [`STARTER_TEMPLATE`], probing for a compiler once.
    pub fn new(
        preferences: PreferencesStore,
        locator: ToolchainLocator,
        launcher: Arc<dyn TerminalLauncher>,
        presenter: P,
    ) -> Self {
        let locator =
            locator.with_override(preferences.preferences().build.compiler_override.clone());
        let toolchain = match locator.resolve() {
            Ok(invocation) => Some(invocation),
            Err(err) => {
                tracing::warn!(error = %err, "starting without a compiler");
                None
            }
        };
        let theme = load_theme(preferences.preferences());
        let scheduler = HighlightScheduler::new(
            preferences.preferences().editor.highlight_debounce(),
        );
        let mut session = Self {
            documents: DocumentSet::with_initial_contents(STARTER_TEMPLATE),
            scheduler,
            theme,
            orchestrator: BuildOrchestrator::new(toolchain, launcher),
            preferences,
            locator,
            presenter,
        };
        session.scheduler.request_immediate(Instant::now());
        session
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn preferences(&self) -> &Preferences {
        self.preferences.preferences()
    }

    pub fn theme(&self) -> &ThemeRules {
        &self.theme
    }

    pub fn toolchain(&self) -> Option<&ToolchainInvocation> {
        self.orchestrator.toolchain()
    }

    pub fn build_state(&self) -> JobState {
        self.orchestrator.state()
    }

    /// True while a job is compiling or its in-app program is alive.
    pub fn is_build_active(&self) -> bool {
        matches!(
            self.orchestrator.state(),
            JobState::Compiling | JobState::Compiled | JobState::InAppRunning
        )
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn new_buffer(&mut self) -> BufferId {
        let id = self.documents.new_buffer();
        self.activated(id);
        id
    }

    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<BufferId, SessionError> {
        let id = self.documents.open(path)?;
        self.activated(id);
        Ok(id)
    }

    pub fn activate(&mut self, id: BufferId) -> Result<(), SessionError> {
        self.documents.activate(id)?;
        self.activated(id);
        Ok(())
    }

    /// 套用編輯。 / Replaces the buffer text and schedules a highlight pass.
    ///
    /// A failed auto-save is published and returned, but the edit stays.
    pub fn edit(
        &mut self,
        id: BufferId,
        contents: impl Into<String>,
        now: Instant,
    ) -> Result<(), SessionError> {
        let before = self.title_of(id);
        let auto_save = self.preferences().editor.auto_save;
        let result = self.documents.edit(id, contents, auto_save);
        if !matches!(result, Err(DocumentError::UnknownBuffer(_))) {
            let debounce = self.preferences().editor.highlight_debounce();
            self.scheduler.set_debounce(debounce);
            if id == self.documents.active_id() {
                self.scheduler.note_edit(now);
            }
            self.publish_title_if_changed(id, before);
        }
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                self.presenter.on_event(SessionEvent::Error(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// 儲存分頁；未命名時詢問路徑。 / Saves `id`, asking for a path when it has none.
    ///
    /// Returns `false` when the user dismissed the path prompt.
    pub fn save(&mut self, id: BufferId) -> Result<bool, SessionError> {
        let document = self
            .documents
            .get(id)
            .ok_or(DocumentError::UnknownBuffer(id))?;
        if document.path().is_some() {
            let before = document.title();
            let outcome = self.documents.save(id)?;
            self.saved(id, outcome, Some(before));
            return Ok(true);
        }
        match self.presenter.request_save_path(document) {
            Some(path) => {
                self.save_as(id, path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn save_as(&mut self, id: BufferId, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let before = self.title_of(id);
        let outcome = self.documents.save_as(id, path)?;
        self.saved(id, outcome, before);
        Ok(())
    }

    /// 關閉分頁，必要時先詢問。 / Closes `id`, prompting first when it is dirty.
    pub fn close(&mut self, id: BufferId) -> Result<CloseOutcome, SessionError> {
        let document = self
            .documents
            .get(id)
            .ok_or(DocumentError::UnknownBuffer(id))?;
        if document.is_dirty() {
            match self.presenter.confirm_close(document) {
                CloseDisposition::Cancel => return Ok(CloseOutcome::Cancelled),
                CloseDisposition::Discard => {}
                CloseDisposition::Save => {
                    if !self.save(id)? {
                        return Ok(CloseOutcome::Cancelled);
                    }
                }
            }
        }

        let was_active = id == self.documents.active_id();
        let successor = self.documents.close(id)?;
        tracing::debug!(buffer = %id, %successor, "closed buffer");
        self.presenter
            .on_event(SessionEvent::BufferClosed { buffer: id });
        if was_active {
            self.activated(successor);
        }
        Ok(CloseOutcome::Closed { successor })
    }

    /// 編譯並執行目前分頁。 / Compiles and runs the active buffer.
    ///
    /// A dirty buffer with a backing file is saved first; an untitled one is
    /// refused with [`BuildError::SaveRequired`]. Every refusal is also
    /// published as [`SessionEvent::Error`].
    pub fn run_active(&mut self) -> Result<JobId, SessionError> {
        let result = self.start_active_build();
        if let Err(err) = &result {
            tracing::info!(error = %err, "run refused");
            self.presenter.on_event(SessionEvent::Error(err.to_string()));
        }
        result
    }

    fn start_active_build(&mut self) -> Result<JobId, SessionError> {
        let id = self.documents.active_id();
        let document = self.documents.active();
        if document.path().is_none() {
            return Err(BuildError::SaveRequired.into());
        }
        if document.is_dirty() {
            let before = document.title();
            let outcome = self.documents.save(id)?;
            self.saved(id, outcome, Some(before));
        }

        let document = self.documents.active();
        let source = document
            .path()
            .map(Path::to_path_buf)
            .ok_or(BuildError::SaveRequired)?;
        let build = &self.preferences.preferences().build;
        let request = BuildRequest {
            source,
            source_text: document.contents().to_string(),
            language_standard: build.language_standard.clone(),
            always_external_terminal: build.always_external_terminal,
        };
        Ok(self.orchestrator.run(request)?)
    }

    /// Writes a line to the running in-app program.
    pub fn send_input(&mut self, text: &str) -> io::Result<()> {
        self.orchestrator.send_input(text)
    }

    /// 互動迴圈的一次輪詢。 / One turn of the interactive loop.
    ///
    /// Delivers pending build events, then runs the highlighter over the
    /// active buffer if its debounce window has elapsed.
    pub fn tick(&mut self, now: Instant) {
        for event in self.orchestrator.poll() {
            self.publish_build_event(event);
        }

        let active = self.documents.active();
        let buffer = active.id();
        if let Some(tokens) = self
            .scheduler
            .highlight_if_due(now, active.contents(), &self.theme)
        {
            self.presenter
                .on_event(SessionEvent::Highlighted { buffer, tokens });
        }
    }

    /// 重新載入佈景主題。 / Replaces the theme rules from the configured source.
    pub fn reload_theme(&mut self) {
        self.theme = load_theme(self.preferences.preferences());
        self.scheduler.request_immediate(Instant::now());
    }

    /// 重新探測編譯器。 / Re-runs compiler discovery on explicit request.
    pub fn reprobe_toolchain(&mut self) -> Option<&ToolchainInvocation> {
        self.locator = self
            .locator
            .clone()
            .with_override(self.preferences().build.compiler_override.clone());
        let toolchain = match self.locator.resolve() {
            Ok(invocation) => Some(invocation),
            Err(err) => {
                self.presenter.on_event(SessionEvent::Error(err.to_string()));
                None
            }
        };
        self.orchestrator.set_toolchain(toolchain);
        self.orchestrator.toolchain()
    }

    /// Applies `op` to the preferences and persists them.
    pub fn update_preferences<F>(&mut self, op: F) -> Result<(), SessionError>
    where
        F: FnMut(&mut Preferences),
    {
        self.preferences.update(op)?;
        Ok(())
    }

    /// 關閉前終止執行中的程式。 / Kills any in-app program before the application exits.
    pub fn shutdown(&mut self) {
        self.orchestrator.shutdown();
    }

    fn activated(&mut self, id: BufferId) {
        self.presenter
            .on_event(SessionEvent::ActiveChanged { buffer: id });
        self.scheduler.request_immediate(Instant::now());
    }

    fn saved(&mut self, id: BufferId, outcome: SaveOutcome, before: Option<String>) {
        if outcome.sanitized {
            if let Some(document) = self.documents.get(id) {
                self.presenter.on_event(SessionEvent::ContentReplaced {
                    buffer: id,
                    contents: document.contents().to_string(),
                });
            }
            if id == self.documents.active_id() {
                self.scheduler.request_immediate(Instant::now());
            }
        }
        self.publish_title_if_changed(id, before);
    }

    fn title_of(&self, id: BufferId) -> Option<String> {
        self.documents.get(id).map(|document| document.title())
    }

    fn publish_title_if_changed(&mut self, id: BufferId, before: Option<String>) {
        let Some(title) = self.title_of(id) else {
            return;
        };
        if before.as_deref() != Some(title.as_str()) {
            self.presenter
                .on_event(SessionEvent::TitleChanged { buffer: id, title });
        }
    }

    fn publish_build_event(&mut self, event: BuildEvent) {
        let event = match event {
            BuildEvent::Compiling { .. } => SessionEvent::Status("Compiling...".into()),
            BuildEvent::CompileFailed {
                exit_code,
                diagnostics,
            } => SessionEvent::CompileFailed {
                exit_code,
                diagnostics,
            },
            BuildEvent::Compiled { .. } => return,
            BuildEvent::ExternalLaunched { .. } => {
                SessionEvent::Status("Launched in external terminal".into())
            }
            BuildEvent::Started { .. } => SessionEvent::Status("Running program...".into()),
            BuildEvent::Output { line } => SessionEvent::Output(line),
            BuildEvent::Finished { exit_code } => {
                let status = match exit_code {
                    Some(code) => format!("Process exited with code {code}"),
                    None => "Process terminated".into(),
                };
                self.presenter.on_event(SessionEvent::Status(status));
                SessionEvent::ProgramExited { exit_code }
            }
            BuildEvent::Error { message } => SessionEvent::Error(message),
        };
        self.presenter.on_event(event);
    }
}

fn load_theme(preferences: &Preferences) -> ThemeRules {
    match &preferences.ui.theme_path {
        Some(path) => ThemeRules::load_or_empty(path),
        None => ThemeRules::builtin(),
    }
}
