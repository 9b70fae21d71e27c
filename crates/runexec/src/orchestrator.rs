//! Compile-then-run jobs driven from the interactive thread.
//! （由互動執行緒驅動的編譯與執行工作。）
//!
//! [`BuildOrchestrator::run`] validates a request and hands the work to a
//! background thread. Everything that thread learns travels back as
//! [`BuildEvent`]s over a channel; the orchestrator's own state, including
//! the tracked live process, changes only when the owner drains that channel
//! with [`BuildOrchestrator::poll`] or [`BuildOrchestrator::next_event`].

use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::executor::RunExecutor;
use crate::process::{spawn_captured, stream_lines, ProcessHandle, StreamEvent};
use crate::terminal::TerminalLauncher;
use crate::toolchain::ToolchainInvocation;

/// Source constructs that read from standard input.
pub const INPUT_CONSTRUCTS: [&str; 7] = [
    "cin", "scanf", "getline", "getchar", "gets", "getch", "fgets",
];

/// 單次建置工作的識別碼。 / Identifier of one compile-and-run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// 建置請求。 / Everything one run needs, captured at the moment of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Saved source file.
    pub source: PathBuf,
    /// Buffer text scanned for input constructs.
    pub source_text: String,
    /// Standard revision, rendered as `-std=c++<language_standard>`.
    pub language_standard: String,
    pub always_external_terminal: bool,
}

/// 執行模式。 / Where the compiled program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    InApp,
    ExternalTerminal,
}

/// Picks the launch mode for a compiled program.
///
/// Any case-insensitive occurrence of an [`INPUT_CONSTRUCTS`] name, even
/// inside a comment or string literal, sends the program to a terminal.
pub fn decide_launch_mode(source_text: &str, always_external_terminal: bool) -> LaunchMode {
    if always_external_terminal {
        return LaunchMode::ExternalTerminal;
    }
    let lowered = source_text.to_lowercase();
    if INPUT_CONSTRUCTS
        .iter()
        .any(|construct| lowered.contains(construct))
    {
        LaunchMode::ExternalTerminal
    } else {
        LaunchMode::InApp
    }
}

/// 編譯產物路徑。 / The source path with the platform executable extension.
///
/// A source that already carries that extension (an extensionless `main` on
/// Unix) would be its own artifact, so `.out` is appended instead.
pub fn artifact_path(source: &Path) -> PathBuf {
    let artifact = source.with_extension(env::consts::EXE_EXTENSION);
    if artifact != source {
        return artifact;
    }
    let mut name = source.as_os_str().to_owned();
    name.push(".out");
    PathBuf::from(name)
}

/// 建置過程中送出的事件。 / Progress reported by a build job, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Compiling { source: PathBuf },
    CompileFailed { exit_code: Option<i32>, diagnostics: String },
    Compiled { artifact: PathBuf },
    ExternalLaunched { artifact: PathBuf },
    Started { process: ProcessHandle },
    Output { line: String },
    Finished { exit_code: Option<i32> },
    Error { message: String },
}

/// 無法開始建置的原因。 / Reasons a run is refused before any work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("save the file before running it")]
    SaveRequired,
    #[error("no C++ compiler is available")]
    CompilerMissing,
    #[error("a build is already in progress")]
    Busy,
    #[error("program still running: {path} is in use")]
    ArtifactLocked { path: PathBuf },
    #[error("failed to start build: {0}")]
    Launch(String),
}

/// 建置狀態機。 / State of the most recent job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Compiling,
    CompileFailed,
    Compiled,
    ExternalLaunch,
    InAppRunning,
    Finished,
    Errored,
}

impl JobState {
    fn is_building(self) -> bool {
        matches!(self, JobState::Compiling | JobState::Compiled)
    }
}

type Envelope = (JobId, BuildEvent);

/// 建置與執行協調器。 / Runs at most one build job at a time and tracks its in-app process.
pub struct BuildOrchestrator {
    toolchain: Option<ToolchainInvocation>,
    launcher: Arc<dyn TerminalLauncher>,
    state: JobState,
    current: Option<JobId>,
    next_job: u64,
    live: Option<ProcessHandle>,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    pending: VecDeque<BuildEvent>,
    shutting_down: Arc<AtomicBool>,
}

impl fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("toolchain", &self.toolchain)
            .field("state", &self.state)
            .field("current", &self.current)
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    pub fn new(
        toolchain: Option<ToolchainInvocation>,
        launcher: Arc<dyn TerminalLauncher>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            toolchain,
            launcher,
            state: JobState::Idle,
            current: None,
            next_job: 0,
            live: None,
            sender,
            receiver,
            pending: VecDeque::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn toolchain(&self) -> Option<&ToolchainInvocation> {
        self.toolchain.as_ref()
    }

    /// Replaces the resolved compiler; the running job keeps the one it started with.
    pub fn set_toolchain(&mut self, toolchain: Option<ToolchainInvocation>) {
        self.toolchain = toolchain;
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current
    }

    pub fn live_process(&self) -> Option<&ProcessHandle> {
        self.live.as_ref()
    }

    /// 開始一次建置。 / Starts compiling `request` on a background thread.
    pub fn run(&mut self, request: BuildRequest) -> Result<JobId, BuildError> {
        self.absorb();

        if self.state.is_building() {
            return Err(BuildError::Busy);
        }
        let source = absolute(&request.source).map_err(|err| BuildError::Launch(err.to_string()))?;
        let artifact = artifact_path(&source);
        if self.live.as_ref().is_some_and(ProcessHandle::is_running) {
            return Err(BuildError::ArtifactLocked { path: artifact });
        }
        let toolchain = self.toolchain.clone().ok_or(BuildError::CompilerMissing)?;

        if artifact.exists() {
            if let Err(err) = fs::remove_file(&artifact) {
                tracing::warn!(artifact = %artifact.display(), error = %err, "previous artifact is locked");
                return Err(BuildError::ArtifactLocked { path: artifact });
            }
        }

        self.next_job += 1;
        let job = JobId(self.next_job);
        let worker = BuildWorker {
            job,
            toolchain,
            launcher: Arc::clone(&self.launcher),
            sender: self.sender.clone(),
            shutting_down: Arc::clone(&self.shutting_down),
            source,
            artifact,
            request,
        };
        thread::Builder::new()
            .name("runpp-build".into())
            .spawn(move || worker.run())
            .map_err(|err| BuildError::Launch(err.to_string()))?;

        tracing::info!(%job, "build started");
        self.live = None;
        self.current = Some(job);
        self.state = JobState::Compiling;
        Ok(job)
    }

    /// 取出所有已到達的事件。 / Drains every event that has arrived, oldest first.
    pub fn poll(&mut self) -> Vec<BuildEvent> {
        self.absorb();
        self.pending.drain(..).collect()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event(&mut self, timeout: Duration) -> Option<BuildEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok((job, event)) => {
                self.apply(job, &event);
                Some(event)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 傳送輸入給執行中的程式。 / Forwards `text` to the live in-app program's stdin.
    pub fn send_input(&self, text: &str) -> io::Result<()> {
        match &self.live {
            Some(process) => process.write_input(text),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no program is running",
            )),
        }
    }

    /// 關閉前強制終止執行中的程式。 / Kills the tracked process and stops future spawns.
    pub fn shutdown(&mut self) {
        // Raise the flag first: a worker that spawns after this point kills
        // its own child, and one that spawned before has already queued Started.
        self.shutting_down.store(true, Ordering::SeqCst);
        self.absorb();
        if let Some(process) = self.live.take() {
            tracing::info!(pid = process.pid(), "killing program on shutdown");
            if let Err(err) = process.kill() {
                tracing::warn!(pid = process.pid(), error = %err, "failed to kill program");
            }
        }
    }

    fn absorb(&mut self) {
        while let Ok((job, event)) = self.receiver.try_recv() {
            self.apply(job, &event);
            self.pending.push_back(event);
        }
    }

    fn apply(&mut self, job: JobId, event: &BuildEvent) {
        if self.current != Some(job) {
            tracing::debug!(%job, "event from an earlier job");
            return;
        }
        match event {
            BuildEvent::Compiling { .. } => self.state = JobState::Compiling,
            BuildEvent::CompileFailed { .. } => self.state = JobState::CompileFailed,
            BuildEvent::Compiled { .. } => self.state = JobState::Compiled,
            BuildEvent::ExternalLaunched { .. } => self.state = JobState::ExternalLaunch,
            BuildEvent::Started { process } => {
                self.live = Some(process.clone());
                self.state = JobState::InAppRunning;
            }
            BuildEvent::Output { .. } => {}
            BuildEvent::Finished { .. } => {
                self.live = None;
                self.state = JobState::Finished;
            }
            BuildEvent::Error { .. } => {
                if self.live.is_none() {
                    self.state = JobState::Errored;
                }
            }
        }
    }
}

impl Drop for BuildOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// State moved onto the build thread.
struct BuildWorker {
    job: JobId,
    toolchain: ToolchainInvocation,
    launcher: Arc<dyn TerminalLauncher>,
    sender: Sender<Envelope>,
    shutting_down: Arc<AtomicBool>,
    source: PathBuf,
    artifact: PathBuf,
    request: BuildRequest,
}

impl BuildWorker {
    fn send(&self, event: BuildEvent) {
        // A dropped receiver means the session is gone; nothing left to tell.
        let _ = self.sender.send((self.job, event));
    }

    fn run(self) {
        self.send(BuildEvent::Compiling {
            source: self.source.clone(),
        });

        let spec = self.toolchain.compile_spec(
            &self.source,
            &self.artifact,
            &self.request.language_standard,
        );
        let result = match RunExecutor::execute(&spec) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(job = %self.job, error = %err, "compiler could not be started");
                self.send(BuildEvent::Error {
                    message: err.to_string(),
                });
                return;
            }
        };
        if !result.success() {
            tracing::info!(job = %self.job, exit_code = ?result.exit_code, "compile failed");
            self.send(BuildEvent::CompileFailed {
                exit_code: result.exit_code,
                diagnostics: result.diagnostics(),
            });
            return;
        }
        tracing::info!(job = %self.job, duration_ms = result.duration_ms as u64, "compiled");
        self.send(BuildEvent::Compiled {
            artifact: self.artifact.clone(),
        });

        let mode = decide_launch_mode(
            &self.request.source_text,
            self.request.always_external_terminal,
        );
        tracing::debug!(job = %self.job, ?mode, "launch mode");
        match mode {
            LaunchMode::ExternalTerminal => self.launch_external(),
            LaunchMode::InApp => self.launch_in_app(),
        }
    }

    fn working_dir(&self) -> &Path {
        self.artifact.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Reports a job abandoned because the owner is shutting down.
    fn cancelled(&self) -> bool {
        if !self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }
        tracing::debug!(job = %self.job, "launch skipped during shutdown");
        self.send(BuildEvent::Error {
            message: "build cancelled: shutting down".into(),
        });
        true
    }

    fn launch_external(self) {
        if self.cancelled() {
            return;
        }
        match self
            .launcher
            .launch(&self.artifact, self.working_dir(), self.toolchain.env())
        {
            Ok(()) => self.send(BuildEvent::ExternalLaunched {
                artifact: self.artifact.clone(),
            }),
            Err(err) => self.send(BuildEvent::Error {
                message: format!("failed to open a terminal: {err}"),
            }),
        }
    }

    fn launch_in_app(self) {
        if self.cancelled() {
            return;
        }
        let (process, reader) =
            match spawn_captured(&self.artifact, self.working_dir(), self.toolchain.env()) {
                Ok(pair) => pair,
                Err(err) => {
                    self.send(BuildEvent::Error {
                        message: format!("failed to start {}: {err}", self.artifact.display()),
                    });
                    return;
                }
            };
        self.send(BuildEvent::Started {
            process: process.clone(),
        });
        if self.shutting_down.load(Ordering::SeqCst) {
            let _ = process.kill();
        }

        let job = self.job;
        let sender = self.sender.clone();
        let streamed = stream_lines(process.clone(), reader, move |event| {
            let event = match event {
                StreamEvent::Line(line) => BuildEvent::Output { line },
                StreamEvent::Failed(message) => BuildEvent::Error { message },
                StreamEvent::Exited(exit_code) => {
                    tracing::info!(%job, ?exit_code, "program exited");
                    BuildEvent::Finished { exit_code }
                }
            };
            let _ = sender.send((job, event));
        });
        if let Err(err) = streamed {
            // Without a reader nobody would ever report the exit.
            let _ = process.kill();
            self.send(BuildEvent::Error {
                message: format!("failed to read program output: {err}"),
            });
            self.send(BuildEvent::Finished { exit_code: None });
        }
    }
}
