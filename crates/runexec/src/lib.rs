//! Toolchain discovery, compilation and program execution for Run++.
//! （Run++ 的編譯器探測、編譯與程式執行。）

pub mod executor;
pub mod orchestrator;
pub mod process;
pub mod terminal;
pub mod toolchain;

pub use executor::{RunError, RunExecutor, RunResult, RunSpec};
pub use orchestrator::{
    artifact_path, decide_launch_mode, BuildError, BuildEvent, BuildOrchestrator, BuildRequest,
    JobId, JobState, LaunchMode, INPUT_CONSTRUCTS,
};
pub use process::{spawn_captured, stream_lines, ProcessHandle, StreamEvent};
pub use terminal::{SystemTerminal, TerminalLauncher};
pub use toolchain::{
    ToolchainError, ToolchainInvocation, ToolchainLocator, ToolchainSource, AMBIENT_COMPILER,
    BUNDLED_BIN_DIR, PROBE_TIMEOUT,
};
