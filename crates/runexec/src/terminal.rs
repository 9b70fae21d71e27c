//! Detached terminal sessions for interactive programs.
//! （在獨立終端機視窗中執行需要輸入的程式。）

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

/// Opens a program in a terminal the user can type into.
///
/// Launching is fire-and-forget: once the terminal is started the caller
/// does not observe the program again.
pub trait TerminalLauncher: Send + Sync {
    fn launch(
        &self,
        program: &Path,
        working_dir: &Path,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<()>;
}

/// 平台預設終端機。 / Launches the platform's default terminal emulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTerminal;

impl TerminalLauncher for SystemTerminal {
    fn launch(
        &self,
        program: &Path,
        working_dir: &Path,
        env: &BTreeMap<OsString, OsString>,
    ) -> io::Result<()> {
        let mut last_error = None;
        for mut command in candidates(program) {
            command
                .current_dir(working_dir)
                .envs(env)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            match command.spawn() {
                Ok(mut child) => {
                    tracing::info!(program = %program.display(), terminal = ?command.get_program(), "launched external terminal");
                    // Reap the launcher so it does not linger as a zombie.
                    let _ = thread::Builder::new()
                        .name("runpp-terminal-reaper".into())
                        .spawn(move || {
                            let _ = child.wait();
                        });
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(terminal = ?command.get_program(), error = %err, "terminal candidate failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no terminal emulator available")
        }))
    }
}

#[cfg(windows)]
fn candidates(program: &Path) -> Vec<Command> {
    let mut command = Command::new("cmd");
    command
        .args(["/C", "start", "", "cmd", "/K"])
        .arg(program);
    vec![command]
}

#[cfg(target_os = "macos")]
fn candidates(program: &Path) -> Vec<Command> {
    let mut command = Command::new("open");
    command.args(["-a", "Terminal"]).arg(program);
    vec![command]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn candidates(program: &Path) -> Vec<Command> {
    const PAUSE_SCRIPT: &str =
        "\"$0\"; status=$?; printf '\\nProcess exited with code %s. Press Enter to close.' \"$status\"; read _";

    let mut terminals: Vec<(OsString, &str)> = Vec::new();
    if let Some(preferred) = std::env::var_os("TERMINAL").filter(|value| !value.is_empty()) {
        terminals.push((preferred, "-e"));
    }
    terminals.extend(
        [
            ("x-terminal-emulator", "-e"),
            ("gnome-terminal", "--"),
            ("konsole", "-e"),
            ("xfce4-terminal", "-x"),
            ("xterm", "-e"),
        ]
        .into_iter()
        .map(|(name, flag)| (OsString::from(name), flag)),
    );

    terminals
        .into_iter()
        .map(|(terminal, flag)| {
            let mut command = Command::new(terminal);
            command
                .arg(flag)
                .args(["sh", "-c", PAUSE_SCRIPT])
                .arg(program);
            command
        })
        .collect()
}

#[cfg(not(any(unix, windows)))]
fn candidates(_program: &Path) -> Vec<Command> {
    Vec::new()
}
