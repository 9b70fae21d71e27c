//! In-app execution with streamed, merged output.
//! （在應用程式內執行並逐行串流輸出。）

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

/// 執行中程式的共享控制代碼。 / Shared handle to a running in-app program.
///
/// Clones refer to the same child. The orchestrator keeps one to kill on
/// shutdown while the streaming thread keeps another to reap the exit code.
#[derive(Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.child, &other.child)
    }
}

impl Eq for ProcessHandle {}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Arc::new(Mutex::new(child)),
            pid,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 立即終止程式。 / Kills the program immediately; a program that already exited is not an error.
    pub fn kill(&self) -> io::Result<()> {
        let mut child = self.lock();
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        if let Err(err) = child.kill() {
            if err.kind() != io::ErrorKind::InvalidInput {
                return Err(err);
            }
        }
        child.wait().map(|_| ())
    }

    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.lock().try_wait()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// 寫入標準輸入。 / Writes `text` to the program's standard input.
    pub fn write_input(&self, text: &str) -> io::Result<()> {
        let mut child = self.lock();
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        stdin.write_all(text.as_bytes())?;
        stdin.flush()
    }
}

/// What the streaming thread reports, in production order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Line(String),
    Failed(String),
    Exited(Option<i32>),
}

/// 啟動程式並將 stdout/stderr 合併為單一串流。 / Spawns `program` with stdout and stderr merged into one pipe.
pub fn spawn_captured(
    program: &Path,
    working_dir: &Path,
    env: &BTreeMap<OsString, OsString>,
) -> io::Result<(ProcessHandle, os_pipe::PipeReader)> {
    let (reader, writer) = os_pipe::pipe()?;
    let mut command = Command::new(program);
    command
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(writer.try_clone()?)
        .stderr(writer);
    let child = command.spawn()?;
    // The command holds the write ends; drop them so EOF follows the child's exit.
    drop(command);
    tracing::debug!(program = %program.display(), pid = child.id(), "spawned in-app program");
    Ok((ProcessHandle::new(child), reader))
}

/// Reads `reader` line by line on a dedicated thread, then reaps the exit code.
///
/// `sink` sees every line in order, at most one `Failed`, and always a final
/// `Exited`. A panic inside the loop is reported as `Failed`.
pub fn stream_lines<F>(
    handle: ProcessHandle,
    reader: os_pipe::PipeReader,
    mut sink: F,
) -> io::Result<thread::JoinHandle<()>>
where
    F: FnMut(StreamEvent) + Send + 'static,
{
    thread::Builder::new()
        .name("runpp-output".into())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| read_lines(reader, &mut sink)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => sink(StreamEvent::Failed(format!(
                    "failed to read program output: {err}"
                ))),
                Err(_) => sink(StreamEvent::Failed(
                    "output reader stopped unexpectedly".to_string(),
                )),
            }
            sink(StreamEvent::Exited(wait_for_exit(&handle)));
        })
}

fn read_lines<F>(reader: os_pipe::PipeReader, sink: &mut F) -> io::Result<()>
where
    F: FnMut(StreamEvent),
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            return Ok(());
        }
        if buffer.last() == Some(&b'\n') {
            buffer.pop();
            if buffer.last() == Some(&b'\r') {
                buffer.pop();
            }
        }
        sink(StreamEvent::Line(String::from_utf8_lossy(&buffer).into_owned()));
    }
}

// Polling keeps the lock free for a concurrent kill.
fn wait_for_exit(handle: &ProcessHandle) -> Option<i32> {
    loop {
        match handle.try_wait() {
            Ok(Some(status)) => return status.code(),
            Ok(None) => thread::sleep(std::time::Duration::from_millis(15)),
            Err(err) => {
                tracing::warn!(pid = handle.pid(), error = %err, "failed to reap program");
                return None;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn collect(handle: ProcessHandle, reader: os_pipe::PipeReader) -> Vec<StreamEvent> {
        let (tx, rx) = mpsc::channel();
        let join = stream_lines(handle, reader, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
        join.join().unwrap();
        rx.into_iter().collect()
    }

    #[test]
    fn merges_stdout_and_stderr_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, reader) =
            spawn_captured(Path::new("sh"), dir.path(), &BTreeMap::new()).unwrap();
        // `sh` without arguments reads its script from stdin.
        handle
            .write_input("echo one; echo two >&2; echo three; exit 4\n")
            .unwrap();

        let events = collect(handle, reader);
        assert_eq!(
            events,
            vec![
                StreamEvent::Line("one".into()),
                StreamEvent::Line("two".into()),
                StreamEvent::Line("three".into()),
                StreamEvent::Exited(Some(4)),
            ]
        );
    }

    #[test]
    fn kill_ends_stream_without_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, reader) =
            spawn_captured(Path::new("sh"), dir.path(), &BTreeMap::new()).unwrap();
        handle.write_input("exec sleep 30\n").unwrap();
        assert!(handle.is_running());

        let killer = handle.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            killer.kill().unwrap();
        });
        let events = collect(handle.clone(), reader);
        assert_eq!(events.last(), Some(&StreamEvent::Exited(None)));
        assert!(!handle.is_running());
        handle.kill().unwrap();
    }
}
