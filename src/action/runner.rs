// src/action/runner.rs  -  Bounded-time external command execution
use super::{ActionCommand, DispatchResult};
use std::io::{self, ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child to exit.
const WAIT_POLL: Duration = Duration::from_millis(10);
/// How long to wait for the stderr drain once the child has exited.  A
/// backgrounded grandchild can hold the pipe open indefinitely.
const STDERR_GRACE: Duration = Duration::from_millis(100);
/// Longest stderr excerpt kept in a result.
const STDERR_MAX: usize = 200;
/// POSIX shell "command not found".
const EXIT_NOT_FOUND: i32 = 127;

/// Runs one command and reports how it went.  Must return within roughly
/// `timeout`; the executor relies on that to keep its workers moving.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &ActionCommand, timeout: Duration) -> DispatchResult;
}

/// Spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &ActionCommand, timeout: Duration) -> DispatchResult {
        let mut child = match spawn(cmd) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return DispatchResult::ToolMissing(cmd.program.clone());
            }
            Err(e) => return DispatchResult::ExecutionFailed(None, e.to_string()),
        };

        let stderr = child.stderr.take().and_then(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            let drain = thread::Builder::new()
                .name("n1-exec-stderr".into())
                .spawn(move || {
                    let mut buf = String::new();
                    let _ = pipe.read_to_string(&mut buf);
                    let _ = tx.send(buf);
                });
            match drain {
                Ok(_) => Some(rx),
                Err(e) => {
                    log::debug!("[exec] no stderr capture for `{cmd}`: {e}");
                    None
                }
            }
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    kill_tree(&mut child);
                    log::debug!("[exec] killed `{cmd}` after {timeout:?}");
                    return DispatchResult::Timeout;
                }
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(e) => {
                    kill_tree(&mut child);
                    return DispatchResult::ExecutionFailed(None, e.to_string());
                }
            }
        };

        if status.success() {
            return DispatchResult::Success;
        }
        if status.code() == Some(EXIT_NOT_FOUND) {
            return DispatchResult::ToolMissing(cmd.tool().to_string());
        }
        let text = stderr
            .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
            .unwrap_or_default();
        DispatchResult::ExecutionFailed(status.code(), excerpt(&text))
    }
}

fn spawn(cmd: &ActionCommand) -> io::Result<Child> {
    let mut c = Command::new(&cmd.program);
    c.args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    // Own process group, so a timeout reaches whatever `sh -c` started too.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        c.process_group(0);
    }
    c.spawn()
}

/// Kill the child with everything it started, then reap it.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // pgid == pid (process_group(0)); the child is not reaped yet, so
        // the id cannot have been reused.
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: sends a signal, touches no memory.
            unsafe { libc::kill(-pgid, libc::SIGKILL) };
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn excerpt(stderr: &str) -> String {
    let s = stderr.trim();
    match s.char_indices().nth(STDERR_MAX) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}
