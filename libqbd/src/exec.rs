//! Process execution seam.
//!
//! [`CommandExecutor`] is the only place `libqbd` touches the operating
//! system's process table.  The driver is generic over it so tests can swap in
//! a scripted executor and assert exactly which commands were issued.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::QbdError;

/// Runs an external command to completion and returns its standard output.
///
/// Implementations must return an error when the command cannot be launched
/// or exits with a non-zero status.  Callers treat that error as opaque and
/// never retry it.
pub trait CommandExecutor {
    fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, QbdError>;
}

impl<T: CommandExecutor + ?Sized> CommandExecutor for &T {
    fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, QbdError> {
        (**self).execute(program, args)
    }
}

/// Render `program args...` for logs and error messages.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

/// [`CommandExecutor`] backed by [`std::process::Command`].
///
/// Standard output and standard error are drained on helper threads so a
/// chatty child cannot block on a full pipe.  When a timeout is configured the
/// child is killed and reaped once it expires.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor {
    timeout: Option<Duration>,
}

impl SystemExecutor {
    /// Executor that waits for every command indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that kills commands running longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Build from an optional timeout, as carried by [`crate::QbdConfig`].
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn wait(&self, child: &mut Child, rendered: &str) -> Result<ExitStatus, QbdError> {
        let Some(timeout) = self.timeout else {
            return child
                .wait()
                .map_err(|e| QbdError::command(rendered, format!("wait failed: {e}")));
        };

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(QbdError::command(rendered, format!("wait failed: {e}"))),
            }
            if start.elapsed() > timeout {
                kill_and_reap(child, rendered);
                return Err(QbdError::command(
                    rendered,
                    format!("timed out after {timeout:?}"),
                ));
            }
            thread::sleep(Duration::from_millis(25));
        }
    }
}

impl CommandExecutor for SystemExecutor {
    fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, QbdError> {
        let rendered = render_command(program, args);
        debug!(command = %rendered, "executing");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| QbdError::command(&rendered, format!("failed to launch: {e}")))?;

        let stdout_handle = spawn_output_reader(child.stdout.take());
        let stderr_handle = spawn_output_reader(child.stderr.take());
        let status = self.wait(&mut child, &rendered)?;

        let stdout = join_reader(stdout_handle, &rendered)?;
        let stderr = join_reader(stderr_handle, &rendered)?;

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "none (killed by signal)".to_owned(), |c| c.to_string());
            return Err(QbdError::command(
                &rendered,
                format!("exit code {code}: {}", diagnostic(&stdout, &stderr)),
            ));
        }
        Ok(stdout)
    }
}

/// Kill a timed-out child and collect its exit status.
fn kill_and_reap(child: &mut Child, rendered: &str) {
    if let Err(e) = child.kill() {
        warn!(command = %rendered, pid = child.id(), error = %e, "failed to kill timed-out command");
    }
    if let Err(e) = child.wait() {
        warn!(command = %rendered, pid = child.id(), error = %e, "failed to reap timed-out command");
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<std::io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = pipe {
            reader.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_reader(
    handle: thread::JoinHandle<std::io::Result<Vec<u8>>>,
    rendered: &str,
) -> Result<Vec<u8>, QbdError> {
    handle
        .join()
        .map_err(|_| QbdError::command(rendered, "output reader thread panicked"))?
        .map_err(|e| QbdError::command(rendered, format!("read output: {e}")))
}

/// Prefer stderr, fall back to stdout.
fn diagnostic(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = String::from_utf8_lossy(stdout);
    let text = if !stderr.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };
    if text.is_empty() {
        "no additional output".to_owned()
    } else {
        text.to_owned()
    }
}
