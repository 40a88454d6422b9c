//! Synchronous external command execution behind a trait, so provisioning can
//! be exercised without touching real tools.

use std::ffi::OsString;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("waiting on `{program}` failed: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// What a finished command left behind. `status` is `None` when the process
/// was ended by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs a program to completion and captures its output. A non-zero exit is
/// not an error at this layer; callers decide what failure means.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        (**self).run(program, args)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        (**self).run(program, args)
    }
}

/// Runs commands through `std::process`, killing them once `timeout` passes.
///
/// The timeout also bounds output collection. A grandchild that inherits the
/// pipes and outlives the command cannot hold `run` past the deadline; its
/// unread output is dropped and the reader threads are left to finish alone.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_owned(),
                source,
            })?;
        let pid = child.id();
        info!(pid, command = %render(program, args), "running external command");

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let deadline = Instant::now() + self.timeout;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    error!(pid, timeout = ?self.timeout, "external command timed out and was killed");
                    return Err(ProcessError::Timeout {
                        program: program.to_owned(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(ProcessError::Wait {
                        program: program.to_owned(),
                        source,
                    })
                }
            }
        };

        let output = CommandOutput {
            status: status.code(),
            stdout: collect(pid, "stdout", stdout, deadline),
            stderr: collect(pid, "stderr", stderr, deadline),
        };
        if !output.stderr.trim().is_empty() {
            error!(pid, stderr = %output.stderr.trim_end(), "external command wrote to stderr");
        }
        debug!(pid, status = ?output.status, stdout = %output.stdout.trim_end(), "external command finished");
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn collect(pid: u32, stream: &str, reader: Option<Receiver<String>>, deadline: Instant) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => text,
        Err(_) => {
            warn!(pid, stream, "output still open at the deadline, dropping it");
            String::new()
        }
    }
}

fn render(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}
