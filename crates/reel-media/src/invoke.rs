//! Canonical subprocess envelope for external media tools.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// How much trailing stderr is retained for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Grace period between SIGTERM and the hard kill.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A fully specified tool invocation: program, argv, optional stdin,
/// working directory, and timeout. The invoker never parses stdout
/// for meaning.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    stdin: Option<Vec<u8>>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            current_dir: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }
}

/// Result of a completed tool run.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub exit_code: Option<i32>,
    pub stderr_tail: String,
    pub wall_time: Duration,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Bounded buffer keeping only the trailing bytes of a stream.
#[derive(Debug)]
struct TailBuffer {
    data: Vec<u8>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap.min(4096)),
            cap,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.data.extend_from_slice(line.as_bytes());
        self.data.push(b'\n');
        if self.data.len() > self.cap {
            let excess = self.data.len() - self.cap;
            self.data.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Runner for external tool commands.
///
/// Enforces the timeout by first requesting graceful termination
/// (SIGTERM), then hard-killing the process after the grace period.
pub struct ToolInvoker {
    grace: Duration,
}

impl Default for ToolInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolInvoker {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run a tool to completion.
    ///
    /// Returns the outcome envelope for any run that produced an exit
    /// status; `Err(Timeout)` when the timeout fired and the process
    /// had to be terminated.
    pub async fn run(&self, cmd: &ToolCommand) -> MediaResult<ToolOutcome> {
        debug!("Running {} {}", cmd.program(), cmd.argv().join(" "));
        let started = Instant::now();

        let mut command = Command::new(cmd.program());
        command
            .args(cmd.argv())
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A cancelled stage must not leave the tool running
            .kill_on_drop(true);

        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child.id();

        if let Some(data) = &cmd.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data).await?;
                // Dropping closes the pipe
            }
        }

        let stderr = child.stderr.take().ok_or_else(|| {
            MediaError::Io(std::io::Error::other("stderr not captured"))
        })?;
        let mut reader = BufReader::new(stderr).lines();

        let tail_handle = tokio::spawn(async move {
            let mut tail = TailBuffer::new(STDERR_TAIL_BYTES);
            while let Ok(Some(line)) = reader.next_line().await {
                tail.push_line(&line);
            }
            tail.into_string()
        });

        let wait = tokio::time::timeout(cmd.timeout, child.wait()).await;

        let status = match wait {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "{} timed out after {:?}, requesting termination",
                    cmd.program(),
                    cmd.timeout
                );
                self.terminate(&mut child, pid).await;
                return Err(MediaError::Timeout(cmd.timeout.as_secs()));
            }
        };

        let stderr_tail = tail_handle.await.unwrap_or_default();
        let outcome = ToolOutcome {
            exit_code: status.code(),
            stderr_tail,
            wall_time: started.elapsed(),
        };

        debug!(
            "{} finished with {:?} in {:?}",
            cmd.program(),
            outcome.exit_code,
            outcome.wall_time
        );
        Ok(outcome)
    }

    /// Run a tool and fail on a non-zero exit.
    pub async fn run_checked(&self, cmd: &ToolCommand) -> MediaResult<ToolOutcome> {
        let outcome = self.run(cmd).await?;
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(MediaError::tool_failed(
                outcome.exit_code,
                outcome.stderr_tail,
            ))
        }
    }

    /// SIGTERM, wait out the grace period, then hard kill.
    async fn terminate(&self, child: &mut tokio::process::Child, pid: Option<u32>) {
        if let Some(pid) = pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to signal pid {}: {}", pid, e);
            }
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Process ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_buffer_bounded() {
        let mut tail = TailBuffer::new(16);
        for i in 0..100 {
            tail.push_line(&format!("line {i}"));
        }
        let text = tail.into_string();
        assert!(text.len() <= 16);
        assert!(text.contains("99"));
    }

    #[test]
    fn test_command_builder() {
        let cmd = ToolCommand::new("ffmpeg")
            .arg("-y")
            .args(["-i", "in.mp4"])
            .timeout(Duration::from_secs(30));
        assert_eq!(cmd.program(), "ffmpeg");
        assert_eq!(cmd.argv(), &["-y", "-i", "in.mp4"]);
    }

    #[tokio::test]
    async fn test_run_captures_exit_and_stderr() {
        let invoker = ToolInvoker::new();
        let cmd = ToolCommand::new("sh")
            .args(["-c", "echo oops >&2; exit 3"])
            .timeout(Duration::from_secs(5));

        let outcome = invoker.run(&cmd).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr_tail.contains("oops"));
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_run_checked_rejects_nonzero() {
        let invoker = ToolInvoker::new();
        let cmd = ToolCommand::new("sh")
            .args(["-c", "exit 1"])
            .timeout(Duration::from_secs(5));
        assert!(matches!(
            invoker.run_checked(&cmd).await,
            Err(MediaError::ToolFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_terminates() {
        let invoker = ToolInvoker::new().with_grace(Duration::from_millis(200));
        let cmd = ToolCommand::new("sleep")
            .arg("30")
            .timeout(Duration::from_millis(100));

        let started = Instant::now();
        let result = invoker.run(&cmd).await;
        assert!(matches!(result, Err(MediaError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
