//! External command execution
//!
//! [`CommandExecutor`] runs one conversion tool against a source file and a
//! private temporary target path. The command is an argument vector, never a
//! shell string: `{source}` and `{target}` tokens inside any argument are
//! replaced with the two paths.
//!
//! On Unix the command runs in its own process group so that the whole tree it
//! spawns can be signalled at once. Nothing started here outlives the call:
//! the group is terminated on timeout, swept after a normal exit, and killed
//! if the calling task is cancelled.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use strata_core::{ExecConfig, FileHandle, TransformResult};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use uuid::Uuid;

const SOURCE_PLACEHOLDER: &str = "{source}";
const TARGET_PLACEHOLDER: &str = "{target}";
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command timed out after {timeout:?}: {output}")]
    Timeout { timeout: Duration, output: String },

    #[error("command exited with {}: {output}", describe_exit(.exit_code))]
    NonZeroExit {
        /// `None` when the process was ended by a signal.
        exit_code: Option<i32>,
        output: String,
    },

    #[error("command exited successfully but produced no file at {}: {output}", .path.display())]
    FileNotFound { path: PathBuf, output: String },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("empty command")]
    EmptyCommand,

    #[error("{0} has no local bytes to convert")]
    MissingSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// Exit code of the finished command; `Some(0)` for a command that exited
    /// cleanly without writing its output.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::NonZeroExit { exit_code, .. } => *exit_code,
            ExecError::FileNotFound { .. } => Some(0),
            _ => None,
        }
    }

    /// Combined stdout and stderr captured before the failure.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::Timeout { output, .. }
            | ExecError::NonZeroExit { output, .. }
            | ExecError::FileNotFound { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Replaces the executor's configured timeout.
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run `argv` to turn `source` into `target`.
    ///
    /// On success the returned handle is `target` pointing at a fresh file in
    /// the scratch directory; the caller owns that file from then on.
    #[tracing::instrument(skip(self, source, target, argv, opts), fields(source = %source.name(), target = %target.name()))]
    pub async fn exec(
        &self,
        source: &FileHandle,
        target: FileHandle,
        argv: &[String],
        opts: &ExecOptions,
    ) -> Result<FileHandle, ExecError> {
        let source_path = source
            .location()
            .ok_or_else(|| ExecError::MissingSource(source.name().to_string()))?;
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        fs::create_dir_all(&self.config.scratch_dir).await?;
        let temp_path = self.config.scratch_dir.join(format!(
            "strata-{}{}",
            Uuid::new_v4(),
            target.extension()
        ));

        let argv: Vec<String> = argv
            .iter()
            .map(|arg| substitute(arg, source_path, &temp_path))
            .collect();
        let limit = opts.timeout.unwrap_or(self.config.timeout);

        let result = match self.run(&argv, limit).await {
            Ok(output) => {
                if fs::try_exists(&temp_path).await.unwrap_or(false) {
                    return Ok(target.with_location(temp_path));
                }
                Err(ExecError::FileNotFound {
                    path: temp_path.clone(),
                    output,
                })
            }
            Err(e) => Err(e),
        };

        // Some tools leave partial output behind when they fail.
        let _ = fs::remove_file(&temp_path).await;
        result
    }

    async fn run(&self, argv: &[String], limit: Duration) -> Result<String, ExecError> {
        let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| ExecError::Launch {
            program: program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::new(child.id());

        tracing::debug!(program = %program, pid = ?child.id(), "Launched command");

        let mut collector = tokio::spawn(collect_output(child.stdout.take(), child.stderr.take()));

        let status = match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status?),
            Err(_) => {
                tracing::warn!(
                    program = %program,
                    timeout_ms = limit.as_millis() as u64,
                    "Command timed out, terminating"
                );
                self.terminate(&mut child, &group).await;
                None
            }
        };

        // Grandchildren that stayed in the group go down with the leader. The
        // leader is already reaped here, but the kernel does not hand its pid
        // out again while any group member is alive, so the pgid still names
        // this group. With no members left the signal is a no-op, unless the
        // pid space wrapped and reissued the id in the meantime.
        group.kill();
        group.disarm();

        let output = match tokio::time::timeout(self.config.kill_grace, &mut collector).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(_)) => String::new(),
            Err(_) => {
                // A process outside the group still holds the pipes.
                collector.abort();
                String::new()
            }
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match status {
            None => Err(ExecError::Timeout {
                timeout: limit,
                output,
            }),
            Some(status) if status.success() => {
                tracing::debug!(program = %program, duration_ms, "Command finished");
                Ok(output)
            }
            Some(status) => {
                let exit_code = status.code();
                tracing::warn!(
                    program = %program,
                    exit_code = ?exit_code,
                    duration_ms,
                    "Command failed"
                );
                Err(ExecError::NonZeroExit { exit_code, output })
            }
        }
    }

    /// SIGTERM the group, then SIGKILL it if the leader has not exited within
    /// the grace period.
    async fn terminate(&self, child: &mut Child, group: &ProcessGroup) {
        group.signal(Signal::Term);

        if tokio::time::timeout(self.config.kill_grace, child.wait())
            .await
            .is_err()
        {
            tracing::warn!(pid = ?child.id(), "Command ignored SIGTERM, killing");
            group.kill();
            if let Err(e) = child.kill().await {
                tracing::error!(error = %e, "Failed to kill command");
            }
        }
    }
}

fn substitute(arg: &str, source: &Path, target: &Path) -> String {
    arg.replace(SOURCE_PLACEHOLDER, &source.to_string_lossy())
        .replace(TARGET_PLACEHOLDER, &target.to_string_lossy())
}

/// Drain stdout and stderr into one buffer in the order chunks arrive.
async fn collect_output(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) -> Vec<u8> {
    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut out_buf = vec![0u8; READ_CHUNK_BYTES];
    let mut err_buf = vec![0u8; READ_CHUNK_BYTES];
    let mut output = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf) => match read {
                Some(n) => output.extend_from_slice(&out_buf[..n]),
                None => stdout = None,
            },
            read = read_chunk(&mut stderr, &mut err_buf) => match read {
                Some(n) => output.extend_from_slice(&err_buf[..n]),
                None => stderr = None,
            },
        }
    }

    output
}

/// Next chunk from `reader`; `None` at EOF or on error. Pends forever once the
/// reader is gone so the other stream keeps draining.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> Option<usize> {
    match reader {
        Some(reader) => match reader.read(buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(n),
        },
        None => std::future::pending().await,
    }
}

enum Signal {
    Term,
    Kill,
}

/// Process group of a launched command. Kills the group when dropped while
/// still armed, so a cancelled caller does not leak the command's tree.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&self) {
        self.signal(Signal::Kill);
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) {
        let Some(pgid) = self.pgid else {
            return;
        };
        let signal = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // ESRCH just means the group is already gone.
        unsafe {
            libc::killpg(pgid as libc::pid_t, signal);
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) {}

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Turn an executor result into the result of a transform.
pub trait ExecResultExt {
    fn into_transform(self, version: &str) -> TransformResult;
}

impl ExecResultExt for Result<FileHandle, ExecError> {
    fn into_transform(self, version: &str) -> TransformResult {
        match self {
            Ok(target) => TransformResult::Transformed(target),
            Err(e) => TransformResult::Failed(format!("{}: {}", version, e)),
        }
    }
}
