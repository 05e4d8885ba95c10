//! Process seam for the vault tool.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use portvault_common::{Error, Result, SensitiveBytes, Session};

/// Where the tool's standard input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// No input; the tool must not prompt.
    Null,
    /// Forward the runner's credential channel (unlock and login prompts).
    Credentials,
}

/// What happens to the tool's standard error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrMode {
    /// Capture it for inspection.
    Capture,
    /// Pass it straight through to the user's terminal.
    Inherit,
}

/// One invocation of the vault tool.
#[derive(Clone)]
pub struct Invocation {
    args: Vec<String>,
    redacted: Vec<usize>,
    pub stdin: StdinMode,
    pub stderr: StderrMode,
}

impl Invocation {
    /// Start an invocation with its subcommand.
    pub fn new(command: &str) -> Self {
        Self {
            args: vec![command.to_string()],
            redacted: Vec::new(),
            stdin: StdinMode::Null,
            stderr: StderrMode::Capture,
        }
    }

    /// Append a plain argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an argument that must never appear in logs.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.redacted.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Append `--session <token>`.
    pub fn session(self, session: &Session) -> Self {
        self.arg("--session").secret_arg(session.expose())
    }

    /// Forward credentials on stdin.
    pub fn with_credentials(mut self) -> Self {
        self.stdin = StdinMode::Credentials;
        self
    }

    /// Let stderr reach the terminal.
    pub fn inherit_stderr(mut self) -> Self {
        self.stderr = StderrMode::Inherit;
        self
    }

    /// Full argument list, secrets included.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Value following a flag such as `--itemid`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Argument list safe for logging.
    pub fn display_args(&self) -> String {
        self.args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if self.redacted.contains(&i) {
                    "[REDACTED]"
                } else {
                    a.as_str()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("args", &self.display_args())
            .field("stdin", &self.stdin)
            .field("stderr", &self.stderr)
            .finish()
    }
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Successful exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed exit with the given stderr.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// The most useful human-readable message, preferring stderr.
    pub fn message(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Interactive credential capability handed to the runner.
///
/// Unlock and login read the master password (and email) from the tool's
/// standard input; this decides where that input comes from.
#[derive(Debug, Clone)]
pub enum CredentialChannel {
    /// The user types into the tool directly; our stdin is handed over untouched.
    Inherit,
    /// Fixed input written to the tool's stdin, then closed.
    Scripted(SensitiveBytes),
}

/// Executes vault tool invocations.
///
/// Implementations run one invocation at a time and wait for it to exit.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the tool and capture its output.
    ///
    /// # Errors
    /// - The tool could not be launched
    /// - Reading or writing its streams failed
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs the real tool as a child process.
pub struct ProcessRunner {
    program: PathBuf,
    credentials: CredentialChannel,
}

impl ProcessRunner {
    /// Create a runner for the given binary.
    pub fn new(program: impl Into<PathBuf>, credentials: CredentialChannel) -> Self {
        Self {
            program: program.into(),
            credentials,
        }
    }

    /// Runner for `bw` on the PATH with interactive credentials.
    pub fn interactive() -> Self {
        Self::new("bw", CredentialChannel::Inherit)
    }

    /// Path of the binary being run.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        debug!(
            "Running {} {}",
            self.program.display(),
            invocation.display_args()
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(invocation.args())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let forward = invocation.stdin == StdinMode::Credentials;
        match (forward, &self.credentials) {
            (false, _) => cmd.stdin(Stdio::null()),
            (true, CredentialChannel::Inherit) => cmd.stdin(Stdio::inherit()),
            (true, CredentialChannel::Scripted(_)) => cmd.stdin(Stdio::piped()),
        };
        match invocation.stderr {
            StderrMode::Capture => cmd.stderr(Stdio::piped()),
            StderrMode::Inherit => cmd.stderr(Stdio::inherit()),
        };

        let mut child = cmd.spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to launch {}: {}", self.program.display(), e),
            ))
        })?;

        if let (true, CredentialChannel::Scripted(input)) = (forward, &self.credentials) {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
        }

        // A human answering prompts needs to see them as they arrive.
        let echo = forward && matches!(self.credentials, CredentialChannel::Inherit);
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let (stdout, stderr) = tokio::try_join!(
            drain(stdout_pipe, echo),
            drain(stderr_pipe, false)
        )?;
        let status = child.wait().await?;

        Ok(ToolOutput {
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read a pipe to the end, optionally mirroring it to our stdout.
async fn drain<R>(pipe: Option<R>, echo: bool) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(collected);
    };

    let mut terminal = tokio::io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if echo {
            terminal.write_all(&buf[..n]).await?;
            terminal.flush().await?;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_args_redacts_secrets() {
        let session = Session::new("tok3n-value-1234567").unwrap();
        let inv = Invocation::new("create")
            .arg("item")
            .secret_arg("eyJuYW1lIjoieCJ9")
            .session(&session);

        assert_eq!(
            inv.display_args(),
            "create item [REDACTED] --session [REDACTED]"
        );
        assert_eq!(inv.args()[4], "tok3n-value-1234567");
        assert!(!format!("{:?}", inv).contains("tok3n"));
    }

    #[test]
    fn test_flag_value() {
        let inv = Invocation::new("get")
            .arg("attachment")
            .arg("att-1")
            .arg("--itemid")
            .arg("item-1");
        assert_eq!(inv.flag_value("--itemid"), Some("item-1"));
        assert_eq!(inv.flag_value("--output"), None);
    }

    #[test]
    fn test_message_prefers_stderr() {
        let out = ToolOutput {
            success: false,
            stdout: "noise".into(),
            stderr: "  Vault is locked.\n".into(),
        };
        assert_eq!(out.message(), "Vault is locked.");
        assert_eq!(ToolOutput::ok(" done \n").message(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let runner = ProcessRunner::new("sh", CredentialChannel::Inherit);
        let inv = Invocation::new("-c").arg("echo out; echo err >&2; exit 3");

        let output = runner.run(&inv).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_scripted_credentials() {
        let runner = ProcessRunner::new(
            "sh",
            CredentialChannel::Scripted(SensitiveBytes::new(b"master-pw\n".to_vec())),
        );
        let inv = Invocation::new("-c").arg("read pw; echo \"got:$pw\"").with_credentials();

        let output = runner.run(&inv).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "got:master-pw");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_without_credentials_gets_eof() {
        let runner = ProcessRunner::new(
            "sh",
            CredentialChannel::Scripted(SensitiveBytes::new(b"unused\n".to_vec())),
        );
        let inv = Invocation::new("-c").arg("read pw || echo eof");

        let output = runner.run(&inv).await.unwrap();
        assert_eq!(output.stdout.trim(), "eof");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let runner = ProcessRunner::new(
            "/nonexistent/portvault-bw-binary",
            CredentialChannel::Inherit,
        );
        let result = runner.run(&Invocation::new("status")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
