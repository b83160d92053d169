//! Command execution against a sandbox instance.
//!
//! [`CommandExecutor`] is the error boundary of the crate: transport and
//! session failures never escape it, they come back as a
//! [`CommandResult`] with `status = Failed` and the reason in stderr.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use executor_api_types::RunRequest;
use executor_client::{ExecutorClient, OutputAccumulator, SessionEnd, SessionError};
use tokio::time::Instant;

use crate::command::{is_valid_env_key, shell_argv};

/// Default per-command deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Validation failures caught when a request is built.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command text is empty")]
    EmptyCommand,
    #[error("invalid environment variable name: {0:?}")]
    InvalidEnvKey(String),
}

/// One command to run remotely. Built per call, discarded after use.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    command: String,
    cwd: Option<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Result<Self, CommandError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        Ok(Self {
            command,
            cwd: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add one environment override. Keys must be shell identifiers; values
    /// may be arbitrary text, they are quoted during assembly.
    pub fn env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, CommandError> {
        let key = key.into();
        if !is_valid_env_key(&key) {
            return Err(CommandError::InvalidEnvKey(key));
        }
        self.env.insert(key, value.into());
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_text(&self) -> &str {
        &self.command
    }

    pub fn deadline(&self) -> Duration {
        self.timeout
    }

    /// The `sh -c <script>` argv this request runs as, with cwd and env
    /// folded into the script.
    pub fn argv(&self) -> Vec<String> {
        shell_argv(&self.command, self.cwd.as_deref(), &self.env)
    }

    pub(crate) fn run_request(&self) -> RunRequest {
        RunRequest {
            cmd: self.command.clone(),
            cwd: self.cwd.clone(),
            env: if self.env.is_empty() {
                None
            } else {
                Some(HashMap::from_iter(self.env.clone()))
            },
        }
    }
}

/// Where a command ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Running,
    Finished,
    Failed,
}

/// Outcome of one command execution, owned by the caller.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub status: CommandStatus,
    pub duration: Duration,
    /// The original command text, echoed back.
    pub command: String,
    /// The argv the command was (or would have been) shipped as.
    pub args: Vec<String>,
}

impl CommandResult {
    /// Exit zero and a clean finish.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.status == CommandStatus::Finished
    }

    /// A result for a command that never reached the executor.
    pub(crate) fn unreachable_failure(request: &CommandRequest, reason: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Command execution failed: {reason}"),
            exit_code: 1,
            status: CommandStatus::Failed,
            duration: Duration::ZERO,
            command: request.command.clone(),
            args: request.argv(),
        }
    }

    /// Combined output: stdout, then stderr on its own line when present.
    pub fn output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Callback invoked with each output chunk as it arrives, in arrival order.
pub type OutputCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Runs commands on one instance through its executor.
pub struct CommandExecutor {
    client: ExecutorClient,
    instance_id: String,
}

impl CommandExecutor {
    pub fn new(client: ExecutorClient, instance_id: impl Into<String>) -> Self {
        Self {
            client,
            instance_id: instance_id.into(),
        }
    }

    /// Execute a command and always get a result back.
    ///
    /// With a callback present the command rides the persistent exec
    /// connection so output is observable before completion; without one a
    /// single buffered request is cheaper. Both modes produce the same
    /// result for the same command.
    pub async fn execute(
        &self,
        request: &CommandRequest,
        on_stdout: Option<OutputCallback<'_>>,
        on_stderr: Option<OutputCallback<'_>>,
    ) -> CommandResult {
        let started = Instant::now();
        if on_stdout.is_some() || on_stderr.is_some() {
            self.execute_streaming(request, on_stdout, on_stderr, started)
                .await
        } else {
            self.execute_buffered(request, started).await
        }
    }

    async fn execute_buffered(&self, request: &CommandRequest, started: Instant) -> CommandResult {
        let run_request = request.run_request();
        let run = self.client.run(&run_request);
        let response = tokio::time::timeout(request.timeout, run).await;

        match response {
            Ok(Ok(response)) => finish(
                request,
                response.stdout,
                response.stderr,
                response.exit_code,
                started,
            ),
            Ok(Err(err)) => transport_failure(request, String::new(), String::new(), &err, started),
            Err(_) => timed_out(request, String::new(), String::new(), started),
        }
    }

    async fn execute_streaming(
        &self,
        request: &CommandRequest,
        on_stdout: Option<OutputCallback<'_>>,
        on_stderr: Option<OutputCallback<'_>>,
        started: Instant,
    ) -> CommandResult {
        let argv = request.argv();

        // The accumulator lives outside the deadline so output that arrived
        // before a timeout survives into the result.
        let mut acc = OutputAccumulator::default();
        let drive = async {
            let mut session = self.client.open_session(&self.instance_id).await?;
            session.send_command(&argv).await?;
            let end = session.drive(&mut acc, on_stdout, on_stderr).await?;
            session.close().await;
            Ok::<SessionEnd, SessionError>(end)
        };
        let outcome = tokio::time::timeout(request.timeout, drive).await;

        match outcome {
            Ok(Ok(SessionEnd::Exited { code })) | Ok(Ok(SessionEnd::Closed { code })) => {
                finish(request, acc.stdout, acc.stderr, code, started)
            }
            Ok(Ok(SessionEnd::Failed { message })) => {
                failed(request, acc.stdout, append_line(acc.stderr, &message), started)
            }
            Ok(Err(err)) => transport_failure(request, acc.stdout, acc.stderr, &err, started),
            Err(_) => timed_out(request, acc.stdout, acc.stderr, started),
        }
    }
}

fn finish(
    request: &CommandRequest,
    stdout: String,
    stderr: String,
    exit_code: i32,
    started: Instant,
) -> CommandResult {
    let status = if exit_code == 0 {
        CommandStatus::Finished
    } else {
        CommandStatus::Failed
    };
    CommandResult {
        stdout,
        stderr,
        exit_code,
        status,
        duration: started.elapsed(),
        command: request.command.clone(),
        args: request.argv(),
    }
}

fn failed(
    request: &CommandRequest,
    stdout: String,
    stderr: String,
    started: Instant,
) -> CommandResult {
    CommandResult {
        stdout,
        stderr,
        exit_code: 1,
        status: CommandStatus::Failed,
        duration: started.elapsed(),
        command: request.command.clone(),
        args: request.argv(),
    }
}

fn transport_failure(
    request: &CommandRequest,
    stdout: String,
    stderr: String,
    err: &dyn std::fmt::Display,
    started: Instant,
) -> CommandResult {
    tracing::debug!(command = %request.command, error = %err, "command execution failed");
    failed(
        request,
        stdout,
        append_line(stderr, &format!("Command execution failed: {err}")),
        started,
    )
}

fn timed_out(
    request: &CommandRequest,
    stdout: String,
    stderr: String,
    started: Instant,
) -> CommandResult {
    let reason = format!(
        "Command timed out after {:.1}s",
        request.timeout.as_secs_f64()
    );
    tracing::debug!(command = %request.command, %reason, "command deadline expired");
    failed(request, stdout, append_line(stderr, &reason), started)
}

fn append_line(mut text: String, line: &str) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(line);
    text
}
