//! Sandbox handle: readiness gating, command execution, and file operations
//! against one remote instance.
//!
//! A [`Sandbox`] is configured explicitly through [`SandboxConfig`]; nothing
//! in this crate reads the process environment. The executor endpoint is
//! resolved through the control plane once and cached for the handle's
//! lifetime; everything else is recomputed per call.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use executor_api_types::RunStreamEvent;
use executor_client::ExecutorClient;
use futures_util::stream::BoxStream;
use tokio::time::Instant;
use url::Url;

pub mod blocking;
pub mod command;
pub mod exec;
pub mod fs;
pub mod process;
pub mod readiness;

pub use command::{shell_quote, shell_script};
pub use executor_client::{RetryPolicy, TransportError};
pub use exec::{
    CommandError, CommandExecutor, CommandRequest, CommandResult, CommandStatus, OutputCallback,
    DEFAULT_COMMAND_TIMEOUT,
};
pub use fs::{FsError, SandboxFs};
pub use process::{ProcessError, SandboxProcesses};
pub use readiness::{ControlPlane, InstanceStatus, RestControlPlane};

/// Default interval between readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Required configuration was absent or malformed. Raised at
    /// construction, never during polling.
    #[error("invalid sandbox configuration: {0}")]
    Config(String),
    /// The control plane has not published an executor endpoint yet.
    #[error("executor endpoint is not resolvable yet")]
    EndpointUnavailable,
    /// A raw transport failure, from entry points that expose the stream
    /// directly instead of converting to a [`CommandResult`].
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Explicit configuration for a sandbox handle.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Instance to execute against.
    pub instance_id: String,
    /// Per-instance shared secret, sent as a bearer credential on every
    /// executor request.
    pub secret: String,
    /// Control-plane API base.
    pub api_url: Url,
    /// Control-plane API token.
    pub api_token: String,
    /// Pre-resolved executor endpoint. When set, the control plane is never
    /// asked to resolve one.
    pub endpoint: Option<Url>,
    /// Retry policy for buffered executor requests.
    pub retry: RetryPolicy,
}

impl SandboxConfig {
    pub fn new(instance_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            secret: secret.into(),
            api_url: Url::parse("https://api.islet.run").expect("static url"),
            api_token: String::new(),
            endpoint: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn api(mut self, api_url: Url, api_token: impl Into<String>) -> Self {
        self.api_url = api_url;
        self.api_token = api_token.into();
        self
    }

    pub fn endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn validate(&self) -> Result<(), SandboxError> {
        if self.instance_id.trim().is_empty() {
            return Err(SandboxError::Config("instance_id is required".to_string()));
        }
        if self.secret.trim().is_empty() {
            return Err(SandboxError::Config("secret is required".to_string()));
        }
        Ok(())
    }
}

/// Handle to one remote sandbox instance.
pub struct Sandbox {
    config: SandboxConfig,
    control: Arc<dyn ControlPlane>,
    /// Write-once cache of the resolved executor endpoint.
    endpoint: OnceLock<Url>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Build a handle talking to the REST control plane.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let control = Arc::new(RestControlPlane::new(
            config.api_url.clone(),
            config.api_token.clone(),
        ));
        Self::with_control_plane(config, control)
    }

    /// Build a handle over any control-plane implementation.
    pub fn with_control_plane(
        config: SandboxConfig,
        control: Arc<dyn ControlPlane>,
    ) -> Result<Self, SandboxError> {
        config.validate()?;
        let endpoint = OnceLock::new();
        if let Some(url) = &config.endpoint {
            let _ = endpoint.set(url.clone());
        }
        Ok(Self {
            config,
            control,
            endpoint,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// The resolved executor endpoint, fetching and caching it on first use.
    /// `None` while the instance has not published one.
    pub async fn endpoint(&self) -> Option<Url> {
        if let Some(url) = self.endpoint.get() {
            return Some(url.clone());
        }
        let url = self
            .control
            .resolve_endpoint(&self.config.instance_id)
            .await?;
        // A concurrent resolver may have won the race; the first write stands.
        Some(self.endpoint.get_or_init(|| url).clone())
    }

    pub(crate) async fn client(&self) -> Result<ExecutorClient, SandboxError> {
        let endpoint = self
            .endpoint()
            .await
            .ok_or(SandboxError::EndpointUnavailable)?;
        Ok(ExecutorClient::with_retry_policy(
            endpoint,
            self.config.secret.clone(),
            self.config.retry.clone(),
        ))
    }

    /// Execute a command buffered: the whole result arrives in one response.
    pub async fn exec(&self, request: &CommandRequest) -> CommandResult {
        self.exec_with_callbacks(request, None, None).await
    }

    /// Execute a command, streaming output through the callbacks as it
    /// arrives. With no callback supplied this is identical to [`exec`].
    ///
    /// [`exec`]: Self::exec
    pub async fn exec_with_callbacks(
        &self,
        request: &CommandRequest,
        on_stdout: Option<OutputCallback<'_>>,
        on_stderr: Option<OutputCallback<'_>>,
    ) -> CommandResult {
        match self.client().await {
            Ok(client) => {
                CommandExecutor::new(client, &self.config.instance_id)
                    .execute(request, on_stdout, on_stderr)
                    .await
            }
            Err(err) => CommandResult::unreachable_failure(request, &err.to_string()),
        }
    }

    /// Execute over the SSE endpoint, yielding raw decoded events. For
    /// callback-driven streaming with a uniform result, use
    /// [`exec_with_callbacks`].
    ///
    /// [`exec_with_callbacks`]: Self::exec_with_callbacks
    pub async fn exec_events(
        &self,
        request: &CommandRequest,
    ) -> Result<BoxStream<'static, Result<RunStreamEvent, TransportError>>, SandboxError> {
        let client = self.client().await?;
        Ok(client.run_streaming(&request.run_request()).await?)
    }

    /// Current control-plane status of the instance.
    pub async fn status(&self) -> InstanceStatus {
        self.control.instance_status(&self.config.instance_id).await
    }

    /// Whether the instance is ready for commands: the control plane reports
    /// it healthy AND the executor's health endpoint answers with a healthy
    /// token. When the control plane disagrees, the probe is skipped. An
    /// unreachable probe counts as not ready.
    pub async fn is_ready(&self) -> bool {
        let status = self.status().await;
        if status != InstanceStatus::Healthy {
            tracing::debug!(?status, "control plane not healthy, skipping executor probe");
            return false;
        }
        match self.client().await {
            Ok(client) => client.is_healthy().await,
            Err(_) => {
                tracing::debug!("executor endpoint not resolvable yet");
                false
            }
        }
    }

    /// Poll [`is_ready`] until it succeeds or `timeout` elapses. An endpoint
    /// that is not resolvable yet counts as "not ready yet", not an error.
    ///
    /// [`is_ready`]: Self::is_ready
    pub async fn wait_ready(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready().await {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    instance_id = %self.config.instance_id,
                    timeout_s = timeout.as_secs_f64(),
                    "instance did not become ready in time"
                );
                return false;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Filesystem operations on this sandbox.
    pub fn fs(&self) -> SandboxFs<'_> {
        SandboxFs::new(self)
    }

    /// Background process operations on this sandbox.
    pub fn processes(&self) -> SandboxProcesses<'_> {
        SandboxProcesses::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullControlPlane;

    #[async_trait]
    impl ControlPlane for NullControlPlane {
        async fn instance_status(&self, _instance_id: &str) -> InstanceStatus {
            InstanceStatus::Unknown
        }

        async fn resolve_endpoint(&self, _instance_id: &str) -> Option<Url> {
            None
        }
    }

    #[test]
    fn missing_instance_id_is_a_config_error() {
        let err = Sandbox::with_control_plane(
            SandboxConfig::new("", "secret"),
            Arc::new(NullControlPlane),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn missing_secret_is_a_config_error() {
        let err = Sandbox::with_control_plane(
            SandboxConfig::new("inst-1", "  "),
            Arc::new(NullControlPlane),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[tokio::test]
    async fn configured_endpoint_skips_the_control_plane() {
        let endpoint = Url::parse("https://sandbox.example.com").unwrap();
        let sandbox = Sandbox::with_control_plane(
            SandboxConfig::new("inst-1", "secret").endpoint(endpoint.clone()),
            Arc::new(NullControlPlane),
        )
        .unwrap();
        assert_eq!(sandbox.endpoint().await, Some(endpoint));
    }

    #[tokio::test]
    async fn unresolvable_endpoint_fails_commands_without_panicking() {
        let sandbox = Sandbox::with_control_plane(
            SandboxConfig::new("inst-1", "secret"),
            Arc::new(NullControlPlane),
        )
        .unwrap();

        let request = CommandRequest::new("echo hi").unwrap();
        let result = sandbox.exec(&request).await;
        assert_eq!(result.status, CommandStatus::Failed);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("Command execution failed"));
        assert!(result.stderr.contains("not resolvable"));
    }
}
