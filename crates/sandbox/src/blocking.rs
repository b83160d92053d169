//! Blocking adapter over the async sandbox.
//!
//! One logic path: this wraps [`crate::Sandbox`] and drives it on a private
//! current-thread runtime, or via `block_in_place` when the caller is
//! already inside a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::exec::{CommandRequest, CommandResult, OutputCallback};
use crate::fs::FsError;
use crate::readiness::{ControlPlane, InstanceStatus};
use crate::{SandboxConfig, SandboxError};

/// Blocking handle to one remote sandbox instance.
pub struct Sandbox {
    inner: crate::Sandbox,
    runtime: Runtime,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        Ok(Self {
            inner: crate::Sandbox::new(config)?,
            runtime: new_runtime()?,
        })
    }

    pub fn with_control_plane(
        config: SandboxConfig,
        control: Arc<dyn ControlPlane>,
    ) -> Result<Self, SandboxError> {
        Ok(Self {
            inner: crate::Sandbox::with_control_plane(config, control)?,
            runtime: new_runtime()?,
        })
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
        } else {
            self.runtime.block_on(fut)
        }
    }

    pub fn exec(&self, request: &CommandRequest) -> CommandResult {
        self.block_on(self.inner.exec(request))
    }

    pub fn exec_with_callbacks(
        &self,
        request: &CommandRequest,
        on_stdout: Option<OutputCallback<'_>>,
        on_stderr: Option<OutputCallback<'_>>,
    ) -> CommandResult {
        self.block_on(self.inner.exec_with_callbacks(request, on_stdout, on_stderr))
    }

    pub fn status(&self) -> InstanceStatus {
        self.block_on(self.inner.status())
    }

    pub fn is_ready(&self) -> bool {
        self.block_on(self.inner.is_ready())
    }

    pub fn wait_ready(&self, timeout: Duration, poll_interval: Duration) -> bool {
        self.block_on(self.inner.wait_ready(timeout, poll_interval))
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<(), FsError> {
        self.block_on(self.inner.fs().write_file(path, content))
    }

    pub fn read_file(&self, path: &str) -> Result<String, FsError> {
        self.block_on(self.inner.fs().read_file(path))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.block_on(self.inner.fs().list_dir(path))
    }

    pub fn upload(&self, local: impl AsRef<std::path::Path>, remote: &str) -> Result<(), FsError> {
        self.block_on(self.inner.fs().upload(local, remote))
    }

    pub fn download(&self, remote: &str, local: impl AsRef<std::path::Path>) -> Result<(), FsError> {
        self.block_on(self.inner.fs().download(remote, local))
    }

    /// Borrow the async handle, for callers mixing the two styles.
    pub fn as_async(&self) -> &crate::Sandbox {
        &self.inner
    }
}

fn new_runtime() -> Result<Runtime, SandboxError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| SandboxError::Config(format!("failed to build runtime: {err}")))
}
