//! Background process management inside the sandbox.

use executor_api_types::ProcessInfo;
use executor_client::TransportError;

use crate::{Sandbox, SandboxError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("process not found: {id}")]
    NotFound { id: String },
    #[error("process operation failed: {message}")]
    Failed { message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Process view of one sandbox. Borrowed from [`Sandbox::processes`].
pub struct SandboxProcesses<'a> {
    sandbox: &'a Sandbox,
}

impl<'a> SandboxProcesses<'a> {
    pub(crate) fn new(sandbox: &'a Sandbox) -> Self {
        Self { sandbox }
    }

    /// Launch a background process; returns its executor-assigned id.
    pub async fn launch(&self, cmd: &str) -> Result<String, ProcessError> {
        let response = self.sandbox.client().await?.launch_process(cmd).await?;
        match response.error {
            Some(message) => Err(ProcessError::Failed { message }),
            None => Ok(response.id),
        }
    }

    pub async fn list(&self) -> Result<Vec<ProcessInfo>, ProcessError> {
        let response = self.sandbox.client().await?.list_processes().await?;
        Ok(response.processes)
    }

    pub async fn kill(&self, id: &str) -> Result<(), ProcessError> {
        let response = self.sandbox.client().await?.kill_process(id).await?;
        if response.success {
            return Ok(());
        }
        match response.error {
            Some(message) if message.to_ascii_lowercase().contains("not found") => {
                Err(ProcessError::NotFound { id: id.to_string() })
            }
            Some(message) => Err(ProcessError::Failed { message }),
            None => Err(ProcessError::NotFound { id: id.to_string() }),
        }
    }

    /// Kill every tracked process; returns how many were killed.
    pub async fn kill_all(&self) -> Result<u32, ProcessError> {
        let response = self.sandbox.client().await?.kill_all_processes().await?;
        Ok(response.killed)
    }
}
