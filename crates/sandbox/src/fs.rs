//! Filesystem operations inside the sandbox.
//!
//! Thin glue: the content verbs go straight to executor endpoints; the
//! predicates and rename/remove shell out through the Command Executor with
//! quoted paths.

use std::path::Path;

use executor_client::TransportError;

use crate::command::shell_quote;
use crate::exec::CommandRequest;
use crate::{Sandbox, SandboxError};

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("already exists: {path}")]
    AlreadyExists { path: String },
    #[error("directory not empty: {path}")]
    NotEmpty { path: String },
    #[error("filesystem operation failed: {message}")]
    Failed { message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classify an executor-reported error message the way its text spells it.
fn classify(path: &str, message: String) -> FsError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("not found") || lowered.contains("no such file") {
        FsError::NotFound {
            path: path.to_string(),
        }
    } else if lowered.contains("not empty") {
        FsError::NotEmpty {
            path: path.to_string(),
        }
    } else if lowered.contains("exists") {
        FsError::AlreadyExists {
            path: path.to_string(),
        }
    } else {
        FsError::Failed { message }
    }
}

/// Filesystem view of one sandbox. Borrowed from [`Sandbox::fs`].
pub struct SandboxFs<'a> {
    sandbox: &'a Sandbox,
}

impl<'a> SandboxFs<'a> {
    pub(crate) fn new(sandbox: &'a Sandbox) -> Self {
        Self { sandbox }
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), FsError> {
        let response = self.sandbox.client().await?.write_file(path, content).await?;
        match response.error {
            Some(message) if !response.success => Err(classify(path, message)),
            _ => Ok(()),
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let response = self.sandbox.client().await?.read_file(path).await?;
        match response.error {
            Some(message) => Err(classify(path, message)),
            None => Ok(response.content),
        }
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), FsError> {
        let response = self.sandbox.client().await?.delete_file(path).await?;
        match response.error {
            Some(message) if !response.success => Err(classify(path, message)),
            _ => Ok(()),
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let response = self.sandbox.client().await?.make_dir(path).await?;
        match response.error {
            Some(message) if !response.success => Err(classify(path, message)),
            _ => Ok(()),
        }
    }

    pub async fn delete_dir(&self, path: &str) -> Result<(), FsError> {
        let response = self.sandbox.client().await?.delete_dir(path).await?;
        match response.error {
            Some(message) if !response.success => Err(classify(path, message)),
            _ => Ok(()),
        }
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let response = self.sandbox.client().await?.list_dir(path).await?;
        match response.error {
            Some(message) => Err(classify(path, message)),
            None => Ok(response.entries),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool, FsError> {
        self.test_path("-e", path).await
    }

    pub async fn is_file(&self, path: &str) -> Result<bool, FsError> {
        self.test_path("-f", path).await
    }

    pub async fn is_dir(&self, path: &str) -> Result<bool, FsError> {
        self.test_path("-d", path).await
    }

    /// Rename (or move) via `mv`; the executor has no native rename verb.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let command = format!("mv {} {}", shell_quote(from), shell_quote(to));
        let result = self.sandbox.exec_text(&command).await?;
        if result.success() {
            Ok(())
        } else {
            Err(classify(from, result.stderr))
        }
    }

    /// Remove a path via `rm -rf`.
    pub async fn remove(&self, path: &str) -> Result<(), FsError> {
        let command = format!("rm -rf {}", shell_quote(path));
        let result = self.sandbox.exec_text(&command).await?;
        if result.success() {
            Ok(())
        } else {
            Err(classify(path, result.stderr))
        }
    }

    /// Copy a local file into the sandbox.
    pub async fn upload(&self, local: impl AsRef<Path>, remote: &str) -> Result<(), FsError> {
        let content = tokio::fs::read_to_string(local).await?;
        self.write_file(remote, &content).await
    }

    /// Copy a sandbox file to the local filesystem.
    pub async fn download(&self, remote: &str, local: impl AsRef<Path>) -> Result<(), FsError> {
        let content = self.read_file(remote).await?;
        tokio::fs::write(local, content).await?;
        Ok(())
    }

    async fn test_path(&self, flag: &str, path: &str) -> Result<bool, FsError> {
        let command = format!("test {flag} {}", shell_quote(path));
        let result = self.sandbox.exec_text(&command).await?;
        Ok(result.success())
    }
}

impl Sandbox {
    /// Run a pre-quoted command line buffered, for the fs/process glue.
    pub(crate) async fn exec_text(
        &self,
        command: &str,
    ) -> Result<crate::exec::CommandResult, SandboxError> {
        let request =
            CommandRequest::new(command).map_err(|err| SandboxError::Config(err.to_string()))?;
        Ok(self.exec(&request).await)
    }
}
