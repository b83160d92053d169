//! Shared request/response models for the sandbox executor API.
//!
//! Covers the buffered `/run` endpoint, the `/run_streaming` SSE events, the
//! persistent exec connection frames, and the file/directory/process/port
//! verbs. Payload bytes on the exec connection travel base64-encoded; these
//! types carry the encoded strings and leave decoding to the client.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Status strings the health endpoint may report while counting as healthy.
pub const HEALTHY_STATUSES: &[&str] = &["ok", "healthy", "ready"];

/// Response from `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    /// Whether the reported status is one of the recognized healthy tokens.
    /// Comparison is case-insensitive; unknown tokens are unhealthy.
    pub fn is_healthy(&self) -> bool {
        let status = self.status.trim().to_ascii_lowercase();
        HEALTHY_STATUSES.contains(&status.as_str())
    }
}

/// Request body for `POST /run` and `POST /run_streaming`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

impl RunRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: None,
            env: None,
        }
    }
}

/// Response body from `POST /run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
}

/// Which output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded event from the `/run_streaming` SSE stream.
///
/// The wire discriminates by key presence rather than a tag field:
/// `{"stream": ..., "data": ...}` while output is flowing,
/// `{"code": ..., "error": false}` on completion, and `{"error": "..."}`
/// when the command could not be started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunStreamEvent {
    Output { stream: OutputStream, data: String },
    Completed {
        code: i32,
        #[serde(default)]
        error: bool,
    },
    Error { error: String },
}

/// Outbound frame on the persistent exec connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecClientFrame {
    /// Instance identifier the far end routes by.
    pub id: String,
    pub body: ExecClientBody,
}

/// Body of an outbound exec frame: `{"command": [...]}` starts a command,
/// `{"stdin": {...}}` delivers input to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecClientBody {
    Command(Vec<String>),
    Stdin(StdinChunk),
}

/// A chunk of standard input, base64-encoded. `close` marks end-of-input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdinChunk {
    pub data: String,
    #[serde(default)]
    pub close: bool,
}

/// Inbound frame on the persistent exec connection: either incremental
/// command state or a server-reported error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecServerFrame {
    Result(ExecResultFrame),
    Error(ExecErrorFrame),
}

/// Incremental command state. A single frame may carry output for both
/// streams plus the exit signal; `exited` is the only terminal marker.
/// An `exit_code` without `exited` means output may still follow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResultFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<StreamPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StreamPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub exited: bool,
}

/// Base64-encoded bytes for one output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPayload {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecErrorFrame {
    pub message: String,
}

/// Request body for `POST /write_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

/// Request body for the single-path verbs (`/read_file`, `/delete_file`,
/// `/make_dir`, `/delete_dir`, `/list_dir`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

/// Response from verbs that only report success or an error message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response from `POST /read_file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadFileResponse {
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response from `POST /list_dir`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDirResponse {
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for `POST /launch_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchProcessRequest {
    pub cmd: String,
}

/// Response from `POST /launch_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchProcessResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry from `POST /list_processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub command: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListProcessesResponse {
    #[serde(default)]
    pub processes: Vec<ProcessInfo>,
}

/// Request body for `POST /kill_process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillProcessRequest {
    pub id: String,
}

/// Response from `POST /kill_all_processes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillAllResponse {
    #[serde(default)]
    pub killed: u32,
}

/// Request body for `POST /bind_port` and `POST /unbind_port`. The proxy
/// protocol carries the port as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl PortRequest {
    pub fn bind(port: u16) -> Self {
        Self {
            port: Some(port.to_string()),
        }
    }

    pub fn unbind(port: Option<u16>) -> Self {
        Self {
            port: port.map(|p| p.to_string()),
        }
    }
}
