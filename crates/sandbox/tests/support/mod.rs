#![allow(dead_code)]

//! In-process executor stub shared by the sandbox integration tests.
//!
//! Commands are table-driven: tests stage `cmd text -> canned outcome`, and
//! both the buffered `/run` endpoint and the `/exec` websocket serve from
//! the same table, so the two transports can be compared.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router, Server};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use async_trait::async_trait;
use executor_api_types::{
    ExecClientBody, ExecClientFrame, KillProcessRequest, LaunchProcessRequest, PathRequest,
    ProcessInfo, RunRequest, RunResponse, WriteFileRequest,
};
use islet_sandbox::{ControlPlane, InstanceStatus, Sandbox, SandboxConfig};
use url::Url;

pub const STUB_SECRET: &str = "stub-secret";

/// Scriptable control plane for readiness tests.
pub struct StubControlPlane {
    status: Mutex<InstanceStatus>,
    endpoint: Mutex<Option<Url>>,
}

impl StubControlPlane {
    pub fn new(status: InstanceStatus, endpoint: Option<Url>) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            endpoint: Mutex::new(endpoint),
        })
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_endpoint(&self, endpoint: Url) {
        *self.endpoint.lock().unwrap() = Some(endpoint);
    }
}

#[async_trait]
impl ControlPlane for StubControlPlane {
    async fn instance_status(&self, _instance_id: &str) -> InstanceStatus {
        *self.status.lock().unwrap()
    }

    async fn resolve_endpoint(&self, _instance_id: &str) -> Option<Url> {
        self.endpoint.lock().unwrap().clone()
    }
}

/// A sandbox handle wired straight at the stub executor, with a healthy
/// control plane.
pub fn sandbox_for(stub: &StubExecutor) -> Sandbox {
    let control = StubControlPlane::new(InstanceStatus::Healthy, Some(stub.url()));
    Sandbox::with_control_plane(
        SandboxConfig::new("inst-1", STUB_SECRET).endpoint(stub.url()),
        control,
    )
    .expect("valid sandbox config")
}

#[derive(Clone, Default)]
pub struct Canned {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Send any output but never finish; the client's deadline has to fire.
    pub hang: bool,
}

#[derive(Default)]
struct StubState {
    health_status: Mutex<String>,
    health_hits: AtomicU32,
    commands: Mutex<HashMap<String, Canned>>,
    files: Mutex<HashMap<String, String>>,
    dirs: Mutex<Vec<String>>,
    processes: Mutex<Vec<ProcessInfo>>,
    next_process: AtomicU32,
}

#[derive(Clone)]
pub struct StubExecutor {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubExecutor {
    pub async fn spawn() -> Self {
        let state = Arc::new(StubState {
            health_status: Mutex::new("ok".to_string()),
            ..Default::default()
        });
        let router = Router::new()
            .route("/health", get(health))
            .route("/run", post(run))
            .route("/run_streaming", post(run_streaming))
            .route("/exec", get(exec_ws))
            .route("/write_file", post(write_file))
            .route("/read_file", post(read_file))
            .route("/delete_file", post(delete_file))
            .route("/make_dir", post(make_dir))
            .route("/delete_dir", post(delete_dir))
            .route("/list_dir", post(list_dir))
            .route("/launch_process", post(launch_process))
            .route("/list_processes", post(list_processes))
            .route("/kill_process", post(kill_process))
            .route("/kill_all_processes", post(kill_all))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        let std_listener = listener.into_std().expect("into_std listener");
        tokio::spawn(async move {
            let _ = Server::from_tcp(std_listener)
                .unwrap()
                .serve(router.into_make_service())
                .await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn set_health(&self, status: &str) {
        *self.state.health_status.lock().unwrap() = status.to_string();
    }

    pub fn health_hits(&self) -> u32 {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    pub fn stage(&self, cmd: &str, canned: Canned) {
        self.state
            .commands
            .lock()
            .unwrap()
            .insert(cmd.to_string(), canned);
    }

    pub fn stage_ok(&self, cmd: &str, stdout: &str) {
        self.stage(
            cmd,
            Canned {
                stdout: stdout.to_string(),
                ..Default::default()
            },
        );
    }
}

fn authorized(headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = format!("Bearer {STUB_SECRET}");
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn health(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    let status = state.health_status.lock().unwrap().clone();
    Ok(Json(serde_json::json!({"status": status})))
}

async fn run(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, StatusCode> {
    authorized(&headers)?;
    let canned = state
        .commands
        .lock()
        .unwrap()
        .get(&request.cmd)
        .cloned()
        .unwrap_or_else(|| Canned {
            stderr: format!("sh: {}: command not staged", request.cmd),
            exit_code: 127,
            ..Default::default()
        });
    if canned.hang {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
    }
    Ok(Json(RunResponse {
        stdout: canned.stdout,
        stderr: canned.stderr,
        exit_code: canned.exit_code,
    }))
}

async fn run_streaming(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Result<impl axum::response::IntoResponse, StatusCode> {
    authorized(&headers)?;
    let canned = state
        .commands
        .lock()
        .unwrap()
        .get(&request.cmd)
        .cloned()
        .unwrap_or_default();

    let mut body = String::new();
    if !canned.stdout.is_empty() {
        let event = serde_json::json!({"stream": "stdout", "data": canned.stdout});
        body.push_str(&format!("data: {event}\n\n"));
    }
    if !canned.stderr.is_empty() {
        let event = serde_json::json!({"stream": "stderr", "data": canned.stderr});
        body.push_str(&format!("data: {event}\n\n"));
    }
    let done = serde_json::json!({"code": canned.exit_code, "error": false});
    body.push_str(&format!("data: {done}\n\n"));

    Ok(([(header::CONTENT_TYPE, "text/event-stream")], body))
}

async fn exec_ws(
    State(state): State<Arc<StubState>>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| exec_session(state, socket))
}

async fn exec_session(state: Arc<StubState>, mut socket: WebSocket) {
    let script = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(frame) = serde_json::from_str::<ExecClientFrame>(&text) {
                    if let ExecClientBody::Command(argv) = frame.body {
                        // `sh -c <script>`: the script is the last element.
                        break argv.last().cloned().unwrap_or_default();
                    }
                }
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    };

    let canned = state.commands.lock().unwrap().get(&script).cloned();
    let Some(canned) = canned else {
        let error = serde_json::json!({"error": {"message": format!("unknown command: {script}")}});
        let _ = socket.send(Message::Text(error.to_string())).await;
        let _ = socket.close().await;
        return;
    };

    if !canned.stdout.is_empty() {
        let frame = serde_json::json!({
            "result": {"stdout": {"data": STANDARD.encode(&canned.stdout)}}
        });
        let _ = socket.send(Message::Text(frame.to_string())).await;
    }
    if !canned.stderr.is_empty() {
        let frame = serde_json::json!({
            "result": {"stderr": {"data": STANDARD.encode(&canned.stderr)}}
        });
        let _ = socket.send(Message::Text(frame.to_string())).await;
    }

    if canned.hang {
        // Leave the session open; the client's deadline has to cut it.
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        return;
    }

    let exit = serde_json::json!({
        "result": {"exit_code": canned.exit_code, "exited": true}
    });
    let _ = socket.send(Message::Text(exit.to_string())).await;
    let _ = socket.close().await;
}

async fn write_file(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<WriteFileRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    state
        .files
        .lock()
        .unwrap()
        .insert(request.path, request.content);
    Ok(Json(serde_json::json!({"success": true})))
}

async fn read_file(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    match state.files.lock().unwrap().get(&request.path) {
        Some(content) => Ok(Json(serde_json::json!({"content": content}))),
        None => Ok(Json(
            serde_json::json!({"content": "", "error": "File not found"}),
        )),
    }
}

async fn delete_file(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    match state.files.lock().unwrap().remove(&request.path) {
        Some(_) => Ok(Json(serde_json::json!({"success": true}))),
        None => Ok(Json(
            serde_json::json!({"success": false, "error": "File not found"}),
        )),
    }
}

async fn make_dir(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let mut dirs = state.dirs.lock().unwrap();
    if dirs.contains(&request.path) {
        return Ok(Json(
            serde_json::json!({"success": false, "error": "Directory already exists"}),
        ));
    }
    dirs.push(request.path);
    Ok(Json(serde_json::json!({"success": true})))
}

async fn delete_dir(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let mut dirs = state.dirs.lock().unwrap();
    match dirs.iter().position(|dir| dir == &request.path) {
        Some(index) => {
            dirs.remove(index);
            Ok(Json(serde_json::json!({"success": true})))
        }
        None => Ok(Json(
            serde_json::json!({"success": false, "error": "Directory not found"}),
        )),
    }
}

async fn list_dir(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<PathRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let dirs = state.dirs.lock().unwrap();
    let files = state.files.lock().unwrap();
    let prefix = format!("{}/", request.path.trim_end_matches('/'));
    let mut entries: Vec<String> = files
        .keys()
        .filter_map(|path| path.strip_prefix(&prefix))
        .filter(|rest| !rest.contains('/'))
        .map(|rest| rest.to_string())
        .collect();
    if entries.is_empty() && !dirs.contains(&request.path) {
        return Ok(Json(
            serde_json::json!({"entries": [], "error": "Directory not found"}),
        ));
    }
    entries.sort();
    Ok(Json(serde_json::json!({"entries": entries})))
}

async fn launch_process(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<LaunchProcessRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let id = format!("proc-{}", state.next_process.fetch_add(1, Ordering::SeqCst) + 1);
    state.processes.lock().unwrap().push(ProcessInfo {
        id: id.clone(),
        command: request.cmd,
        status: "running".to_string(),
        pid: Some(4242),
    });
    Ok(Json(serde_json::json!({"id": id})))
}

async fn list_processes(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let processes = state.processes.lock().unwrap().clone();
    Ok(Json(serde_json::json!({ "processes": processes })))
}

async fn kill_process(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(request): Json<KillProcessRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let mut processes = state.processes.lock().unwrap();
    match processes.iter().position(|process| process.id == request.id) {
        Some(index) => {
            processes.remove(index);
            Ok(Json(serde_json::json!({"success": true})))
        }
        None => Ok(Json(
            serde_json::json!({"success": false, "error": "Process not found"}),
        )),
    }
}

async fn kill_all(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorized(&headers)?;
    let mut processes = state.processes.lock().unwrap();
    let killed = processes.len() as u32;
    processes.clear();
    Ok(Json(serde_json::json!({ "killed": killed })))
}
