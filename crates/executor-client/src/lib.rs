//! Client for the sandbox executor API.
//!
//! The executor is the process running inside a sandbox instance that
//! actually executes commands and file operations. This crate speaks its two
//! transports: buffered HTTP verbs (with bounded retry on 503) and the
//! persistent websocket exec protocol for incremental output.

use executor_api_types::{
    HealthResponse, KillAllResponse, KillProcessRequest, LaunchProcessRequest,
    LaunchProcessResponse, ListDirResponse, ListProcessesResponse, OpResponse, PathRequest,
    PortRequest, ReadFileResponse, RunRequest, RunResponse, RunStreamEvent, WriteFileRequest,
};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

pub mod retry;
pub mod session;
mod sse;

pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
pub use session::{
    ExecSession, OutputAccumulator, OutputSink, SessionEnd, SessionError, SessionEvent,
};

/// Errors surfaced by the buffered transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP 503. The only class the retry loop consumes.
    #[error("executor unavailable (HTTP 503): {body}")]
    Unavailable { body: String },
    #[error("executor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to executor failed: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read executor response: {0}")]
    Body(#[from] hyper::Error),
    #[error("failed to build request: {0}")]
    Http(#[from] hyper::http::Error),
    #[error("failed to decode executor response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid executor endpoint: {0}")]
    Endpoint(String),
    #[error("event stream error: {0}")]
    Stream(String),
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Client bound to one executor endpoint, authenticating every request with
/// the instance secret. Cheap to clone; the hyper client is shared.
#[derive(Clone)]
pub struct ExecutorClient {
    base_url: Url,
    secret: String,
    retry: RetryPolicy,
    http: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl ExecutorClient {
    /// Create a client with the default retry policy.
    pub fn new(base_url: Url, secret: impl Into<String>) -> Self {
        Self::with_retry_policy(base_url, secret, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        base_url: Url,
        secret: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let http = Client::builder(TokioExecutor::new()).build(https);

        Self {
            base_url,
            secret: secret.into(),
            retry,
            http,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Websocket target for the persistent exec connection, derived from the
    /// base URL (`https` becomes `wss`, `http` becomes `ws`).
    pub fn exec_socket_url(&self) -> Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/exec"))
            .map_err(|err| TransportError::Endpoint(err.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Endpoint(format!("cannot derive socket scheme for {url}")))?;
        Ok(url)
    }

    /// Open an exec session for the given instance over this client's
    /// endpoint and secret.
    pub async fn open_session(&self, instance_id: &str) -> Result<ExecSession, SessionError> {
        let target = self
            .exec_socket_url()
            .map_err(|err| SessionError::Target(err.to_string()))?;
        ExecSession::open(&target, instance_id, &self.secret).await
    }

    /// Probe `/health`. Deliberately unretried: readiness polling needs the
    /// instant answer, not one smoothed over by backoff.
    pub async fn health(&self) -> Result<HealthResponse, TransportError> {
        let bytes = self.send_checked(Method::GET, "health", None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether the executor is reachable and reporting a healthy status.
    pub async fn is_healthy(&self) -> bool {
        matches!(self.health().await, Ok(resp) if resp.is_healthy())
    }

    /// Execute a command buffered: one request, one response with the whole
    /// output.
    pub async fn run(&self, request: &RunRequest) -> Result<RunResponse, TransportError> {
        self.post_json("run", request).await
    }

    /// Execute a command over the SSE endpoint, yielding decoded events as
    /// they arrive. No retry: replaying a partially-executed command is not
    /// safe.
    pub async fn run_streaming(
        &self,
        request: &RunRequest,
    ) -> Result<BoxStream<'static, Result<RunStreamEvent, TransportError>>, TransportError> {
        let payload = serde_json::to_vec(request)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint("run_streaming")?)
            .header(header::AUTHORIZATION, self.bearer())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .body(Full::new(Bytes::from(payload)))?;

        let response = self.http.request(request).await?;
        let status = response.status();
        if !status.is_success() {
            let bytes = response.into_body().collect().await?.to_bytes();
            return Err(status_error(status, &bytes));
        }

        Ok(sse::decode_events(response.into_body()).boxed())
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<OpResponse, TransportError> {
        self.post_json(
            "write_file",
            &WriteFileRequest {
                path: path.to_string(),
                content: content.to_string(),
            },
        )
        .await
    }

    pub async fn read_file(&self, path: &str) -> Result<ReadFileResponse, TransportError> {
        self.post_json("read_file", &path_request(path)).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<OpResponse, TransportError> {
        self.post_json("delete_file", &path_request(path)).await
    }

    pub async fn make_dir(&self, path: &str) -> Result<OpResponse, TransportError> {
        self.post_json("make_dir", &path_request(path)).await
    }

    pub async fn delete_dir(&self, path: &str) -> Result<OpResponse, TransportError> {
        self.post_json("delete_dir", &path_request(path)).await
    }

    pub async fn list_dir(&self, path: &str) -> Result<ListDirResponse, TransportError> {
        self.post_json("list_dir", &path_request(path)).await
    }

    pub async fn launch_process(&self, cmd: &str) -> Result<LaunchProcessResponse, TransportError> {
        self.post_json(
            "launch_process",
            &LaunchProcessRequest {
                cmd: cmd.to_string(),
            },
        )
        .await
    }

    pub async fn list_processes(&self) -> Result<ListProcessesResponse, TransportError> {
        self.post_json("list_processes", &serde_json::json!({})).await
    }

    pub async fn kill_process(&self, id: &str) -> Result<OpResponse, TransportError> {
        self.post_json("kill_process", &KillProcessRequest { id: id.to_string() })
            .await
    }

    pub async fn kill_all_processes(&self) -> Result<KillAllResponse, TransportError> {
        self.post_json("kill_all_processes", &serde_json::json!({}))
            .await
    }

    pub async fn bind_port(&self, port: u16) -> Result<OpResponse, TransportError> {
        self.post_json("bind_port", &PortRequest::bind(port)).await
    }

    pub async fn unbind_port(&self, port: Option<u16>) -> Result<OpResponse, TransportError> {
        self.post_json("unbind_port", &PortRequest::unbind(port))
            .await
    }

    /// POST a JSON body and decode a JSON response, retrying 503s per the
    /// policy.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, TransportError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let bytes = retry_with_backoff(&self.retry, || {
            self.send_checked(Method::POST, path, Some(payload.clone()))
        })
        .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send_checked(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, TransportError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(self.endpoint(path)?)
            .header(header::AUTHORIZATION, self.bearer());
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder.body(Full::new(Bytes::from(body.unwrap_or_default())))?;

        let response = self.http.request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();

        if status.is_success() {
            Ok(bytes)
        } else {
            Err(status_error(status, &bytes))
        }
    }

    fn endpoint(&self, path: &str) -> Result<hyper::Uri, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{path}")
            .parse()
            .map_err(|err| TransportError::Endpoint(format!("{err}")))
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }
}

fn path_request(path: &str) -> PathRequest {
    PathRequest {
        path: path.to_string(),
    }
}

fn status_error(status: StatusCode, bytes: &[u8]) -> TransportError {
    let body = String::from_utf8_lossy(bytes).into_owned();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        TransportError::Unavailable { body }
    } else {
        TransportError::Status {
            status: status.as_u16(),
            body,
        }
    }
}
