//! Control-plane view of an instance.
//!
//! Readiness is a conjunction: the control plane must report the instance
//! healthy AND the executor's own health endpoint must answer with a healthy
//! token. The conjunction itself lives on [`crate::Sandbox`]; this module
//! holds the control-plane side.

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{header, Method, Request};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use url::Url;

/// Instance status as the control plane reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Healthy,
    Starting,
    Stopping,
    Stopped,
    Error,
    Unknown,
}

impl InstanceStatus {
    /// Map a control-plane status string. Unrecognized values are `Unknown`,
    /// which is treated as not ready, never as an error.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "starting" | "allocating" => Self::Starting,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// The two lookups the readiness gate needs from the control plane.
///
/// Provisioning is out of scope; this trait is the whole control-plane
/// surface, so tests can stub it.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current status of the instance. Lookup failures report `Error`.
    async fn instance_status(&self, instance_id: &str) -> InstanceStatus;

    /// Public endpoint of the instance's executor, once one exists. `None`
    /// means "not resolvable yet", which is normal early in boot.
    async fn resolve_endpoint(&self, instance_id: &str) -> Option<Url>;
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: InstancePayload,
}

#[derive(Debug, Deserialize)]
struct InstancePayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    domain: Option<String>,
}

/// Control plane over its REST API: `GET {api}/v1/instances/{id}`.
pub struct RestControlPlane {
    api_url: Url,
    token: String,
    http: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
}

impl RestControlPlane {
    pub fn new(api_url: Url, token: impl Into<String>) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let http = Client::builder(TokioExecutor::new()).build(https);
        Self {
            api_url,
            token: token.into(),
            http,
        }
    }

    async fn fetch_instance(&self, instance_id: &str) -> Option<InstancePayload> {
        let base = self.api_url.as_str().trim_end_matches('/');
        let uri: hyper::Uri = format!("{base}/v1/instances/{instance_id}").parse().ok()?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .body(Empty::new())
            .ok()?;

        let response = self.http.request(request).await.ok()?;
        if !response.status().is_success() {
            tracing::debug!(
                instance_id,
                status = response.status().as_u16(),
                "instance lookup failed"
            );
            return None;
        }
        let bytes = response.into_body().collect().await.ok()?.to_bytes();
        let envelope: InstanceEnvelope = serde_json::from_slice(&bytes).ok()?;
        Some(envelope.instance)
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn instance_status(&self, instance_id: &str) -> InstanceStatus {
        match self.fetch_instance(instance_id).await {
            Some(instance) => InstanceStatus::parse(&instance.status),
            None => InstanceStatus::Error,
        }
    }

    async fn resolve_endpoint(&self, instance_id: &str) -> Option<Url> {
        let instance = self.fetch_instance(instance_id).await?;
        let domain = instance.domain?;
        Url::parse(&format!("https://{domain}")).ok()
    }
}
