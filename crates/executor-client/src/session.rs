//! Persistent exec connection to the sandbox executor.
//!
//! One session runs one command: send a `command` frame, optionally feed
//! `stdin` chunks, then pump `result`/`error` frames until the executor marks
//! the command exited or closes the connection. Frame shapes live in
//! `executor-api-types`.

use std::collections::VecDeque;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use executor_api_types::{
    ExecClientBody, ExecClientFrame, ExecResultFrame, ExecServerFrame, OutputStream, StdinChunk,
    StreamPayload,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Socket-level failures that make the session unusable.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("websocket send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("websocket receive failed: {0}")]
    Receive(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode exec frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid exec target: {0}")]
    Target(String),
}

/// One decoded unit from the exec connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A chunk of process output, base64-decoded to text.
    Output { stream: OutputStream, text: String },
    /// The process reported an exit code; terminal only when `exited` is set.
    Exit { code: Option<i32>, exited: bool },
    /// The executor reported a failure; the command is dead.
    ServerError { message: String },
    /// A frame that could not be decoded. The session stays usable.
    Malformed { detail: String },
}

/// How a fully-pumped session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// A frame carried `exited = true`.
    Exited { code: i32 },
    /// The connection closed without an explicit exit marker. The last exit
    /// code seen stands, defaulting to zero.
    Closed { code: i32 },
    /// The executor sent an error frame.
    Failed { message: String },
}

impl SessionEnd {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } | Self::Closed { code } => *code,
            Self::Failed { .. } => 1,
        }
    }
}

/// Output gathered while driving a session.
///
/// Owned by the caller rather than the drive future, so a deadline that
/// cancels the drive cannot destroy output that already arrived.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    pub stdout: String,
    pub stderr: String,
}

/// Callback invoked with each decoded output chunk, in arrival order.
pub type OutputSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A live exec connection bound to one instance.
pub struct ExecSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    instance_id: String,
    pending: VecDeque<SessionEvent>,
}

impl ExecSession {
    /// Connect and authenticate the websocket handshake with the instance
    /// secret.
    pub async fn open(target: &Url, instance_id: &str, secret: &str) -> Result<Self, SessionError> {
        let mut request = target
            .as_str()
            .into_client_request()
            .map_err(SessionError::Handshake)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {secret}"))
            .map_err(|_| SessionError::Target("secret is not header-safe".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _response) = connect_async(request).await.map_err(SessionError::Handshake)?;
        tracing::debug!(%target, instance_id, "exec session open");

        Ok(Self {
            ws,
            instance_id: instance_id.to_string(),
            pending: VecDeque::new(),
        })
    }

    /// Start the command. The argv travels structurally; no quoting layer is
    /// added here.
    pub async fn send_command(&mut self, argv: &[String]) -> Result<(), SessionError> {
        let frame = ExecClientFrame {
            id: self.instance_id.clone(),
            body: ExecClientBody::Command(argv.to_vec()),
        };
        self.send_frame(&frame).await
    }

    /// Deliver a chunk of standard input; `close` marks end-of-input.
    pub async fn send_input(&mut self, data: &[u8], close: bool) -> Result<(), SessionError> {
        let frame = ExecClientFrame {
            id: self.instance_id.clone(),
            body: ExecClientBody::Stdin(StdinChunk {
                data: STANDARD.encode(data),
                close,
            }),
        };
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &ExecClientFrame) -> Result<(), SessionError> {
        let text = serde_json::to_string(frame)?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(SessionError::Send)
    }

    /// Next decoded event, or `None` once the connection has closed.
    ///
    /// A composite `result` frame is split into its output events followed by
    /// its exit event, so callers always observe output before the exit
    /// signal it arrived with.
    pub async fn receive(&mut self) -> Result<Option<SessionEvent>, SessionError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let message = match self.ws.next().await {
                Some(message) => message.map_err(SessionError::Receive)?,
                None => return Ok(None),
            };

            match message {
                Message::Text(text) => self.pending.extend(events_from_frame(text.as_bytes())),
                Message::Binary(bytes) => self.pending.extend(events_from_frame(&bytes)),
                Message::Ping(payload) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .map_err(SessionError::Send)?;
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => return Ok(None),
            }
        }
    }

    /// Pump the session to completion.
    ///
    /// Every output chunk is appended to `acc` and forwarded to the matching
    /// callback before the next frame is processed. An exit code alone is
    /// remembered but never terminates the pump; only `exited = true` or the
    /// connection closing does. Malformed frames were already logged during
    /// decode and are skipped.
    pub async fn drive(
        &mut self,
        acc: &mut OutputAccumulator,
        mut on_stdout: Option<OutputSink<'_>>,
        mut on_stderr: Option<OutputSink<'_>>,
    ) -> Result<SessionEnd, SessionError> {
        let mut last_exit: Option<i32> = None;

        loop {
            match self.receive().await? {
                Some(SessionEvent::Output { stream, text }) => match stream {
                    OutputStream::Stdout => {
                        acc.stdout.push_str(&text);
                        if let Some(sink) = &mut on_stdout {
                            sink(&text);
                        }
                    }
                    OutputStream::Stderr => {
                        acc.stderr.push_str(&text);
                        if let Some(sink) = &mut on_stderr {
                            sink(&text);
                        }
                    }
                },
                Some(SessionEvent::Exit { code, exited }) => {
                    if let Some(code) = code {
                        last_exit = Some(code);
                    }
                    if exited {
                        return Ok(SessionEnd::Exited {
                            code: last_exit.unwrap_or(0),
                        });
                    }
                }
                Some(SessionEvent::ServerError { message }) => {
                    return Ok(SessionEnd::Failed { message });
                }
                Some(SessionEvent::Malformed { .. }) => {}
                None => {
                    return Ok(SessionEnd::Closed {
                        code: last_exit.unwrap_or(0),
                    });
                }
            }
        }
    }

    /// Close the connection politely. Dropping the session works too; this
    /// just lets the executor skip its dead-peer timeout.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Decode one raw frame into session events.
fn events_from_frame(raw: &[u8]) -> Vec<SessionEvent> {
    match serde_json::from_slice::<ExecServerFrame>(raw) {
        Ok(ExecServerFrame::Result(result)) => events_from_result(result),
        Ok(ExecServerFrame::Error(error)) => vec![SessionEvent::ServerError {
            message: error.message,
        }],
        Err(err) => {
            let detail = format!("{err}: {}", String::from_utf8_lossy(raw));
            tracing::warn!(error = %err, "skipping undecodable exec frame");
            vec![SessionEvent::Malformed { detail }]
        }
    }
}

fn events_from_result(result: ExecResultFrame) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    if let Some(payload) = result.stdout {
        events.push(SessionEvent::Output {
            stream: OutputStream::Stdout,
            text: decode_payload(&payload),
        });
    }
    if let Some(payload) = result.stderr {
        events.push(SessionEvent::Output {
            stream: OutputStream::Stderr,
            text: decode_payload(&payload),
        });
    }
    if result.exit_code.is_some() || result.exited {
        events.push(SessionEvent::Exit {
            code: result.exit_code,
            exited: result.exited,
        });
    }
    events
}

/// Payloads are base64; one that fails to decode is passed through raw
/// rather than dropped.
fn decode_payload(payload: &StreamPayload) -> String {
    let bytes = STANDARD
        .decode(payload.data.as_bytes())
        .unwrap_or_else(|_| payload.data.clone().into_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}
