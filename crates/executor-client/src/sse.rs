//! Decoding for the `/run_streaming` server-sent event stream.

use eventsource_stream::Eventsource;
use executor_api_types::RunStreamEvent;
use futures_util::{Stream, StreamExt};
use http_body_util::BodyStream;
use hyper::body::Incoming;

use crate::TransportError;

/// Turn a streaming response body into decoded run events.
pub(crate) fn decode_events(
    body: Incoming,
) -> impl Stream<Item = Result<RunStreamEvent, TransportError>> {
    let bytes = BodyStream::new(body).filter_map(|frame| async move {
        match frame {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(err) => Some(Err(err)),
        }
    });

    bytes.eventsource().map(|event| match event {
        Ok(event) => Ok(decode_data(&event.data)),
        Err(err) => Err(TransportError::Stream(err.to_string())),
    })
}

/// An undecodable payload becomes an error event carrying the raw text, so
/// one garbled line cannot kill the whole iterator.
fn decode_data(data: &str) -> RunStreamEvent {
    serde_json::from_str(data).unwrap_or_else(|_| RunStreamEvent::Error {
        error: format!("failed to parse event data: {data}"),
    })
}
