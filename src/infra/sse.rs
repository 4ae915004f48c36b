//! Server-sent events transport.
//!
//! `SseDecoder` turns raw body chunks into frames; `HttpEventSource` opens
//! the admin event stream over HTTP and feeds it through the decoder.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Url};
use serde_json::Value;
use storeops_api_types::StreamMessage;
use thiserror::Error;
use tracing::debug;

use crate::cache::realtime::{EventSource, EventStream};

#[derive(Debug, Error)]
pub enum SseError {
    #[error("failed to open event stream: {0}")]
    Connect(String),
    #[error("event stream rejected with status {status}")]
    Status { status: u16 },
    #[error("event stream transport error: {0}")]
    Transport(String),
}

/// One dispatched block of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Message(StreamMessage),
    /// A `:` comment line, sent by the server as a heartbeat.
    Comment(String),
    /// A `data:` payload that is not a valid stream message.
    Invalid { data: String, reason: String },
}

/// Incremental decoder for `text/event-stream` bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Feed a chunk and return every block it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((end, separator)) = block_end(&self.buffer) {
            let block = self.buffer.split_to(end + separator);
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Position and length of the first blank-line separator.
fn block_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|at| (at, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|at| (at, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (found, None) | (None, found) => found,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut data = Vec::new();
    let mut comments = Vec::new();
    let mut event = None;

    for line in block.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix(':') {
            comments.push(comment.trim());
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data.push(value),
            "event" => event = Some(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return (!comments.is_empty()).then(|| SseFrame::Comment(comments.join("\n")));
    }
    Some(decode_message(data.join("\n"), event))
}

/// The message type comes from the payload's `type`, or from the `event:`
/// field when the payload has none.
fn decode_message(data: String, event: Option<&str>) -> SseFrame {
    let mut value: Value = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(err) => {
            return SseFrame::Invalid {
                data,
                reason: err.to_string(),
            };
        }
    };
    if let (Value::Object(object), Some(event)) = (&mut value, event) {
        object
            .entry("type")
            .or_insert_with(|| Value::String(event.to_string()));
    }
    match serde_json::from_value::<StreamMessage>(value) {
        Ok(message) => SseFrame::Message(message),
        Err(err) => SseFrame::Invalid {
            data,
            reason: err.to_string(),
        },
    }
}

/// Event stream served by the admin backend.
#[derive(Clone, Debug)]
pub struct HttpEventSource {
    client: Client,
    url: Url,
    token: Option<String>,
}

impl HttpEventSource {
    pub fn new(client: Client, url: Url, token: Option<String>) -> Self {
        Self { client, url, token }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<EventStream, SseError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| SseError::Connect(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SseError::Status {
                status: status.as_u16(),
            });
        }
        debug!(url = %self.url, "Event stream opened");

        let mut body = response.bytes_stream();
        let stream = try_stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| SseError::Transport(err.to_string()))?;
                for frame in decoder.push(&chunk) {
                    yield frame;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_messages_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"type\":\"order_up").is_empty());
        let frames = decoder.push(b"date\",\"data\":{\"id\":\"o-1\"}}\n\n");

        assert_eq!(frames.len(), 1);
        let SseFrame::Message(message) = &frames[0] else {
            panic!("expected message, got {frames:?}");
        };
        assert_eq!(message.kind, "order_update");
        assert_eq!(message.data, Some(json!({"id": "o-1"})));
    }

    #[test]
    fn comments_are_heartbeats() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b": heartbeat\n\n");
        assert_eq!(frames, vec![SseFrame::Comment("heartbeat".to_string())]);
    }

    #[test]
    fn crlf_separators_and_multiline_data() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"data: {\"type\":\r\ndata: \"stats_update\"}\r\n\r\n");
        let [SseFrame::Message(message)] = frames.as_slice() else {
            panic!("expected one message, got {frames:?}");
        };
        assert_eq!(message.kind, "stats_update");
    }

    #[test]
    fn event_field_supplies_missing_type() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"event: connected\ndata: {\"data\":{\"message\":\"hi\"}}\n\n");
        let [SseFrame::Message(message)] = frames.as_slice() else {
            panic!("expected one message, got {frames:?}");
        };
        assert_eq!(message.kind, "connected");
    }

    #[test]
    fn malformed_payload_is_reported_not_fatal() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"data: not json\n\ndata: {\"type\":\"stats_update\"}\n\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], SseFrame::Invalid { .. }));
        assert!(matches!(frames[1], SseFrame::Message(_)));
    }

    #[test]
    fn field_only_blocks_are_skipped() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"retry: 3000\n\n").is_empty());
    }
}
