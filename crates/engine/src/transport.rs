//! Transport seam between the engine and the network.
//!
//! The engine never opens sockets itself. Everything that talks to a provider
//! goes through [`Transport`], which lets tests drive the job driver with an
//! in-memory fake and lets the CLI plug in [`HttpTransport`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use indexmap::IndexMap;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::request::PreparedRequest;

/// A stream of decoded lines from a streaming response body.
pub type LineStream = BoxStream<'static, Result<String, EngineError>>;

/// The request triple handed to the transport, plus its deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// A body-less GET, used for status, result and key-probe calls.
    pub fn get(url: impl Into<String>, headers: IndexMap<String, String>, timeout: Duration) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers,
            body: None,
            timeout,
        }
    }

    pub fn from_prepared(prepared: &PreparedRequest, timeout: Duration) -> Self {
        Self {
            method: prepared.method.clone(),
            url: prepared.url.clone(),
            headers: prepared.headers.clone(),
            body: Some(prepared.body.clone()),
            timeout,
        }
    }
}

/// A fully buffered provider response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Convenience constructor for JSON bodies.
    pub fn json(status: u16, body: &Value) -> Self {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body: body.to_string().into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    /// Parses the body as JSON, or `None` when it is not JSON.
    pub fn parse_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is consumed line by line.
pub struct StreamResponse {
    pub status: u16,
    pub lines: LineStream,
}

impl StreamResponse {
    /// Builds a stream response over already-known lines.
    pub fn from_lines<I, S>(status: u16, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<Result<String, EngineError>> = lines.into_iter().map(|line| Ok(line.into())).collect();
        Self {
            status,
            lines: stream::iter(lines).boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse").field("status", &self.status).finish_non_exhaustive()
    }
}

/// Executes requests on behalf of the engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and buffers the whole response body.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, EngineError>;

    /// Sends a request and exposes the response body as a line stream.
    ///
    /// `request.timeout` bounds the wait for response headers and, once the
    /// body is flowing, every wait for the next chunk.
    async fn open_stream(&self, request: TransportRequest) -> Result<StreamResponse, EngineError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: &TransportRequest) -> Result<reqwest::RequestBuilder, EngineError> {
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|error| EngineError::transport(format!("invalid HTTP method '{}': {error}", request.method)))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, EngineError> {
        debug!(method = %request.method, url = %request.url, "sending provider request");
        let response = self
            .builder(&request)?
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|error| map_reqwest_error(&request, error))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|error| map_reqwest_error(&request, error))?
            .to_vec();
        debug!(url = %request.url, status, bytes = body.len(), "provider responded");
        Ok(TransportResponse { status, headers, body })
    }

    async fn open_stream(&self, request: TransportRequest) -> Result<StreamResponse, EngineError> {
        debug!(method = %request.method, url = %request.url, "opening provider stream");
        let pending = self.builder(&request)?.send();
        let response = tokio::time::timeout(request.timeout, pending)
            .await
            .map_err(|_| EngineError::timeout(format!("{} {}", request.method, request.url), duration_ms(request.timeout)))?
            .map_err(|error| map_reqwest_error(&request, error))?;

        let status = response.status().as_u16();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(|error| EngineError::transport(error.to_string())));
        Ok(StreamResponse {
            status,
            lines: lines_from_chunks(chunks, request.timeout),
        })
    }
}

/// Reassembles arbitrary byte chunks into lines.
///
/// Lines end at `\n` with an optional preceding `\r`. A trailing unterminated
/// line is emitted when the chunk stream ends. A chunk error, or no chunk
/// arriving within `idle_timeout`, is forwarded once and ends the line stream.
pub fn lines_from_chunks<S>(chunks: S, idle_timeout: Duration) -> LineStream
where
    S: Stream<Item = Result<Vec<u8>, EngineError>> + Send + 'static,
{
    struct LineState {
        chunks: Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>,
        buf: Vec<u8>,
        finished: bool,
    }

    let state = LineState {
        chunks: Box::pin(chunks),
        buf: Vec::new(),
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(end) = state.buf.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=end).collect();
                return Some((Ok(decode_line(&line)), state));
            }
            if state.finished {
                if state.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut state.buf);
                return Some((Ok(decode_line(&line)), state));
            }
            let Ok(next) = tokio::time::timeout(idle_timeout, state.chunks.next()).await else {
                warn!(idle_ms = duration_ms(idle_timeout), "provider stream stalled");
                state.finished = true;
                state.buf.clear();
                return Some((Err(EngineError::timeout("stream read", duration_ms(idle_timeout))), state));
            };
            match next {
                Some(Ok(bytes)) => state.buf.extend_from_slice(&bytes),
                Some(Err(error)) => {
                    state.finished = true;
                    state.buf.clear();
                    return Some((Err(error), state));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> IndexMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_ascii_lowercase(), value.to_string())))
        .collect()
}

fn map_reqwest_error(request: &TransportRequest, error: reqwest::Error) -> EngineError {
    if error.is_timeout() {
        EngineError::timeout(format!("{} {}", request.method, request.url), duration_ms(request.timeout))
    } else {
        EngineError::transport(error.to_string())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const IDLE: Duration = Duration::from_secs(5);

    fn chunks(parts: &[&str]) -> Vec<Result<Vec<u8>, EngineError>> {
        parts.iter().map(|part| Ok(part.as_bytes().to_vec())).collect()
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let lines: Vec<_> = lines_from_chunks(stream::iter(chunks(&["data: {\"a\"", ":1}\r\n\r\nda", "ta: [DONE]"])), IDLE)
            .collect()
            .await;

        let lines: Vec<String> = lines.into_iter().map(|line| line.expect("line")).collect();
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn chunk_errors_end_the_stream() {
        let mut parts = chunks(&["data: one\n", "data: half"]);
        parts.push(Err(EngineError::transport("connection reset")));
        parts.push(Ok(b"data: never\n".to_vec()));

        let lines: Vec<_> = lines_from_chunks(stream::iter(parts), IDLE).collect().await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_deref().ok(), Some("data: one"));
        assert!(matches!(lines[1], Err(EngineError::Upstream { .. })));
    }

    #[tokio::test]
    async fn stalled_streams_time_out() {
        let parts = stream::iter(chunks(&["data: one\ndata: par"])).chain(stream::pending());

        let lines: Vec<_> = lines_from_chunks(parts, Duration::from_millis(20)).collect().await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_deref().ok(), Some("data: one"));
        assert!(matches!(lines[1], Err(EngineError::Timeout { ref operation, timeout_ms: 20 }) if operation == "stream read"));
    }

    #[test]
    fn response_helpers() {
        let response = TransportResponse::json(201, &serde_json::json!({"ok": true}));
        assert!(response.is_success());
        assert_eq!(response.content_type(), "application/json");
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.parse_json(), Some(serde_json::json!({"ok": true})));

        let html = TransportResponse {
            status: 502,
            headers: IndexMap::new(),
            body: b"<html>".to_vec(),
        };
        assert!(!html.is_success());
        assert_eq!(html.parse_json(), None);
        assert_eq!(html.text(), "<html>");
    }
}
