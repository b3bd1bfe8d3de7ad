//! Turns server-sent-event lines into a token sequence.

use arcade_types::{Definition, Interaction};
use arcade_util::evaluate;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::response::error_message;
use crate::transport::{LineStream, StreamResponse};

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// One event of a provider stream as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Token(String),
    /// The stream ended normally.
    Done,
    /// The stream ended with an error; no `Done` follows.
    Error(String),
}

/// What a single stream line contributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Skip,
    Token(String),
    Done,
}

/// Interprets one line of an event stream.
///
/// Non-data lines, malformed fragments, and fragments without a token at
/// `stream_path` are skipped. The `[DONE]` marker ends the stream.
pub fn interpret_line(line: &str, stream_path: &str) -> LineOutcome {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineOutcome::Skip;
    };
    if payload.trim() == DONE_MARKER {
        return LineOutcome::Done;
    }
    if stream_path.is_empty() {
        return LineOutcome::Skip;
    }
    let fragment: Value = match serde_json::from_str(payload) {
        Ok(fragment) => fragment,
        Err(error) => {
            debug!(target: "arcade_stream", %error, "skipping malformed stream fragment");
            return LineOutcome::Skip;
        }
    };
    match evaluate(&fragment, stream_path) {
        Some(Value::String(token)) if !token.is_empty() => LineOutcome::Token(token),
        Some(Value::Number(number)) => LineOutcome::Token(number.to_string()),
        Some(Value::Bool(true)) => LineOutcome::Token("true".to_string()),
        Some(other @ (Value::Array(_) | Value::Object(_))) if !is_empty_container(&other) => {
            LineOutcome::Token(other.to_string())
        }
        _ => LineOutcome::Skip,
    }
}

/// Adapts a stream response into [`StreamEvent`]s for `definition`.
///
/// A non-success response produces a single [`StreamEvent::Error`] built from
/// the provider's error field (or the raw body) and nothing else.
pub fn stream_events(definition: &Definition, response: StreamResponse) -> BoxStream<'static, StreamEvent> {
    let stream_path = match &definition.interaction {
        Interaction::Streaming { stream_path } => stream_path.clone(),
        _ => String::new(),
    };
    let error_path = definition.response.error.as_ref().map(|error| error.path.clone());

    let state = if response.is_success() {
        AdapterState::Streaming {
            lines: response.lines,
            stream_path,
        }
    } else {
        AdapterState::Rejected {
            status: response.status,
            lines: response.lines,
            error_path,
        }
    };

    stream::unfold(state, |state| async move {
        match state {
            AdapterState::Rejected { status, lines, error_path } => {
                let message = rejection_message(status, lines, error_path.as_deref()).await;
                Some((StreamEvent::Error(message), AdapterState::Finished))
            }
            AdapterState::Streaming { mut lines, stream_path } => loop {
                match lines.next().await {
                    None => return Some((StreamEvent::Done, AdapterState::Finished)),
                    Some(Err(error)) => return Some((StreamEvent::Error(error.to_string()), AdapterState::Finished)),
                    Some(Ok(line)) => match interpret_line(&line, &stream_path) {
                        LineOutcome::Skip => continue,
                        LineOutcome::Done => return Some((StreamEvent::Done, AdapterState::Finished)),
                        LineOutcome::Token(token) => {
                            return Some((StreamEvent::Token(token), AdapterState::Streaming { lines, stream_path }));
                        }
                    },
                }
            },
            AdapterState::Finished => None,
        }
    })
    .boxed()
}

/// A stream that reports one error and ends.
pub fn error_events(message: impl Into<String>) -> BoxStream<'static, StreamEvent> {
    stream::iter([StreamEvent::Error(message.into())]).boxed()
}

enum AdapterState {
    Rejected {
        status: u16,
        lines: LineStream,
        error_path: Option<String>,
    },
    Streaming {
        lines: LineStream,
        stream_path: String,
    },
    Finished,
}

async fn rejection_message(status: u16, lines: LineStream, error_path: Option<&str>) -> String {
    let lines: Vec<String> = lines.filter_map(|line| async move { line.ok() }).collect().await;
    let body = lines.join("\n");
    let extracted = serde_json::from_str::<Value>(&body)
        .ok()
        .zip(error_path)
        .and_then(|(json, path)| evaluate(&json, path));
    match extracted {
        Some(error) => error_message(&error),
        None if body.trim().is_empty() => format!("HTTP {status}"),
        None => body,
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHOICE_PATH: &str = "$.choices[0].delta.content";

    fn streaming_definition() -> Definition {
        serde_json::from_value(json!({
            "schema_version": 1,
            "id": "openai-chat",
            "provider": "openai",
            "name": "GPT",
            "auth": {"type": "header", "header": "Authorization", "prefix": "Bearer ", "env_key": "OPENAI_API_KEY"},
            "request": {"method": "POST", "url": "https://api.openai.com/v1/chat/completions", "params": [{"name": "message", "type": "string", "ui": "textarea", "required": true, "body_path": "_chat_message"}]},
            "interaction": {"pattern": "streaming", "stream_path": CHOICE_PATH},
            "response": {"outputs": [{"path": "$.choices[0].message.content", "type": "text", "source": "inline"}], "error": {"path": "$.error.message"}}
        }))
        .expect("definition")
    }

    fn chunk(content: &str) -> String {
        format!("data: {}", json!({"choices": [{"delta": {"content": content}}]}))
    }

    #[test]
    fn interprets_individual_lines() {
        assert_eq!(interpret_line(": keep-alive", CHOICE_PATH), LineOutcome::Skip);
        assert_eq!(interpret_line("event: ping", CHOICE_PATH), LineOutcome::Skip);
        assert_eq!(interpret_line("data: [DONE]", CHOICE_PATH), LineOutcome::Done);
        assert_eq!(interpret_line("data:  [DONE] ", CHOICE_PATH), LineOutcome::Done);
        assert_eq!(interpret_line("data: {not json", CHOICE_PATH), LineOutcome::Skip);
        assert_eq!(interpret_line(&chunk(""), CHOICE_PATH), LineOutcome::Skip);
        assert_eq!(interpret_line(&chunk("Hel"), CHOICE_PATH), LineOutcome::Token("Hel".to_string()));
        assert_eq!(interpret_line(&chunk("Hel"), ""), LineOutcome::Skip);
    }

    #[tokio::test]
    async fn yields_tokens_until_the_done_marker() {
        let definition = streaming_definition();
        let response = StreamResponse::from_lines(
            200,
            vec![chunk("Hel"), String::new(), "data: {broken".to_string(), chunk("lo"), "data: [DONE]".to_string(), chunk("late")],
        );

        let events: Vec<StreamEvent> = stream_events(&definition, response).collect().await;

        assert_eq!(
            events,
            vec![StreamEvent::Token("Hel".to_string()), StreamEvent::Token("lo".to_string()), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn ends_with_done_when_lines_run_out() {
        let events: Vec<StreamEvent> = stream_events(&streaming_definition(), StreamResponse::from_lines(200, vec![chunk("hi")]))
            .collect()
            .await;

        assert_eq!(events, vec![StreamEvent::Token("hi".to_string()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn rejected_stream_reports_provider_error() {
        let body = json!({"error": {"message": "Invalid API key"}}).to_string();
        let events: Vec<StreamEvent> = stream_events(&streaming_definition(), StreamResponse::from_lines(401, vec![body]))
            .collect()
            .await;

        assert_eq!(events, vec![StreamEvent::Error("Invalid API key".to_string())]);
    }

    #[tokio::test]
    async fn rejected_stream_falls_back_to_raw_body() {
        let events: Vec<StreamEvent> = stream_events(&streaming_definition(), StreamResponse::from_lines(503, vec!["upstream overloaded"]))
            .collect()
            .await;

        assert_eq!(events, vec![StreamEvent::Error("upstream overloaded".to_string())]);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        assert_eq!(serde_json::to_value(StreamEvent::Token("a".to_string())).expect("json"), json!({"event": "token", "data": "a"}));
        assert_eq!(serde_json::to_value(StreamEvent::Done).expect("json"), json!({"event": "done"}));
    }
}
