//! Drives a definition's interaction pattern over a [`Transport`].
//!
//! [`JobDriver`] owns the timeouts and polling limits; the request, response
//! and streaming modules stay pure and know nothing about the network.

use std::sync::Arc;
use std::time::Duration;

use arcade_types::{DEFAULT_MAX_POLL_ATTEMPTS, Definition, Output, ParamValues, PollStatus};
use arcade_util::{encode_data_uri, is_binary_media, mime_essence};
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::request::{PreparedRequest, auth_headers, build_request, build_result_url, build_status_url};
use crate::response::{classify_poll, error_message, extract_error, extract_outputs, extract_request_id};
use crate::streaming::{StreamEvent, error_events, stream_events};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Timeouts and polling limits used by [`JobDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub request_timeout: Duration,
    pub status_timeout: Duration,
    pub result_timeout: Duration,
    /// Overrides each definition's `poll_interval_ms` when set.
    pub poll_interval: Option<Duration>,
    pub max_poll_attempts: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            status_timeout: Duration::from_secs(15),
            result_timeout: Duration::from_secs(30),
            poll_interval: None,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Outcome of the initial provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    /// The request as sent, with credentials masked.
    pub sent_request: PreparedRequest,
    pub status_code: u16,
    pub response: Value,
    /// Job id for polling definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Outputs for sync definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

/// One status check of an asynchronous job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub poll_status: PollStatus,
    pub response: Value,
}

/// The final result of an asynchronous job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub response: Value,
    pub outputs: Vec<Output>,
}

/// A finished polling job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollingOutcome {
    pub submission: Submission,
    pub request_id: String,
    pub attempts: u32,
    pub result: JobResult,
}

/// An open provider stream.
pub struct StreamSession {
    pub sent_request: PreparedRequest,
    pub events: BoxStream<'static, StreamEvent>,
}

/// Executes definitions against a provider through a [`Transport`].
#[derive(Clone)]
pub struct JobDriver {
    transport: Arc<dyn Transport>,
    settings: DriverSettings,
}

impl JobDriver {
    pub fn new(transport: Arc<dyn Transport>, settings: DriverSettings) -> Self {
        Self { transport, settings }
    }

    /// Builds and sends the initial request, then interprets the response.
    ///
    /// Binary audio bodies become `{"audio_url": <data uri>}`. A non-success
    /// status is an [`EngineError::Upstream`] carrying the provider's error
    /// field, or its whole body when no error field resolves.
    pub async fn submit(&self, definition: &Definition, params: &ParamValues, api_key: &str) -> Result<Submission, EngineError> {
        let prepared = build_request(definition, params, api_key)?;
        let sent_request = prepared.redacted(Some(&definition.auth.header));
        let response = self
            .transport
            .send(TransportRequest::from_prepared(&prepared, self.settings.request_timeout))
            .await?;

        let body = decode_submit_body(&response)?;
        if !response.is_success() {
            let error = extract_error(definition, &body).unwrap_or_else(|| body.clone());
            warn!(definition = %definition.id, status = response.status, "provider rejected request");
            return Err(EngineError::upstream(error_message(&error), response.status, Some(body)));
        }

        let mut submission = Submission {
            sent_request,
            status_code: response.status,
            response: body,
            request_id: None,
            outputs: Vec::new(),
        };
        match definition.polling() {
            Some(polling) => submission.request_id = extract_request_id(polling, &submission.response),
            None if matches!(definition.interaction, arcade_types::Interaction::Sync) => {
                submission.outputs = extract_outputs(definition, &submission.response);
            }
            None => {}
        }
        info!(
            definition = %definition.id,
            status = submission.status_code,
            request_id = submission.request_id.as_deref().unwrap_or(""),
            outputs = submission.outputs.len(),
            "request submitted"
        );
        Ok(submission)
    }

    /// Checks the status of an asynchronous job.
    pub async fn check_status(&self, definition: &Definition, request_id: &str, api_key: &str) -> Result<StatusReport, EngineError> {
        let url = build_status_url(definition, request_id)?;
        let polling = definition
            .polling()
            .ok_or_else(|| EngineError::pattern_mismatch(&definition.id, "polling"))?;
        let response = self
            .transport
            .send(TransportRequest::get(url, auth_headers(definition, api_key), self.settings.status_timeout))
            .await?;
        let body = require_json(&response)?;
        let poll_status = classify_poll(polling, &body);
        debug!(definition = %definition.id, request_id, %poll_status, "status checked");
        Ok(StatusReport { poll_status, response: body })
    }

    /// Fetches the final result of a completed job.
    pub async fn fetch_result(&self, definition: &Definition, request_id: &str, api_key: &str) -> Result<JobResult, EngineError> {
        let url = build_result_url(definition, request_id)?;
        let response = self
            .transport
            .send(TransportRequest::get(url, auth_headers(definition, api_key), self.settings.result_timeout))
            .await?;
        let body = require_json(&response)?;
        let outputs = extract_outputs(definition, &body);
        Ok(JobResult { response: body, outputs })
    }

    /// Submits a polling job and waits for it to finish.
    ///
    /// Polls every `poll_interval_ms` (or the configured override) until the
    /// job is done, reported failed, or `max_poll_attempts` is exhausted.
    pub async fn run_polling_job(&self, definition: &Definition, params: &ParamValues, api_key: &str) -> Result<PollingOutcome, EngineError> {
        let polling = definition
            .polling()
            .ok_or_else(|| EngineError::pattern_mismatch(&definition.id, "polling"))?;
        let submission = self.submit(definition, params, api_key).await?;
        let request_id = submission.request_id.clone().ok_or_else(|| {
            EngineError::upstream(
                format!("Response has no request id at '{}'", polling.request_id_path),
                submission.status_code,
                Some(submission.response.clone()),
            )
        })?;

        let interval = self
            .settings
            .poll_interval
            .unwrap_or_else(|| Duration::from_millis(polling.poll_interval_ms));
        let max_attempts = self.settings.max_poll_attempts.max(1);
        info!(definition = %definition.id, %request_id, max_attempts, "polling job started");

        for attempt in 1..=max_attempts {
            tokio::time::sleep(interval).await;
            let report = self.check_status(definition, &request_id, api_key).await?;
            match report.poll_status {
                PollStatus::Pending => continue,
                PollStatus::Done => {
                    let result = self.fetch_result(definition, &request_id, api_key).await?;
                    info!(definition = %definition.id, %request_id, attempts = attempt, "polling job completed");
                    return Ok(PollingOutcome {
                        submission,
                        request_id,
                        attempts: attempt,
                        result,
                    });
                }
                PollStatus::Failed => {
                    let message = extract_error(definition, &report.response)
                        .map(|error| error_message(&error))
                        .unwrap_or_else(|| "provider reported the job as failed".to_string());
                    warn!(definition = %definition.id, %request_id, attempts = attempt, "polling job failed");
                    return Err(EngineError::JobFailed {
                        request_id,
                        message,
                        body: report.response,
                    });
                }
            }
        }

        warn!(definition = %definition.id, %request_id, attempts = max_attempts, "polling guard tripped");
        let waited = interval.saturating_mul(max_attempts);
        Err(EngineError::timeout(
            format!("polling job {request_id}"),
            u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        ))
    }

    /// Opens a provider stream and adapts it into [`StreamEvent`]s.
    ///
    /// Only request-building errors are returned as `Err`; a transport
    /// failure before the first byte becomes a single error event.
    pub async fn stream(&self, definition: &Definition, params: &ParamValues, api_key: &str) -> Result<StreamSession, EngineError> {
        let prepared = build_request(definition, params, api_key)?;
        let sent_request = prepared.redacted(Some(&definition.auth.header));
        let request = TransportRequest::from_prepared(&prepared, self.settings.request_timeout);

        let events = match self.transport.open_stream(request).await {
            Ok(response) => {
                debug!(definition = %definition.id, status = response.status, "stream opened");
                stream_events(definition, response)
            }
            Err(error) => {
                warn!(definition = %definition.id, %error, "stream could not be opened");
                error_events(error.to_string())
            }
        };
        Ok(StreamSession { sent_request, events })
    }
}

fn decode_submit_body(response: &TransportResponse) -> Result<Value, EngineError> {
    let content_type = response.content_type();
    if response.is_success() && is_binary_media(content_type) {
        let data_uri = encode_data_uri(mime_essence(content_type), &response.body);
        return Ok(json!({"audio_url": data_uri}));
    }
    require_json(response)
}

fn require_json(response: &TransportResponse) -> Result<Value, EngineError> {
    response.parse_json().ok_or_else(|| {
        EngineError::upstream(
            "Non-JSON response from provider",
            response.status,
            Some(Value::String(response.text())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamResponse;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use indexmap::IndexMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, EngineError>>>,
        stream_lines: Mutex<Option<(u16, Vec<String>)>>,
        sent: Mutex<Vec<TransportRequest>>,
    }

    impl ScriptedTransport {
        fn with_responses(responses: Vec<Result<TransportResponse, EngineError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, EngineError> {
            self.sent.lock().expect("lock").push(request);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::transport("no scripted response")))
        }

        async fn open_stream(&self, request: TransportRequest) -> Result<StreamResponse, EngineError> {
            self.sent.lock().expect("lock").push(request);
            match self.stream_lines.lock().expect("lock").take() {
                Some((status, lines)) => Ok(StreamResponse::from_lines(status, lines)),
                None => Err(EngineError::transport("connection refused")),
            }
        }
    }

    fn driver(transport: Arc<ScriptedTransport>) -> JobDriver {
        let settings = DriverSettings {
            poll_interval: Some(Duration::from_millis(1)),
            max_poll_attempts: 3,
            ..Default::default()
        };
        JobDriver::new(transport, settings)
    }

    fn definition(interaction: Value) -> Definition {
        serde_json::from_value(json!({
            "schema_version": 1,
            "id": "fal-flux",
            "provider": "fal",
            "name": "Flux",
            "auth": {"type": "header", "header": "Authorization", "prefix": "Key ", "env_key": "FAL_KEY"},
            "request": {"method": "POST", "url": "https://queue.fal.run/flux", "params": [{"name": "prompt", "type": "string", "ui": "textarea", "required": true}]},
            "interaction": interaction,
            "response": {
                "outputs": [{"path": "$.images[*].url", "type": "image", "source": "url"}],
                "error": {"path": "$.detail"}
            }
        }))
        .expect("definition")
    }

    fn polling_definition() -> Definition {
        definition(json!({
            "pattern": "polling",
            "status_url": "https://queue.fal.run/flux/requests/{request_id}/status",
            "result_url": "https://queue.fal.run/flux/requests/{request_id}",
            "done_when": {"path": "$.status", "equals": "COMPLETED"},
            "failed_when": {"path": "$.status", "equals": "FAILED"}
        }))
    }

    fn params() -> ParamValues {
        json!({"prompt": "a lighthouse"}).as_object().cloned().expect("params")
    }

    #[tokio::test]
    async fn sync_submit_extracts_outputs_and_masks_key() {
        let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(TransportResponse::json(
            200,
            &json!({"images": [{"url": "https://cdn/a.png"}]}),
        ))]));

        let submission = driver(transport.clone())
            .submit(&definition(json!({"pattern": "sync"})), &params(), "secret")
            .await
            .expect("submission");

        assert_eq!(submission.outputs.len(), 1);
        assert_eq!(submission.outputs[0].value, vec![json!("https://cdn/a.png")]);
        assert_eq!(submission.sent_request.headers["Authorization"], "***");
        assert_eq!(transport.sent()[0].headers["Authorization"], "Key secret");
        assert_eq!(transport.sent()[0].timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn provider_errors_keep_the_body() {
        let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(TransportResponse::json(
            422,
            &json!({"detail": "prompt too long"}),
        ))]));

        let error = driver(transport)
            .submit(&definition(json!({"pattern": "sync"})), &params(), "k")
            .await
            .expect_err("error");

        match error {
            EngineError::Upstream { message, status, body } => {
                assert_eq!(message, "prompt too long");
                assert_eq!(status, Some(422));
                assert_eq!(body, Some(json!({"detail": "prompt too long"})));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_bodies_are_upstream_failures() {
        let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(TransportResponse {
            status: 200,
            headers: IndexMap::new(),
            body: b"<html>gateway</html>".to_vec(),
        })]));

        let error = driver(transport)
            .submit(&definition(json!({"pattern": "sync"})), &params(), "k")
            .await
            .expect_err("error");

        assert_eq!(error.to_string(), "Upstream error: Non-JSON response from provider");
    }

    #[tokio::test]
    async fn binary_audio_becomes_a_data_uri() {
        let mut headers = IndexMap::new();
        headers.insert("content-type".to_string(), "audio/mpeg; charset=binary".to_string());
        let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(TransportResponse {
            status: 200,
            headers,
            body: vec![0x49, 0x44, 0x33],
        })]));

        let submission = driver(transport)
            .submit(&definition(json!({"pattern": "sync"})), &params(), "k")
            .await
            .expect("submission");

        assert_eq!(submission.response, json!({"audio_url": "data:audio/mpeg;base64,SUQz"}));
    }

    #[tokio::test]
    async fn polling_job_runs_to_completion() {
        let transport = Arc::new(ScriptedTransport::with_responses(vec![
            Ok(TransportResponse::json(200, &json!({"request_id": "req-1"}))),
            Ok(TransportResponse::json(200, &json!({"status": "IN_PROGRESS"}))),
            Ok(TransportResponse::json(200, &json!({"status": "COMPLETED"}))),
            Ok(TransportResponse::json(200, &json!({"images": [{"url": "https://cdn/x.png"}]}))),
        ]));

        let outcome = driver(transport.clone())
            .run_polling_job(&polling_definition(), &params(), "k")
            .await
            .expect("outcome");

        assert_eq!(outcome.request_id, "req-1");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.outputs[0].value, vec![json!("https://cdn/x.png")]);

        let sent = transport.sent();
        assert_eq!(sent[1].url, "https://queue.fal.run/flux/requests/req-1/status");
        assert_eq!(sent[1].method, "GET");
        assert_eq!(sent[1].body, None);
        assert_eq!(sent[1].timeout, Duration::from_secs(15));
        assert_eq!(sent[3].url, "https://queue.fal.run/flux/requests/req-1");
        assert_eq!(sent[3].timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn failed_jobs_surface_the_provider_error() {
        let transport = Arc::new(ScriptedTransport::with_responses(vec![
            Ok(TransportResponse::json(200, &json!({"request_id": "req-2"}))),
            Ok(TransportResponse::json(200, &json!({"status": "FAILED", "detail": "nsfw"}))),
        ]));

        let error = driver(transport)
            .run_polling_job(&polling_definition(), &params(), "k")
            .await
            .expect_err("error");

        assert!(matches!(error, EngineError::JobFailed { ref request_id, ref message, .. } if request_id == "req-2" && message == "nsfw"));
    }

    #[tokio::test]
    async fn polling_gives_up_after_max_attempts() {
        let mut responses = vec![Ok(TransportResponse::json(200, &json!({"request_id": "req-3"})))];
        responses.extend((0..3).map(|_| Ok(TransportResponse::json(200, &json!({"status": "IN_QUEUE"})))));
        let transport = Arc::new(ScriptedTransport::with_responses(responses));

        let error = driver(transport)
            .run_polling_job(&polling_definition(), &params(), "k")
            .await
            .expect_err("error");

        assert!(matches!(error, EngineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn polling_requires_a_polling_definition() {
        let transport = Arc::new(ScriptedTransport::default());
        let error = driver(transport.clone())
            .run_polling_job(&definition(json!({"pattern": "sync"})), &params(), "k")
            .await
            .expect_err("error");

        assert!(matches!(error, EngineError::PatternMismatch { .. }));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn stream_open_failure_is_a_single_error_event() {
        let transport = Arc::new(ScriptedTransport::default());
        let definition = definition(json!({"pattern": "streaming", "stream_path": "$.delta"}));

        let session = driver(transport).stream(&definition, &params(), "k").await.expect("session");
        let events: Vec<StreamEvent> = session.events.collect().await;

        assert_eq!(events, vec![StreamEvent::Error("Upstream error: connection refused".to_string())]);
    }

    #[tokio::test]
    async fn stream_yields_tokens() {
        let transport = Arc::new(ScriptedTransport::default());
        *transport.stream_lines.lock().expect("lock") = Some((
            200,
            vec!["data: {\"delta\":\"Hi\"}".to_string(), "data: [DONE]".to_string()],
        ));
        let definition = definition(json!({"pattern": "streaming", "stream_path": "$.delta"}));

        let session = driver(transport).stream(&definition, &params(), "k").await.expect("session");
        let events: Vec<StreamEvent> = session.events.collect().await;

        assert_eq!(events, vec![StreamEvent::Token("Hi".to_string()), StreamEvent::Done]);
    }
}
