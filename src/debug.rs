//! Typed calls for the admin debug endpoints under `/internal/debug`.
//!
//! All calls need a debug session cookie, obtained with [`DebugConsole::login`]
//! on the same [`BackendClient`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::CONFIRM_MESSAGE;
use crate::client::BackendClient;
use crate::error::ClientError;
use crate::input::InputMode;
use crate::polling::{PollLoop, PollOutcome, Pollable, Sleeper, StatusTracker};
use crate::spec::{extract_operations, ApiOperation};

const PREFIX: &str = "/internal/debug";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebugConfig {
    pub enabled: bool,
    pub llm_explain_enabled: bool,
    pub auth_mode: String,
    pub cookie_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebugSession {
    pub id: String,
    pub role: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    session: DebugSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Error,
    Timeout,
    Other(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            _ => Self::Other(raw),
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Row of `GET /behavior-tests`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub kind: String,
    pub status: RunStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub event_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct RunList {
    runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceEvent {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Explanation {
    pub generated_at: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub content: String,
}

/// Full record of a traced behaviour run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebugRun {
    pub id: String,
    pub kind: String,
    pub status: RunStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub events: Vec<TraceEvent>,
    #[serde(default)]
    pub artifacts: Value,
    #[serde(default)]
    pub explanation: Option<Explanation>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub job_running: bool,
}

impl Pollable for DebugRun {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunStarted {
    pub run_id: String,
    pub status: RunStatus,
}

/// Body of `POST /behavior-tests`: drive one chat turn end to end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorTestRequest {
    pub query: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub use_online_agent: bool,
    /// Answer confirmation requests automatically with `confirm_message`
    pub auto_confirm: bool,
    pub confirm_message: String,
    pub max_wait_seconds: u64,
    pub poll_interval_ms: u64,
}

impl BehaviorTestRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: "debug_user".into(),
            conversation_id: None,
            use_online_agent: false,
            auto_confirm: true,
            confirm_message: CONFIRM_MESSAGE.into(),
            max_wait_seconds: 90,
            poll_interval_ms: 500,
        }
    }
}

/// Body of `POST /behavior-tests/track`: trace an existing task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRequest {
    pub task_id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub max_wait_seconds: u64,
    pub poll_interval_ms: u64,
}

impl TrackRequest {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: None,
            conversation_id: None,
            max_wait_seconds: 90,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Deserialize)]
struct ExplainResponse {
    explanation: Explanation,
}

/// A registered backend function that can be run in isolation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub expected_io: Value,
    #[serde(default)]
    pub sample_input: Value,
}

#[derive(Deserialize)]
struct UnitList {
    units: Vec<UnitSpec>,
}

/// Input produced by a backend generator, with its schema check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedInput {
    #[serde(default)]
    pub unit: Option<String>,
    pub mode: String,
    pub input_data: Value,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

/// Where a unit run's input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitInputSource {
    Manual,
    Sample,
    Schema,
    Llm,
}

impl From<InputMode> for UnitInputSource {
    fn from(mode: InputMode) -> Self {
        match mode {
            InputMode::Schema => Self::Schema,
            InputMode::Sample => Self::Sample,
            InputMode::Llm => Self::Llm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitRunRequest {
    pub unit_name: String,
    pub input_data: Option<Value>,
    pub input_mode: UnitInputSource,
    pub use_llm_generation: bool,
}

impl UnitRunRequest {
    /// Run with caller-supplied input.
    pub fn manual(unit_name: impl Into<String>, input_data: Value) -> Self {
        Self {
            unit_name: unit_name.into(),
            input_data: Some(input_data),
            input_mode: UnitInputSource::Manual,
            use_llm_generation: false,
        }
    }

    /// Let the backend generate the input.
    pub fn generated(unit_name: impl Into<String>, mode: InputMode) -> Self {
        Self {
            unit_name: unit_name.into(),
            input_data: None,
            input_mode: mode.into(),
            use_llm_generation: mode == InputMode::Llm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitResult {
    pub ok: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitRunResponse {
    pub unit: UnitSpec,
    pub input_source: UnitInputSource,
    pub input_data: Value,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    pub result: UnitResult,
}

/// Handle for the debug endpoints, borrowing a session-carrying client.
#[derive(Debug, Clone, Copy)]
pub struct DebugConsole<'a> {
    client: &'a BackendClient,
}

impl<'a> DebugConsole<'a> {
    pub fn new(client: &'a BackendClient) -> Self {
        Self { client }
    }

    pub fn config(&self) -> Result<DebugConfig, ClientError> {
        self.client.get(&format!("{PREFIX}/config"))
    }

    pub fn login(&self, token: &str) -> Result<DebugSession, ClientError> {
        let env: SessionEnvelope = self
            .client
            .post(&format!("{PREFIX}/login"), &json!({ "token": token }))?;
        tracing::info!(role = %env.session.role, expires_at = %env.session.expires_at, "debug session started");
        Ok(env.session)
    }

    pub fn logout(&self) -> Result<(), ClientError> {
        let _: Value = self.client.post_empty(&format!("{PREFIX}/logout"))?;
        Ok(())
    }

    pub fn session(&self) -> Result<DebugSession, ClientError> {
        let env: SessionEnvelope = self.client.get(&format!("{PREFIX}/session"))?;
        Ok(env.session)
    }

    pub fn list_runs(&self) -> Result<Vec<RunSummary>, ClientError> {
        let list: RunList = self.client.get(&format!("{PREFIX}/behavior-tests"))?;
        Ok(list.runs)
    }

    pub fn get_run(&self, run_id: &str) -> Result<DebugRun, ClientError> {
        self.client.get(&format!(
            "{PREFIX}/behavior-tests/{}",
            urlencoding::encode(run_id)
        ))
    }

    pub fn start_behavior_test(
        &self,
        request: &BehaviorTestRequest,
    ) -> Result<RunStarted, ClientError> {
        self.client
            .post(&format!("{PREFIX}/behavior-tests"), request)
    }

    /// Start a tracking run for an existing task.
    ///
    /// Fails with a "Task ID not found" 404 when the backend has no such task;
    /// check [`ClientError::is_task_not_found`].
    pub fn track_task(&self, request: &TrackRequest) -> Result<RunStarted, ClientError> {
        self.client
            .post(&format!("{PREFIX}/behavior-tests/track"), request)
    }

    pub fn explain(&self, run_id: &str) -> Result<Explanation, ClientError> {
        let path = format!(
            "{PREFIX}/behavior-tests/{}/explain",
            urlencoding::encode(run_id)
        );
        let resp: ExplainResponse = self.client.post(&path, &json!({ "mode": "nl_explain" }))?;
        Ok(resp.explanation)
    }

    /// Re-fetch a run until it reaches `completed`, `error` or `timeout`.
    pub fn watch_run<S, F>(
        &self,
        run_id: &str,
        poll: &PollLoop<S>,
        on_update: F,
    ) -> PollOutcome<DebugRun>
    where
        S: Sleeper,
        F: FnMut(&DebugRun),
    {
        let mut tracker = StatusTracker::new();
        let ticket = tracker.retarget(run_id);
        poll.run(&mut tracker, &ticket, |id| self.get_run(id), on_update)
    }

    pub fn list_units(&self) -> Result<Vec<UnitSpec>, ClientError> {
        let list: UnitList = self.client.get(&format!("{PREFIX}/unit-tests/units"))?;
        Ok(list.units)
    }

    pub fn generate_unit_input(
        &self,
        unit_name: &str,
        mode: InputMode,
    ) -> Result<GeneratedInput, ClientError> {
        self.client.post(
            &format!("{PREFIX}/unit-tests/generate-input"),
            &json!({ "unit_name": unit_name, "mode": mode }),
        )
    }

    pub fn run_unit(&self, request: &UnitRunRequest) -> Result<UnitRunResponse, ClientError> {
        let resp: UnitRunResponse = self
            .client
            .post(&format!("{PREFIX}/unit-tests/run"), request)?;
        tracing::info!(
            unit = %resp.unit.name,
            ok = resp.result.ok,
            duration_ms = resp.result.duration_ms,
            "unit run finished"
        );
        Ok(resp)
    }

    /// Ask the backend to fill `schema` for a playground operation.
    pub fn generate_playground_input(
        &self,
        op: &ApiOperation,
        schema: &Value,
        mode: InputMode,
    ) -> Result<GeneratedInput, ClientError> {
        self.client.post(
            &format!("{PREFIX}/api-playground/generate-input"),
            &json!({
                "mode": mode,
                "schema": schema,
                "method": op.method,
                "path": op.path,
                "summary": op.summary,
            }),
        )
    }

    pub fn openapi_document(&self) -> Result<Value, ClientError> {
        self.client.get("/openapi.json")
    }

    /// Fetch `/openapi.json` and flatten it into the operation catalog.
    pub fn operations(&self) -> Result<Vec<ApiOperation>, ClientError> {
        let doc = self.openapi_document()?;
        let ops = extract_operations(&doc);
        tracing::debug!(count = ops.len(), "loaded operation catalog");
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn client_for(server: &mockito::Server) -> BackendClient {
        BackendClient::new(&ConsoleConfig::new(server.url())).unwrap()
    }

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _: Duration) {}
    }

    #[test]
    fn login_returns_session_and_sends_token() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/internal/debug/login")
            .match_body(mockito::Matcher::Json(json!({"token": "s3cret"})))
            .with_status(200)
            .with_body(
                r#"{"ok":true,"session":{"id":"sid","role":"admin",
                    "created_at":"2026-01-01T00:00:00+00:00","expires_at":"2026-01-01T08:00:00+00:00"}}"#,
            )
            .create();

        let client = client_for(&server);
        let session = DebugConsole::new(&client).login("s3cret").unwrap();
        assert_eq!(session.role, "admin");
        mock.assert();
    }

    #[test]
    fn invalid_token_surfaces_detail() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/internal/debug/login")
            .with_status(401)
            .with_body(r#"{"detail":"Invalid debug token"}"#)
            .create();

        let client = client_for(&server);
        let err = DebugConsole::new(&client).login("nope").unwrap_err();
        assert_eq!(err.to_string(), "HTTP 401: Invalid debug token");
    }

    #[test]
    fn behavior_test_request_defaults() {
        let body = serde_json::to_value(BehaviorTestRequest::new("spicy food")).unwrap();
        assert_eq!(
            body,
            json!({
                "query": "spicy food",
                "user_id": "debug_user",
                "conversation_id": null,
                "use_online_agent": false,
                "auto_confirm": true,
                "confirm_message": "Yes, that's correct",
                "max_wait_seconds": 90,
                "poll_interval_ms": 500
            })
        );
    }

    #[test]
    fn list_runs_and_unknown_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/internal/debug/behavior-tests")
            .with_status(200)
            .with_body(
                r#"{"runs":[
                    {"id":"r1","kind":"behavior_create","status":"running","event_count":3,"error":null},
                    {"id":"r2","kind":"behavior_track","status":"paused"}
                ]}"#,
            )
            .create();

        let client = client_for(&server);
        let runs = DebugConsole::new(&client).list_runs().unwrap();
        assert_eq!(runs[0].status, RunStatus::Running);
        assert_eq!(runs[0].event_count, 3);
        assert_eq!(runs[1].status, RunStatus::Other("paused".into()));
        assert!(!runs[1].status.is_terminal());
    }

    #[test]
    fn track_unknown_task_is_flagged() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/internal/debug/behavior-tests/track")
            .with_status(404)
            .with_body(r#"{"detail":"Task ID not found; no tracking run created"}"#)
            .create();

        let client = client_for(&server);
        let err = DebugConsole::new(&client)
            .track_task(&TrackRequest::new("missing"))
            .unwrap_err();
        assert!(err.is_task_not_found());
    }

    #[test]
    fn watch_run_polls_until_terminal() {
        let mut server = mockito::Server::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mock = server
            .mock("GET", "/internal/debug/behavior-tests/r1")
            .with_status(200)
            .with_body_from_request(move |_| {
                let body = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    r#"{"id":"r1","kind":"behavior_create","status":"running","events":[],"job_running":true}"#
                } else {
                    r#"{"id":"r1","kind":"behavior_create","status":"timeout",
                        "events":[{"timestamp":"t","type":"task_status","label":"Timed out","status":"error"}],
                        "error":"Timed out after 90s","job_running":false}"#
                };
                body.as_bytes().to_vec()
            })
            .expect(2)
            .create();

        let client = client_for(&server);
        let poll = PollLoop::with_sleeper(Duration::from_millis(1500), NoSleep);
        let mut seen = Vec::new();
        let outcome = DebugConsole::new(&client).watch_run("r1", &poll, |run| {
            seen.push(run.status.clone());
        });

        mock.assert();
        assert_eq!(seen, vec![RunStatus::Running]);
        match outcome {
            PollOutcome::Finished(run) => {
                assert_eq!(run.status, RunStatus::Timeout);
                assert_eq!(run.events[0].kind, "task_status");
                assert_eq!(run.error.as_deref(), Some("Timed out after 90s"));
            }
            other => panic!("expected finished run, got {other:?}"),
        }
    }

    #[test]
    fn explain_sends_mode() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/internal/debug/behavior-tests/r1/explain")
            .match_body(mockito::Matcher::Json(json!({"mode": "nl_explain"})))
            .with_status(200)
            .with_body(
                r#"{"ok":true,"mode":"nl_explain","explanation":
                    {"generated_at":"2026-01-01T00:00:00+00:00","duration_ms":812,"content":"Step 1..."}}"#,
            )
            .create();

        let client = client_for(&server);
        let explanation = DebugConsole::new(&client).explain("r1").unwrap();
        assert_eq!(explanation.duration_ms, 812);
        assert_eq!(explanation.content, "Step 1...");
        mock.assert();
    }

    #[test]
    fn run_unit_with_generated_input() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/internal/debug/unit-tests/run")
            .match_body(mockito::Matcher::Json(json!({
                "unit_name": "intent_classifier",
                "input_data": null,
                "input_mode": "llm",
                "use_llm_generation": true
            })))
            .with_status(200)
            .with_body(
                r#"{"ok":true,
                    "unit":{"name":"intent_classifier","description":"d","function_name":"f",
                            "input_schema":{"type":"object"},"expected_io":{},"sample_input":{}},
                    "input_source":"llm","input_data":{"query":"hi"},"validation_errors":[],
                    "result":{"ok":false,"duration_ms":4,"error":"boom","traceback":"tb"}}"#,
            )
            .create();

        let client = client_for(&server);
        let resp = DebugConsole::new(&client)
            .run_unit(&UnitRunRequest::generated("intent_classifier", InputMode::Llm))
            .unwrap();
        assert_eq!(resp.input_source, UnitInputSource::Llm);
        assert!(!resp.result.ok);
        assert_eq!(resp.result.error.as_deref(), Some("boom"));
        mock.assert();
    }

    #[test]
    fn manual_unit_run_request_shape() {
        let body =
            serde_json::to_value(UnitRunRequest::manual("u", json!({"a": 1}))).unwrap();
        assert_eq!(body["input_mode"], "manual");
        assert_eq!(body["use_llm_generation"], false);
    }

    #[test]
    fn operations_come_from_openapi_document() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/openapi.json")
            .with_status(200)
            .with_body(
                json!({
                    "openapi": "3.1.0",
                    "paths": {
                        "/b": {"get": {"responses": {}}},
                        "/a": {"post": {"responses": {}}, "get": {"responses": {}}}
                    }
                })
                .to_string(),
            )
            .create();

        let client = client_for(&server);
        let ops = DebugConsole::new(&client).operations().unwrap();
        let labels: Vec<String> = ops.iter().map(ApiOperation::label).collect();
        assert_eq!(labels, vec!["GET /a", "POST /a", "GET /b"]);
    }
}
