//! Playground input → HTTP request dispatch
//!
//! Input for an operation is split the same way as its composite input
//! schema: path params, query params and an optional JSON body. It can come
//! from manual JSON text, from generated data, or from clap matches of the
//! `api call` tree; later sources are overlaid on earlier ones.

use serde_json::{Map, Value};

use crate::client::BackendClient;
use crate::debug::DebugConsole;
use crate::error::{ClientError, DispatchError, InputError};
use crate::input::{generate_from_schema, synthesize_input_schema, validate_against_schema, InputMode};
use crate::spec::{is_bool_schema, ApiOperation, RequestBody};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaygroundInput {
    pub path_params: Map<String, Value>,
    pub query_params: Map<String, Value>,
    pub body: Option<Value>,
}

impl PlaygroundInput {
    /// Parse the three manual text fields. Empty text means "nothing".
    pub fn from_manual(path_text: &str, query_text: &str, body_text: &str) -> Result<Self, InputError> {
        let body = if body_text.trim().is_empty() {
            None
        } else {
            Some(parse_json(body_text, "body")?)
        };
        Ok(Self {
            path_params: parse_object(path_text, "path params")?,
            query_params: parse_object(query_text, "query params")?,
            body,
        })
    }

    /// Split generated data shaped like the composite input schema.
    pub fn from_generated(data: &Value) -> Self {
        let object = |key: &str| {
            data.get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        Self {
            path_params: object("path_params"),
            query_params: object("query_params"),
            body: data.get("body").filter(|b| !b.is_null()).cloned(),
        }
    }

    /// Build input from the matches of an `api call <group> <operation>`
    /// subcommand.
    pub fn from_matches(op: &ApiOperation, matches: &clap::ArgMatches) -> Result<Self, InputError> {
        let mut input = Self::default();

        // Parameters shadowed by reserved or earlier names have no arg of
        // their own, so lookups go through the non-panicking accessors.
        for param in op.path_params() {
            if let Some(val) = string_arg(matches, &param.name) {
                input
                    .path_params
                    .insert(param.name.clone(), Value::String(val.clone()));
            }
        }

        for param in op.query_params() {
            if is_bool_schema(&param.schema) {
                if let Ok(Some(true)) = matches.try_get_one::<bool>(&param.name) {
                    input.query_params.insert(param.name.clone(), Value::Bool(true));
                }
            } else if let Some(val) = string_arg(matches, &param.name) {
                input
                    .query_params
                    .insert(param.name.clone(), Value::String(val.clone()));
            }
        }

        if let Some(text) = string_arg(matches, "path-params") {
            input.path_params.extend(parse_object(text, "path params")?);
        }
        if let Some(text) = string_arg(matches, "query-params") {
            input.query_params.extend(parse_object(text, "query params")?);
        }

        if op.request_body != RequestBody::None {
            input.body = body_from_matches(matches)?;
        }
        Ok(input)
    }

    /// Overlay `other` on `self`: its params win per key, its body wins if set.
    pub fn overlay(&mut self, other: PlaygroundInput) {
        self.path_params.extend(other.path_params);
        self.query_params.extend(other.query_params);
        if other.body.is_some() {
            self.body = other.body;
        }
    }
}

fn parse_json(text: &str, field: &'static str) -> Result<Value, InputError> {
    serde_json::from_str(text).map_err(|source| InputError::InvalidJson { field, source })
}

fn parse_object(text: &str, field: &'static str) -> Result<Map<String, Value>, InputError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match parse_json(text, field)? {
        Value::Object(map) => Ok(map),
        _ => Err(InputError::NotAnObject { field }),
    }
}

fn string_arg<'m>(matches: &'m clap::ArgMatches, id: &str) -> Option<&'m String> {
    matches.try_get_one::<String>(id).ok().flatten()
}

fn body_from_matches(matches: &clap::ArgMatches) -> Result<Option<Value>, InputError> {
    // --json takes precedence
    if let Some(json_str) = matches.get_one::<String>("json-body") {
        return parse_json(json_str, "--json").map(Some);
    }

    if let Some(fields) = matches.get_many::<String>("field") {
        let mut obj = Map::new();
        for field in fields {
            let (key, val) = field
                .split_once('=')
                .ok_or_else(|| InputError::InvalidFieldFormat {
                    field: field.to_string(),
                })?;
            let json_val = serde_json::from_str(val).unwrap_or(Value::String(val.to_string()));
            obj.insert(key.to_string(), json_val);
        }
        return Ok(Some(Value::Object(obj)));
    }

    Ok(None)
}

/// Generated input plus the schema check of what was generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub input: PlaygroundInput,
    pub raw: Value,
    pub validation_errors: Vec<String>,
}

/// Fill an operation's composite input schema.
///
/// `schema` and `sample` are generated locally (operations carry no samples
/// beyond schema `example`s); `llm` is delegated to the backend.
pub fn generate_input(
    op: &ApiOperation,
    mode: InputMode,
    console: &DebugConsole<'_>,
) -> Result<Generated, ClientError> {
    let schema = synthesize_input_schema(op);
    let (raw, validation_errors) = match mode {
        InputMode::Schema | InputMode::Sample => {
            let raw = generate_from_schema(&schema);
            let errors = validate_against_schema(&raw, &schema);
            (raw, errors)
        }
        InputMode::Llm => {
            let generated = console.generate_playground_input(op, &schema, mode)?;
            (generated.input_data, generated.validation_errors)
        }
    };
    tracing::debug!(op = %op.label(), %mode, errors = validation_errors.len(), "generated playground input");
    Ok(Generated {
        input: PlaygroundInput::from_generated(&raw),
        raw,
        validation_errors,
    })
}

/// Substitute `{name}` tokens in the path template, percent-encoding values.
pub fn build_path(op: &ApiOperation, path_params: &Map<String, Value>) -> Result<String, InputError> {
    let mut path = op.path.clone();
    for param in op.path_params() {
        let val = path_params
            .get(&param.name)
            .map(param_text)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| InputError::MissingPathParam {
                name: param.name.clone(),
            })?;
        path = path.replace(&format!("{{{}}}", param.name), &urlencoding::encode(&val));
    }
    // Params not declared by the operation still fill matching tokens.
    for (name, val) in path_params {
        let token = format!("{{{name}}}");
        if path.contains(&token) {
            path = path.replace(&token, &urlencoding::encode(&param_text(val)));
        }
    }
    Ok(path)
}

/// Query pairs: null and empty values are skipped, arrays repeat the key.
pub fn build_query_pairs(query_params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, val) in query_params {
        match val {
            Value::Null => {}
            Value::Array(items) => {
                for text in items.iter().map(param_text).filter(|t| !t.is_empty()) {
                    pairs.push((name.clone(), text));
                }
            }
            other => {
                let text = param_text(other);
                if !text.is_empty() {
                    pairs.push((name.clone(), text));
                }
            }
        }
    }
    pairs
}

fn param_text(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Execute a playground operation with the given input.
pub fn dispatch(
    client: &BackendClient,
    op: &ApiOperation,
    input: &PlaygroundInput,
) -> Result<Value, DispatchError> {
    let path = build_path(op, &input.path_params)?;
    let query_pairs = build_query_pairs(&input.query_params);

    let body = match (&op.request_body, &input.body) {
        (RequestBody::None, _) => None,
        (RequestBody::Unsupported { content_type }, Some(_)) => {
            return Err(InputError::UnsupportedBody {
                content_type: content_type.clone(),
            }
            .into())
        }
        (_, None) if op.request_body_required => return Err(InputError::BodyRequired.into()),
        (_, body) => body.as_ref(),
    };

    tracing::info!(op = %op.label(), %path, "dispatching playground request");
    Ok(client.send(&op.method, &path, &query_pairs, body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_playground_command;
    use crate::config::ConsoleConfig;
    use crate::spec::extract_operations;
    use serde_json::json;

    fn ops_from(paths: Value) -> Vec<ApiOperation> {
        extract_operations(&json!({"openapi": "3.1.0", "paths": paths}))
    }

    fn status_op() -> ApiOperation {
        ops_from(json!({
            "/api/status/{taskId}": {
                "get": {
                    "operationId": "getTaskStatus",
                    "tags": ["Tasks"],
                    "parameters": [
                        {"name": "taskId", "in": "path", "required": true, "schema": {"type": "string"}},
                        {"name": "verbose", "in": "query", "schema": {"type": "boolean"}},
                        {"name": "fields", "in": "query", "schema": {"type": "string"}}
                    ]
                }
            }
        }))
        .remove(0)
    }

    fn create_op(required: bool) -> ApiOperation {
        ops_from(json!({
            "/api/conversations": {
                "post": {
                    "operationId": "createConversation",
                    "tags": ["Conversations"],
                    "requestBody": {
                        "required": required,
                        "content": {"application/json": {"schema": {"type": "object"}}}
                    }
                }
            }
        }))
        .remove(0)
    }

    fn matches_for(op: &ApiOperation, args: &[&str]) -> clap::ArgMatches {
        let ops = vec![op.clone()];
        let root = build_playground_command(&ops);
        let mut full = vec!["call"];
        full.extend_from_slice(args);
        let matches = root.try_get_matches_from(full).unwrap();
        let (_, group) = matches.subcommand().unwrap();
        let (_, op_matches) = group.subcommand().unwrap();
        op_matches.clone()
    }

    fn client_for(server: &mockito::Server) -> BackendClient {
        BackendClient::new(&ConsoleConfig::new(server.url())).unwrap()
    }

    #[test]
    fn manual_input_empty_fields_are_empty() {
        let input = PlaygroundInput::from_manual("", "  ", "").unwrap();
        assert_eq!(input, PlaygroundInput::default());
    }

    #[test]
    fn manual_input_rejects_bad_json_and_non_objects() {
        let err = PlaygroundInput::from_manual("{oops", "", "").unwrap_err();
        assert_eq!(err.to_string(), "invalid JSON in path params");

        let err = PlaygroundInput::from_manual("", "[1,2]", "").unwrap_err();
        assert_eq!(err.to_string(), "query params must be a JSON object");

        let input = PlaygroundInput::from_manual("", "", "[1]").unwrap();
        assert_eq!(input.body, Some(json!([1])));
    }

    #[test]
    fn generated_input_splits_sections() {
        let input = PlaygroundInput::from_generated(&json!({
            "path_params": {"id": "x"},
            "body": {"name": "n"}
        }));
        assert_eq!(input.path_params["id"], "x");
        assert!(input.query_params.is_empty());
        assert_eq!(input.body, Some(json!({"name": "n"})));
    }

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = PlaygroundInput::from_generated(&json!({
            "path_params": {"id": "gen", "other": "keep"},
            "body": {"a": 1}
        }));
        base.overlay(PlaygroundInput::from_manual(r#"{"id": "manual"}"#, "", "").unwrap());
        assert_eq!(base.path_params["id"], "manual");
        assert_eq!(base.path_params["other"], "keep");
        assert_eq!(base.body, Some(json!({"a": 1})));
    }

    #[test]
    fn build_path_encodes_and_requires_params() {
        let op = status_op();
        let mut params = Map::new();
        params.insert("taskId".into(), json!("hello world"));
        assert_eq!(build_path(&op, &params).unwrap(), "/api/status/hello%20world");

        params.insert("taskId".into(), json!(42));
        assert_eq!(build_path(&op, &params).unwrap(), "/api/status/42");

        let err = build_path(&op, &Map::new()).unwrap_err();
        assert!(matches!(err, InputError::MissingPathParam { name } if name == "taskId"));
    }

    #[test]
    fn query_pairs_skip_empty_and_repeat_arrays() {
        let params = json!({"a": null, "b": "", "c": ["x", "", null, "y"], "d": 3, "e": false});
        let pairs = build_query_pairs(params.as_object().unwrap());
        assert_eq!(
            pairs,
            vec![
                ("c".to_string(), "x".to_string()),
                ("c".to_string(), "y".to_string()),
                ("d".to_string(), "3".to_string()),
                ("e".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn from_matches_reads_positionals_flags_and_json_params() {
        let op = status_op();
        let matches = matches_for(
            &op,
            &["tasks", "get-task-status", "p1", "--verbose", "--query-params", r#"{"fields": "name"}"#],
        );
        let input = PlaygroundInput::from_matches(&op, &matches).unwrap();
        assert_eq!(input.path_params["taskId"], "p1");
        assert_eq!(input.query_params["verbose"], true);
        assert_eq!(input.query_params["fields"], "name");
        assert!(input.body.is_none());
    }

    #[test]
    fn from_matches_json_wins_over_fields() {
        let op = create_op(false);
        let matches = matches_for(
            &op,
            &["conversations", "create-conversation", "--json", r#"{"from":"json"}"#, "--field", "from=field"],
        );
        let input = PlaygroundInput::from_matches(&op, &matches).unwrap();
        assert_eq!(input.body, Some(json!({"from": "json"})));
    }

    #[test]
    fn from_matches_fields_parse_json_with_string_fallback() {
        let op = create_op(false);
        let matches = matches_for(
            &op,
            &["conversations", "create-conversation", "-f", "limit=2", "-f", "name=hello world"],
        );
        let input = PlaygroundInput::from_matches(&op, &matches).unwrap();
        assert_eq!(input.body, Some(json!({"limit": 2, "name": "hello world"})));

        let matches = matches_for(&op, &["conversations", "create-conversation", "-f", "no-equals"]);
        let err = PlaygroundInput::from_matches(&op, &matches).unwrap_err();
        assert!(err.to_string().contains("invalid --field format"));
    }

    #[test]
    fn dispatch_sends_get_with_path_and_query() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/status/123")
            .match_query(mockito::Matcher::UrlEncoded("verbose".into(), "true".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"123"}"#)
            .create();

        let op = status_op();
        let input = PlaygroundInput::from_manual(r#"{"taskId":"123"}"#, r#"{"verbose":true}"#, "").unwrap();
        let result = dispatch(&client_for(&server), &op, &input).unwrap();
        assert_eq!(result["id"], "123");
        mock.assert();
    }

    #[test]
    fn dispatch_sends_post_with_json_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/conversations")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({"name": "dinner"})))
            .with_status(200)
            .with_body(r#"{"id":"new"}"#)
            .create();

        let input = PlaygroundInput::from_manual("", "", r#"{"name":"dinner"}"#).unwrap();
        let result = dispatch(&client_for(&server), &create_op(true), &input).unwrap();
        assert_eq!(result["id"], "new");
        mock.assert();
    }

    #[test]
    fn dispatch_requires_body_when_flagged() {
        let server = mockito::Server::new();
        let err = dispatch(&client_for(&server), &create_op(true), &PlaygroundInput::default())
            .unwrap_err();
        assert!(err.to_string().contains("request body is required"));
    }

    #[test]
    fn dispatch_rejects_body_for_unsupported_content_type() {
        let server = mockito::Server::new();
        let op = ops_from(json!({
            "/upload": {"post": {"requestBody": {"content": {"multipart/form-data": {"schema": {}}}}}}
        }))
        .remove(0);
        let input = PlaygroundInput::from_manual("", "", r#"{"file":"x"}"#).unwrap();
        let err = dispatch(&client_for(&server), &op, &input).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Input(InputError::UnsupportedBody { ref content_type })
                if content_type == "multipart/form-data"
        ));
    }

    #[test]
    fn dispatch_reports_http_error_with_detail() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/api/status/none")
            .with_status(404)
            .with_body(r#"{"detail":"Task not found"}"#)
            .create();

        let input = PlaygroundInput::from_manual(r#"{"taskId":"none"}"#, "", "").unwrap();
        let err = dispatch(&client_for(&server), &status_op(), &input).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 404: Task not found");
    }

    #[test]
    fn schema_generation_fills_required_sections_locally() {
        let server = mockito::Server::new();
        let client = client_for(&server);
        let generated =
            generate_input(&status_op(), InputMode::Schema, &DebugConsole::new(&client)).unwrap();
        assert_eq!(generated.input.path_params["taskId"], "test");
        assert!(generated.input.query_params.is_empty());
        assert!(generated.validation_errors.is_empty());
    }

    #[test]
    fn llm_generation_goes_to_backend() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/internal/debug/api-playground/generate-input")
            .match_body(mockito::Matcher::PartialJson(json!({
                "mode": "llm", "method": "POST", "path": "/api/conversations"
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"mode":"llm","input_data":{"body":{"name":"gen"}},"validation_errors":[]}"#)
            .create();

        let client = client_for(&server);
        let generated =
            generate_input(&create_op(true), InputMode::Llm, &DebugConsole::new(&client)).unwrap();
        assert_eq!(generated.input.body, Some(json!({"name": "gen"})));
        mock.assert();
    }
}
