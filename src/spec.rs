//! OpenAPI document → flat operation catalog
//!
//! Walks `paths`, resolves every parameter and JSON request body through
//! [`crate::resolve`], and returns operations sorted by path then method.

use serde_json::{json, Value};

use crate::resolve::resolve_schema;

const METHODS: [&str; 7] = ["get", "post", "put", "patch", "delete", "options", "head"];

/// A resolved API operation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ApiOperation {
    /// operationId from the document, if any
    pub operation_id: Option<String>,
    /// HTTP method, upper-cased (GET, POST, ...)
    pub method: String,
    /// URL path template (e.g. "/internal/debug/behavior-tests/{run_id}")
    pub path: String,
    /// Summary, falling back to description
    pub summary: String,
    pub tags: Vec<String>,
    /// Path-level parameters followed by operation-level ones, not de-duplicated
    pub parameters: Vec<Param>,
    pub request_body: RequestBody,
    pub request_body_required: bool,
    /// Resolved `responses` object, kept for display
    pub responses: Value,
}

/// A single resolved parameter.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Param {
    pub name: String,
    pub location: ParamLocation,
    pub description: String,
    pub required: bool,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Other(String),
}

impl ParamLocation {
    fn parse(raw: &str) -> Self {
        match raw {
            "path" => Self::Path,
            "query" => Self::Query,
            "header" => Self::Header,
            "cookie" => Self::Cookie,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Request body as the playground sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    /// JSON body with its resolved schema
    Json { content_type: String, schema: Value },
    /// Body present, but not in a content type inputs can be generated for
    Unsupported { content_type: String },
}

impl ApiOperation {
    pub fn path_params(&self) -> impl Iterator<Item = &Param> {
        self.params_in(ParamLocation::Path)
    }

    pub fn query_params(&self) -> impl Iterator<Item = &Param> {
        self.params_in(ParamLocation::Query)
    }

    fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &Param> {
        self.parameters.iter().filter(move |p| p.location == location)
    }

    pub fn body_schema(&self) -> Option<&Value> {
        match &self.request_body {
            RequestBody::Json { schema, .. } => Some(schema),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.request_body {
            RequestBody::None => None,
            RequestBody::Json { content_type, .. } | RequestBody::Unsupported { content_type } => {
                Some(content_type)
            }
        }
    }

    /// First tag, used as the playground command group.
    pub fn group(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or("other")
    }

    /// `"GET /path"`, used in listings and log fields.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Extract every operation from a raw (unresolved) OpenAPI document.
pub fn extract_operations(document: &Value) -> Vec<ApiOperation> {
    let mut ops = Vec::new();

    let paths = match document.get("paths").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return ops,
    };

    for (path, path_item) in paths {
        let path_level_params = path_item.get("parameters");

        for method in METHODS {
            let operation = match path_item.get(method) {
                Some(op) if op.is_object() => op,
                _ => continue,
            };
            ops.push(extract_single_operation(
                document,
                path,
                method,
                operation,
                path_level_params,
            ));
        }
    }

    ops.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));
    ops
}

/// Find an operation by method (case-insensitive) and exact path template.
pub fn find_operation<'a>(
    ops: &'a [ApiOperation],
    method: &str,
    path: &str,
) -> Option<&'a ApiOperation> {
    ops.iter()
        .find(|op| op.method.eq_ignore_ascii_case(method) && op.path == path)
}

fn extract_single_operation(
    document: &Value,
    path: &str,
    method: &str,
    operation: &Value,
    path_level_params: Option<&Value>,
) -> ApiOperation {
    let operation_id = operation
        .get("operationId")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let summary = operation
        .get("summary")
        .or_else(|| operation.get("description"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tags = operation
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let parameters = collect_params(document, path_level_params, operation.get("parameters"));
    let (request_body, request_body_required) = extract_body(document, operation);

    let responses = operation
        .get("responses")
        .and_then(|r| r.as_object())
        .map(|responses| {
            let resolved = responses
                .iter()
                .map(|(code, response)| (code.clone(), resolve_response(document, response)))
                .collect();
            Value::Object(resolved)
        })
        .unwrap_or_else(|| json!({}));

    ApiOperation {
        operation_id,
        method: method.to_uppercase(),
        path: path.to_string(),
        summary,
        tags,
        parameters,
        request_body,
        request_body_required,
        responses,
    }
}

/// Path-level parameters first, then operation-level ones. Duplicated names
/// are kept as-is.
fn collect_params(
    document: &Value,
    path_level: Option<&Value>,
    operation_level: Option<&Value>,
) -> Vec<Param> {
    [path_level, operation_level]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|param| parse_param(document, param))
        .collect()
}

fn parse_param(document: &Value, raw: &Value) -> Option<Param> {
    let param = resolve_schema(document, raw);
    let name = param.get("name")?.as_str()?.to_string();
    let location = ParamLocation::parse(param.get("in")?.as_str()?);
    let description = param
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let required = param
        .get("required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let schema = param
        .get("schema")
        .map(|s| resolve_schema(document, s))
        .filter(|s| !s.is_null())
        .unwrap_or_else(|| json!({"type": "string"}));

    Some(Param {
        name,
        location,
        description,
        required,
        schema,
    })
}

fn extract_body(document: &Value, operation: &Value) -> (RequestBody, bool) {
    let request_body = match operation.get("requestBody") {
        Some(rb) => resolve_schema(document, rb),
        None => return (RequestBody::None, false),
    };
    let required = request_body
        .get("required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let content = match request_body.get("content").and_then(|c| c.as_object()) {
        Some(content) => content,
        None => return (RequestBody::None, required),
    };

    let content_type = if content.contains_key("application/json") {
        "application/json".to_string()
    } else {
        match content.keys().next() {
            Some(first) => first.clone(),
            None => return (RequestBody::None, required),
        }
    };

    if !is_json_content_type(&content_type) {
        return (RequestBody::Unsupported { content_type }, required);
    }

    let schema = content
        .get(&content_type)
        .and_then(|media| media.get("schema"))
        .map(|s| resolve_schema(document, s))
        .unwrap_or(Value::Null);

    (RequestBody::Json { content_type, schema }, required)
}

fn resolve_response(document: &Value, response: &Value) -> Value {
    let mut response = resolve_schema(document, response);
    if let Some(Value::Object(content)) = response.get_mut("content") {
        for media in content.values_mut() {
            if let Some(schema) = media.get("schema").cloned() {
                media["schema"] = resolve_schema(document, &schema);
            }
        }
    }
    response
}

fn is_json_content_type(content_type: &str) -> bool {
    content_type == "application/json" || content_type.ends_with("+json")
}

/// Check if a JSON schema describes a boolean type.
pub fn is_bool_schema(schema: &Value) -> bool {
    schema.get("type").and_then(|v| v.as_str()) == Some("boolean")
}
