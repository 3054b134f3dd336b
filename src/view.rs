//! Plain-text views for the console.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::chat::{ChatMessage, MessageContent, Role};
use crate::conversations::ConversationSummary;
use crate::debug::{DebugRun, RunSummary, TraceEvent, UnitResult};
use crate::models::{ConfirmationRequest, Restaurant};
use crate::spec::ApiOperation;

/// Sequences show at most this many items.
pub const MAX_SEQUENCE_ITEMS: usize = 8;
/// Containers nested deeper than this are elided.
pub const MAX_DEPTH: usize = 2;

const PREVIEW_CHARS: usize = 40;

/// Truncated outline of an arbitrary JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonShape {
    Null,
    Scalar {
        kind: &'static str,
        preview: String,
    },
    Sequence {
        items: Vec<JsonShape>,
        total: usize,
    },
    Mapping(Vec<(String, JsonShape)>),
    /// Container below the depth cap
    Elided {
        kind: &'static str,
        len: usize,
    },
}

impl JsonShape {
    pub fn of(value: &Value) -> Self {
        Self::build(value, 0)
    }

    fn build(value: &Value, depth: usize) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Scalar {
                kind: "boolean",
                preview: b.to_string(),
            },
            Value::Number(n) => Self::Scalar {
                kind: "number",
                preview: n.to_string(),
            },
            Value::String(s) => Self::Scalar {
                kind: "string",
                preview: format!("{:?}", truncate(s, PREVIEW_CHARS)),
            },
            Value::Array(items) if depth >= MAX_DEPTH => Self::Elided {
                kind: "array",
                len: items.len(),
            },
            Value::Object(map) if depth >= MAX_DEPTH => Self::Elided {
                kind: "object",
                len: map.len(),
            },
            Value::Array(items) => Self::Sequence {
                items: items
                    .iter()
                    .take(MAX_SEQUENCE_ITEMS)
                    .map(|v| Self::build(v, depth + 1))
                    .collect(),
                total: items.len(),
            },
            Value::Object(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::build(v, depth + 1)))
                    .collect(),
            ),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, None, 0);
        out
    }

    fn render_into(&self, out: &mut String, key: Option<&str>, indent: usize) {
        let pad = "  ".repeat(indent);
        let label = key.map(|k| format!("{k}: ")).unwrap_or_default();
        match self {
            Self::Null => {
                let _ = writeln!(out, "{pad}{label}null");
            }
            Self::Scalar { kind, preview } => {
                let _ = writeln!(out, "{pad}{label}{kind} {preview}");
            }
            Self::Elided { kind, len } => {
                let _ = writeln!(out, "{pad}{label}{kind} ({len} entries) ...");
            }
            Self::Sequence { items, total } => {
                let _ = writeln!(out, "{pad}{label}array ({total} items)");
                for item in items {
                    item.render_into(out, Some("-"), indent + 1);
                }
                if *total > items.len() {
                    let _ = writeln!(out, "{pad}  ... {} more", total - items.len());
                }
            }
            Self::Mapping(entries) => {
                let _ = writeln!(out, "{pad}{label}object ({} keys)", entries.len());
                for (k, v) in entries {
                    v.render_into(out, Some(k), indent + 1);
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{head}...")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => "(missing)".into(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

pub fn render_restaurant(restaurant: &Restaurant) -> String {
    let mut out = restaurant.name.clone();
    if let Some(rating) = restaurant.rating {
        let _ = write!(out, "  * {rating:.1}");
        if let Some(count) = restaurant.reviews_count {
            let _ = write!(out, " ({count} reviews)");
        }
    }
    out.push('\n');

    let tags: Vec<&str> = [&restaurant.cuisine, &restaurant.kind, &restaurant.area]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .collect();
    if !tags.is_empty() {
        let _ = writeln!(out, "  {}", tags.join(" | "));
    }

    let mut cost = Vec::new();
    if let Some(price) = &restaurant.price {
        cost.push(price.clone());
    }
    if let Some(pp) = &restaurant.price_per_person_sgd {
        cost.push(format!("S${pp} per person"));
    }
    if let Some(walk) = &restaurant.distance_or_walk_time {
        cost.push(walk.clone());
    }
    if !cost.is_empty() {
        let _ = writeln!(out, "  {}", cost.join(" | "));
    }

    let address = restaurant.address.as_ref().or(restaurant.location.as_ref());
    let lines = [
        ("Address", address),
        ("Hours", restaurant.open_hours_note.as_ref()),
        ("Phone", restaurant.phone.as_ref()),
        (
            "Why",
            restaurant.why.as_ref().or(restaurant.reason.as_ref()),
        ),
    ];
    for (label, value) in lines {
        if let Some(value) = value {
            let _ = writeln!(out, "  {label}: {value}");
        }
    }

    let lists = [
        ("Highlights", &restaurant.highlights),
        ("Flavor match", &restaurant.flavor_match),
        ("Purpose match", &restaurant.purpose_match),
    ];
    for (label, items) in lists {
        if let Some(items) = items.as_ref().filter(|i| !i.is_empty()) {
            let _ = writeln!(out, "  {label}: {}", items.join(", "));
        }
    }

    if let Some(sources) = restaurant.sources.as_ref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "  Sources:");
        for (name, url) in sources {
            let _ = writeln!(out, "    {name}: {url}");
        }
    }
    out
}

pub fn render_recommendations(restaurants: &[Restaurant]) -> String {
    if restaurants.is_empty() {
        return "No restaurants matched.\n".into();
    }
    let mut out = format!("{} recommendations\n", restaurants.len());
    for (i, r) in restaurants.iter().enumerate() {
        let _ = write!(out, "\n{}. {}", i + 1, render_restaurant(r));
    }
    out
}

/// Confirmation prompt. Guidance requests get no confirm/reject hint.
pub fn render_confirmation(request: &ConfirmationRequest, guidance: bool) -> String {
    let mut out = format!("{}\n", request.message);
    for (key, value) in &request.preferences {
        let _ = writeln!(out, "  {}: {}", key.replace('_', " "), value_text(value));
    }
    if guidance {
        out.push_str("(reply with the missing details)\n");
    } else {
        out.push_str("[y] confirm  [n] change  or type a correction\n");
    }
    out
}

/// Progress line for a running task; `None` renders the starting state.
pub fn render_progress(progress: Option<u32>, message: &str) -> String {
    match progress {
        None => "[          ] starting...".into(),
        Some(pct) => {
            let filled = (pct.min(100) / 10) as usize;
            format!(
                "[{}{}] {:>3}% {}",
                "#".repeat(filled),
                " ".repeat(10 - filled),
                pct.min(100),
                message
            )
        }
    }
}

pub fn render_message(message: &ChatMessage) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "metarec",
    };
    let body = match &message.content {
        MessageContent::Text(text) => format!("{text}\n"),
        MessageContent::Confirmation { request, guidance } => {
            render_confirmation(request, *guidance)
        }
        MessageContent::Pending {
            progress, message, ..
        } => format!("{}\n", render_progress(*progress, message)),
        MessageContent::Recommendations(restaurants) => render_recommendations(restaurants),
        MessageContent::Failed { task_id, error } => {
            format!("Recommendation failed (task {task_id}): {error}\n")
        }
    };
    format!("{who}> {body}")
}

pub fn render_trace_event(event: &TraceEvent) -> String {
    let mut out = format!(
        "{} [{}] {}: {}",
        event.timestamp, event.status, event.kind, event.label
    );
    if let Some(ms) = event.duration_ms {
        let _ = write!(out, " ({ms} ms)");
    }
    out.push('\n');
    let has_data = match &event.data {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    };
    if has_data {
        for line in JsonShape::of(&event.data).render().lines() {
            let _ = writeln!(out, "    {line}");
        }
    }
    out
}

pub fn render_run_summary(run: &RunSummary) -> String {
    let mut out = format!(
        "{}  {:<16} {:<10} {:>3} events  {}",
        run.id,
        run.kind,
        run.status.as_str(),
        run.event_count,
        run.updated_at.as_deref().unwrap_or("-")
    );
    if let Some(error) = &run.error {
        let _ = write!(out, "  error: {error}");
    }
    out
}

/// One line per conversation; long last messages are cut to 40 chars.
pub fn render_conversation_summary(conversation: &ConversationSummary) -> String {
    let title = if conversation.title.is_empty() {
        "(untitled)"
    } else {
        conversation.title.as_str()
    };
    let mut last: String = conversation.last_message.chars().take(40).collect();
    if conversation.last_message.chars().count() > 40 {
        last.push_str("...");
    }
    format!(
        "{}  {:<24} {:>3} msgs  {}  {}",
        conversation.id, title, conversation.message_count, conversation.updated_at, last
    )
}

pub fn render_run(run: &DebugRun) -> String {
    let mut out = format!("run {} ({}) status={}", run.id, run.kind, run.status.as_str());
    if run.job_running {
        out.push_str(" [job running]");
    }
    out.push('\n');
    if let Some(error) = &run.error {
        let _ = writeln!(out, "error: {error}");
    }
    let _ = writeln!(out, "events ({}):", run.events.len());
    for event in &run.events {
        out.push_str("  ");
        out.push_str(&render_trace_event(event));
    }
    if run.artifacts.as_object().is_some_and(|a| !a.is_empty()) {
        out.push_str("artifacts:\n");
        out.push_str(&JsonShape::of(&run.artifacts).render());
    }
    if let Some(explanation) = &run.explanation {
        let _ = writeln!(
            out,
            "explanation ({}, {} ms):\n{}",
            explanation.generated_at, explanation.duration_ms, explanation.content
        );
    }
    out
}

pub fn render_unit_result(result: &UnitResult) -> String {
    let mut out = format!(
        "{} in {} ms\n",
        if result.ok { "ok" } else { "failed" },
        result.duration_ms
    );
    if let Some(output) = &result.output {
        out.push_str(&JsonShape::of(output).render());
    }
    if let Some(error) = &result.error {
        let _ = writeln!(out, "error: {error}");
    }
    if let Some(traceback) = &result.traceback {
        out.push_str(traceback);
        if !traceback.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Field outline of an object schema, one line per leaf.
pub fn render_form(schema: &Value) -> String {
    let mut out = String::new();
    form_fields(&mut out, schema, "", 0);
    out
}

fn form_fields(out: &mut String, schema: &Value, prefix: &str, depth: usize) {
    let empty = Map::new();
    let props = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, prop) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        let ty = prop.get("type").and_then(Value::as_str).unwrap_or("any");
        let nested = ty == "object" && prop.get("properties").is_some() && depth < MAX_DEPTH;
        if nested {
            form_fields(out, prop, &path, depth + 1);
            continue;
        }
        let marker = if required.contains(&name.as_str()) {
            " (required)"
        } else {
            ""
        };
        let _ = write!(out, "{path:<32} {ty}{marker}");
        if let Some(desc) = prop.get("description").and_then(Value::as_str) {
            let _ = write!(out, "  {desc}");
        }
        out.push('\n');
    }
}

pub fn render_operation(op: &ApiOperation) -> String {
    if op.summary.is_empty() {
        op.label()
    } else {
        format!("{:<40} {}", op.label(), op.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::RunStatus;
    use serde_json::json;

    #[test]
    fn shape_caps_sequence_items() {
        let shape = JsonShape::of(&json!((0..12).collect::<Vec<_>>()));
        match &shape {
            JsonShape::Sequence { items, total } => {
                assert_eq!(items.len(), MAX_SEQUENCE_ITEMS);
                assert_eq!(*total, 12);
            }
            other => panic!("expected sequence, got {other:?}"),
        }
        assert!(shape.render().contains("... 4 more"));
    }

    #[test]
    fn shape_elides_below_two_levels() {
        let shape = JsonShape::of(&json!({"a": {"b": {"c": 1}, "d": [1, 2]}}));
        let JsonShape::Mapping(top) = shape else {
            panic!("expected mapping");
        };
        let JsonShape::Mapping(inner) = &top[0].1 else {
            panic!("expected nested mapping");
        };
        assert_eq!(
            inner[0].1,
            JsonShape::Elided {
                kind: "object",
                len: 1
            }
        );
        assert_eq!(
            inner[1].1,
            JsonShape::Elided {
                kind: "array",
                len: 2
            }
        );
    }

    #[test]
    fn shape_scalars_and_null() {
        assert_eq!(JsonShape::of(&Value::Null), JsonShape::Null);
        assert_eq!(
            JsonShape::of(&json!(true)),
            JsonShape::Scalar {
                kind: "boolean",
                preview: "true".into()
            }
        );
        let long = "x".repeat(50);
        let JsonShape::Scalar { preview, .. } = JsonShape::of(&json!(long)) else {
            panic!("expected scalar");
        };
        assert!(preview.ends_with("...\""));
    }

    #[test]
    fn restaurant_card_lists_present_fields() {
        let r: Restaurant = serde_json::from_value(json!({
            "id": "r1", "name": "Chong Qing Grilled Fish", "rating": 4.4, "reviews_count": 812,
            "cuisine": "Sichuan", "area": "Chinatown", "price_per_person_sgd": "25-35",
            "highlights": ["grilled fish", "mala"], "why": "Matches spicy preference"
        }))
        .unwrap();
        let card = render_restaurant(&r);
        assert!(card.starts_with("Chong Qing Grilled Fish  * 4.4 (812 reviews)"));
        assert!(card.contains("Sichuan | Chinatown"));
        assert!(card.contains("S$25-35 per person"));
        assert!(card.contains("Highlights: grilled fish, mala"));
        assert!(card.contains("Why: Matches spicy preference"));
        assert!(!card.contains("Phone"));
    }

    #[test]
    fn confirmation_guidance_has_no_confirm_hint() {
        let req: ConfirmationRequest = serde_json::from_value(json!({
            "message": "Which area?",
            "preferences": {"location": null, "flavor_tags": ["spicy"]}
        }))
        .unwrap();
        let guidance = render_confirmation(&req, true);
        assert!(!guidance.contains("[y] confirm"));
        assert!(guidance.contains("location: (missing)"));
        assert!(guidance.contains("flavor tags: spicy"));
        assert!(render_confirmation(&req, false).contains("[y] confirm"));
    }

    #[test]
    fn progress_starting_and_partial() {
        assert!(render_progress(None, "").contains("starting"));
        assert_eq!(render_progress(Some(30), "Searching"), "[###       ]  30% Searching");
    }

    #[test]
    fn trace_event_includes_duration_and_data() {
        let event: TraceEvent = serde_json::from_value(json!({
            "timestamp": "2026-01-01T00:00:00+00:00", "type": "process_query",
            "label": "Submitted query", "status": "completed", "duration_ms": 120,
            "data": {"intent": "query"}
        }))
        .unwrap();
        let text = render_trace_event(&event);
        assert!(text.starts_with(
            "2026-01-01T00:00:00+00:00 [completed] process_query: Submitted query (120 ms)"
        ));
        assert!(text.contains("intent: string \"query\""));
    }

    #[test]
    fn conversation_line_truncates_last_message() {
        let conversation: ConversationSummary = serde_json::from_value(json!({
            "id": "c1", "title": "", "message_count": 12, "updated_at": "2026-10-01",
            "last_message": "x".repeat(60)
        }))
        .unwrap();
        let line = render_conversation_summary(&conversation);
        assert!(line.starts_with("c1  (untitled)"));
        assert!(line.contains(" 12 msgs"));
        assert!(line.ends_with(&format!("{}...", "x".repeat(40))));
    }

    #[test]
    fn run_summary_line() {
        let run = RunSummary {
            id: "r1".into(),
            kind: "behavior_track".into(),
            status: RunStatus::Error,
            created_at: None,
            updated_at: None,
            event_count: 2,
            error: Some("boom".into()),
        };
        let line = render_run_summary(&run);
        assert!(line.contains("error"));
        assert!(line.ends_with("error: boom"));
    }

    #[test]
    fn form_marks_required_and_flattens_nested() {
        let schema = json!({
            "type": "object",
            "required": ["path_params"],
            "properties": {
                "path_params": {
                    "type": "object",
                    "required": ["user_id"],
                    "properties": {"user_id": {"type": "string", "description": "owner"}}
                },
                "body": {"type": "object"}
            }
        });
        let form = render_form(&schema);
        assert!(form.contains("path_params.user_id"));
        assert!(form.contains("string (required)  owner"));
        assert!(form.lines().any(|l| l.starts_with("body") && l.ends_with("object")));
    }
}
