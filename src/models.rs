//! Wire types for the recommendation API (`/api/process`, `/api/status`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::polling::Pollable;

/// Intent tag the backend uses when it wants missing fields filled in
/// rather than extracted preferences confirmed.
pub const GUIDANCE_INTENT: &str = "confirmation_no";

const TASK_ID_MARKER: &str = "Task ID:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_person_sgd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_or_walk_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_hours_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_match: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose_match: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps_coordinates: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub step: String,
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub details: Option<String>,
}

impl ThinkingStep {
    /// Task id embedded as `Task ID: <id>` in the step details.
    pub fn task_id(&self) -> Option<&str> {
        let details = self.details.as_deref()?;
        let (_, rest) = details.split_once(TASK_ID_MARKER)?;
        rest.split_whitespace().next()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub message: String,
    #[serde(default)]
    pub preferences: Map<String, Value>,
    #[serde(default = "default_true")]
    pub needs_confirmation: bool,
}

fn default_true() -> bool {
    true
}

/// One backend reply to a user turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    #[serde(default)]
    pub thinking_steps: Option<Vec<ThinkingStep>>,
    #[serde(default)]
    pub confirmation_request: Option<ConfirmationRequest>,
    #[serde(default)]
    pub llm_reply: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub preferences: Option<Map<String, Value>>,
}

impl RecommendationResponse {
    /// First task id announced by a thinking step, if any.
    pub fn task_id(&self) -> Option<&str> {
        self.thinking_steps
            .iter()
            .flatten()
            .find_map(ThinkingStep::task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Processing,
    Completed,
    Error,
    Other(String),
}

impl From<String> for TaskState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Other(raw),
        }
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Processing => "processing".into(),
            TaskState::Completed => "completed".into(),
            TaskState::Error => "error".into(),
            TaskState::Other(raw) => raw,
        }
    }
}

/// Snapshot returned by `GET /api/status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: TaskState,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Option<RecommendationResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Pollable for TaskStatus {
    fn is_terminal(&self) -> bool {
        matches!(self.status, TaskState::Completed | TaskState::Error)
    }
}

/// Body of `POST /api/process` and `/api/process/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest {
    pub query: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub conversation_history: Vec<HistoryEntry>,
    pub use_online_agent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

/// Identity of a result set: restaurant ids, sorted and joined.
pub fn result_fingerprint(restaurants: &[Restaurant]) -> String {
    let mut ids: Vec<&str> = restaurants.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    ids.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_id_is_read_from_thinking_step_details() {
        let resp: RecommendationResponse = serde_json::from_value(json!({
            "restaurants": [],
            "thinking_steps": [{
                "step": "start_processing",
                "description": "Starting recommendation process...",
                "status": "thinking",
                "details": "Task ID: 7f3c-11"
            }]
        }))
        .unwrap();
        assert_eq!(resp.task_id(), Some("7f3c-11"));
    }

    #[test]
    fn task_id_absent_without_marker() {
        let step = ThinkingStep {
            step: "s".into(),
            description: "d".into(),
            status: "thinking".into(),
            details: Some("no id here".into()),
        };
        assert!(step.task_id().is_none());
        assert!(RecommendationResponse::default().task_id().is_none());
    }

    #[test]
    fn task_status_parses_known_and_unknown_states() {
        let done: TaskStatus = serde_json::from_value(json!({
            "task_id": "t1", "status": "completed", "progress": 100, "message": "Done",
            "result": {"restaurants": [{"id": "r1", "name": "Hawker Hall", "type": "casual"}]}
        }))
        .unwrap();
        assert_eq!(done.status, TaskState::Completed);
        assert!(done.is_terminal());
        let result = done.result.unwrap();
        assert_eq!(result.restaurants[0].kind.as_deref(), Some("casual"));

        let odd: TaskStatus =
            serde_json::from_value(json!({"task_id": "t1", "status": "unknown"})).unwrap();
        assert_eq!(odd.status, TaskState::Other("unknown".into()));
        assert!(!odd.is_terminal());
        assert_eq!(odd.progress, 0);
    }

    #[test]
    fn fingerprint_ignores_order() {
        let r = |id: &str| Restaurant {
            id: id.into(),
            name: id.into(),
            ..Default::default()
        };
        assert_eq!(
            result_fingerprint(&[r("b"), r("a"), r("c")]),
            result_fingerprint(&[r("c"), r("b"), r("a")])
        );
        assert_eq!(result_fingerprint(&[r("b"), r("a")]), "a,b");
    }

    #[test]
    fn confirmation_defaults_to_needing_confirmation() {
        let req: ConfirmationRequest =
            serde_json::from_value(json!({"message": "Sichuan near Chinatown?"})).unwrap();
        assert!(req.needs_confirmation);
        assert!(req.preferences.is_empty());
    }
}
