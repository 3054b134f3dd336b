//! Stored conversations and recommendation preferences.
//!
//! Conversations live under `/api/conversations/{user_id}`; each one keeps
//! its saved messages and its own preference set. User-level preferences
//! are separate and apply when no conversation is given.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::BackendClient;
use crate::error::ClientError;

/// Model name the backend records for new conversations.
pub const DEFAULT_MODEL: &str = "RestRec";

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub message_count: u64,
}

/// A message as saved by the messages endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Full conversation, including its messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// Body for `POST /api/update-preferences`. Unset fields fall back to the
/// backend's defaults ("any", SGD 20-60 per person).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restaurant_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor_profiles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dining_purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_range: Option<BudgetRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub min: f64,
    pub max: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_per")]
    pub per: String,
}

fn default_currency() -> String {
    "SGD".into()
}

fn default_per() -> String {
    "person".into()
}

#[derive(Serialize)]
struct UserPreferencesBody<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    update: &'a UserPreferencesUpdate,
}

#[derive(Deserialize)]
struct PreferencesEnvelope {
    #[serde(default)]
    preferences: Value,
}

/// Conversation and preference calls for one user.
#[derive(Debug, Clone, Copy)]
pub struct Conversations<'a> {
    client: &'a BackendClient,
    user_id: &'a str,
}

impl<'a> Conversations<'a> {
    pub fn new(client: &'a BackendClient, user_id: &'a str) -> Self {
        Self { client, user_id }
    }

    fn base(&self) -> String {
        format!("/api/conversations/{}", urlencoding::encode(self.user_id))
    }

    fn path(&self, conversation_id: &str) -> String {
        format!("{}/{}", self.base(), urlencoding::encode(conversation_id))
    }

    pub fn list(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.client.get(&self.base())
    }

    pub fn get(&self, conversation_id: &str) -> Result<Conversation, ClientError> {
        self.client.get(&self.path(conversation_id))
    }

    /// Create a conversation; the backend picks a title when none is given.
    pub fn create(&self, title: Option<&str>) -> Result<Conversation, ClientError> {
        let conversation: Conversation = self
            .client
            .post(&self.base(), &json!({ "title": title, "model": DEFAULT_MODEL }))?;
        tracing::info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    pub fn rename(&self, conversation_id: &str, title: &str) -> Result<Conversation, ClientError> {
        self.client
            .put(&self.path(conversation_id), &json!({ "title": title }))
    }

    pub fn delete(&self, conversation_id: &str) -> Result<(), ClientError> {
        let _: Value = self.client.delete(&self.path(conversation_id))?;
        tracing::info!(conversation_id, "conversation deleted");
        Ok(())
    }

    /// Preferences extracted so far in one conversation.
    pub fn preferences(&self, conversation_id: &str) -> Result<Value, ClientError> {
        let env: PreferencesEnvelope = self
            .client
            .get(&format!("{}/preferences", self.path(conversation_id)))?;
        Ok(env.preferences)
    }

    /// Replace a conversation's preferences, returning what the backend kept.
    pub fn set_preferences(
        &self,
        conversation_id: &str,
        preferences: &Value,
    ) -> Result<Value, ClientError> {
        let env: PreferencesEnvelope = self.client.put(
            &format!("{}/preferences", self.path(conversation_id)),
            preferences,
        )?;
        Ok(env.preferences)
    }

    pub fn user_preferences(&self) -> Result<Value, ClientError> {
        let path = format!("/api/user-preferences/{}", urlencoding::encode(self.user_id));
        let env: PreferencesEnvelope = self.client.get(&path)?;
        Ok(env.preferences)
    }

    pub fn update_user_preferences(
        &self,
        update: &UserPreferencesUpdate,
    ) -> Result<Value, ClientError> {
        let body = UserPreferencesBody {
            user_id: self.user_id,
            update,
        };
        let env: PreferencesEnvelope = self.client.post("/api/update-preferences", &body)?;
        Ok(env.preferences)
    }
}
