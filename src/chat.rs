//! Chat orchestration.
//!
//! A user turn is sent to `/api/process` and the reply is classified into a
//! [`ReplyKind`]. Confirmation replies are answered by another turn, so the
//! console drives a plain loop over reply kinds instead of nesting handlers.
//! Asynchronous replies leave a pending placeholder in the transcript that
//! [`ChatSession::track_task`] later replaces in place.

use std::collections::HashSet;
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::BackendClient;
use crate::conversations::{Conversation, StoredMessage};
use crate::error::ClientError;
use crate::models::{
    result_fingerprint, ConfirmationRequest, HistoryEntry, ProcessRequest,
    RecommendationResponse, Restaurant, TaskState, TaskStatus, GUIDANCE_INTENT,
};
use crate::polling::{PollLoop, PollOutcome, Pollable, Sleeper, StatusTracker};

pub const CONFIRM_MESSAGE: &str = "Yes, that's correct";
pub const REJECT_MESSAGE: &str = "No, I'd like to change something";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Message body: literal text or a structured view.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Confirmation {
        request: ConfirmationRequest,
        guidance: bool,
    },
    /// Placeholder for a running task; replaced when the task finishes
    Pending {
        task_id: String,
        progress: Option<u32>,
        message: String,
    },
    Recommendations(Vec<Restaurant>),
    Failed {
        task_id: String,
        error: String,
    },
}

impl MessageContent {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Plain-text form used for conversation history and persistence.
    pub fn summary(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Confirmation { request, .. } => request.message.clone(),
            Self::Pending { message, .. } => message.clone(),
            Self::Recommendations(restaurants) => {
                let names: Vec<&str> = restaurants.iter().map(|r| r.name.as_str()).collect();
                format!("Found {} restaurants: {}", restaurants.len(), names.join(", "))
            }
            Self::Failed { error, .. } => format!("Recommendation failed: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(content: MessageContent) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Rebuild a transcript entry from a saved message. Saved result sets
    /// carry their restaurants in `metadata`.
    pub fn from_stored(stored: &StoredMessage) -> Self {
        let role = match stored.role.as_str() {
            "user" => Role::User,
            _ => Role::Assistant,
        };
        let restaurants = stored
            .metadata
            .as_ref()
            .and_then(|meta| meta.get("restaurants"))
            .and_then(|list| serde_json::from_value::<Vec<Restaurant>>(list.clone()).ok());
        let content = match restaurants {
            Some(restaurants) => MessageContent::Recommendations(restaurants),
            None => MessageContent::Text(stored.content.clone()),
        };
        Self { role, content }
    }
}

/// Shape of one backend reply, in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    Text(String),
    Confirmation {
        request: ConfirmationRequest,
        /// Backend wants missing fields filled in; no confirm/reject offered
        guidance: bool,
    },
    Task {
        task_id: String,
    },
    Results(Vec<Restaurant>),
}

impl ReplyKind {
    pub fn classify(resp: RecommendationResponse) -> Self {
        if let Some(reply) = resp.llm_reply.as_ref().filter(|r| !r.is_empty()) {
            return Self::Text(reply.clone());
        }
        if let Some(request) = resp.confirmation_request.clone() {
            let guidance = resp.intent.as_deref() == Some(GUIDANCE_INTENT);
            return Self::Confirmation { request, guidance };
        }
        if let Some(task_id) = resp.task_id() {
            return Self::Task {
                task_id: task_id.to_string(),
            };
        }
        Self::Results(resp.restaurants)
    }

    pub fn offers_confirm_reject(&self) -> bool {
        matches!(self, Self::Confirmation { guidance: false, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationAnswer {
    Confirm,
    Reject,
    /// Free-text correction, sent as a new turn
    Edit(String),
}

/// Message body for `POST /api/conversations/{user_id}/{conversation_id}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Backend calls the chat flow depends on.
pub trait ChatBackend {
    fn process(&self, request: &ProcessRequest) -> Result<RecommendationResponse, ClientError>;

    /// Stream the reply text for `request`, calling `on_chunk` per fragment.
    fn stream_reply(
        &self,
        request: &ProcessRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, ClientError>;

    fn task_status(
        &self,
        task_id: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<TaskStatus, ClientError>;

    fn save_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &SavedMessage,
    ) -> Result<(), ClientError>;
}

/// Transcript and bookkeeping for one conversation.
#[derive(Debug)]
pub struct ChatSession {
    user_id: String,
    conversation_id: Option<String>,
    use_online_agent: bool,
    stream_replies: bool,
    messages: Vec<ChatMessage>,
    saved_results: HashSet<String>,
    completed_tasks: HashSet<String>,
    tracker: StatusTracker<TaskStatus>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id,
            use_online_agent: false,
            stream_replies: false,
            messages: Vec::new(),
            saved_results: HashSet::new(),
            completed_tasks: HashSet::new(),
            tracker: StatusTracker::new(),
        }
    }

    /// Continue a stored conversation. Its turns become history, and result
    /// sets it already holds are not saved again.
    pub fn resume(user_id: impl Into<String>, conversation: &Conversation) -> Self {
        let mut session = Self::new(user_id, Some(conversation.id.clone()));
        for stored in &conversation.messages {
            let message = ChatMessage::from_stored(stored);
            if let MessageContent::Recommendations(restaurants) = &message.content {
                session.saved_results.insert(result_fingerprint(restaurants));
            }
            session.messages.push(message);
        }
        tracing::debug!(
            conversation_id = %conversation.id,
            turns = session.messages.len(),
            "resumed conversation"
        );
        session
    }

    pub fn with_online_agent(mut self, enabled: bool) -> Self {
        self.use_online_agent = enabled;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_replies = enabled;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Prior turns as sent to the backend; placeholders are left out.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !m.content.is_pending())
            .map(|m| HistoryEntry {
                role: m.role.as_str().to_string(),
                content: m.content.summary(),
            })
            .collect()
    }

    /// Send one user turn and record the classified reply.
    ///
    /// `on_chunk` only sees fragments when streaming is enabled and the reply
    /// is plain text.
    pub fn submit<B: ChatBackend>(
        &mut self,
        backend: &B,
        text: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ReplyKind, ClientError> {
        let request = ProcessRequest {
            query: text.to_string(),
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            conversation_history: self.history(),
            use_online_agent: self.use_online_agent,
        };
        self.push(backend, ChatMessage::user(text));

        let response = backend.process(&request)?;
        let kind = ReplyKind::classify(response);
        tracing::debug!(kind = kind_name(&kind), "classified reply");

        match &kind {
            ReplyKind::Text(reply) => {
                let text = if self.stream_replies {
                    self.stream_text(backend, &request, reply, on_chunk)
                } else {
                    reply.clone()
                };
                self.push(backend, ChatMessage::assistant(MessageContent::Text(text)));
            }
            ReplyKind::Confirmation { request, guidance } => {
                self.push(
                    backend,
                    ChatMessage::assistant(MessageContent::Confirmation {
                        request: request.clone(),
                        guidance: *guidance,
                    }),
                );
            }
            ReplyKind::Task { task_id } => {
                self.messages.push(ChatMessage::assistant(MessageContent::Pending {
                    task_id: task_id.clone(),
                    progress: None,
                    message: "Starting recommendation process...".into(),
                }));
            }
            ReplyKind::Results(restaurants) => {
                self.messages.push(ChatMessage::assistant(MessageContent::Recommendations(
                    restaurants.clone(),
                )));
                self.record_result(backend, restaurants);
            }
        }

        Ok(kind)
    }

    /// Answer a confirmation request with a new turn.
    pub fn answer_confirmation<B: ChatBackend>(
        &mut self,
        backend: &B,
        answer: ConfirmationAnswer,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<ReplyKind, ClientError> {
        match answer {
            ConfirmationAnswer::Confirm => self.submit(backend, CONFIRM_MESSAGE, on_chunk),
            ConfirmationAnswer::Reject => self.submit(backend, REJECT_MESSAGE, on_chunk),
            ConfirmationAnswer::Edit(text) => self.submit(backend, &text, on_chunk),
        }
    }

    /// Poll a task until it finishes, re-rendering its placeholder.
    ///
    /// `on_render` is called with the placeholder before the first poll, after
    /// every progress update, and once with the final message.
    pub fn track_task<B, S, R>(
        &mut self,
        backend: &B,
        task_id: &str,
        poll: &PollLoop<S>,
        mut on_render: R,
    ) -> PollOutcome<TaskStatus>
    where
        B: ChatBackend,
        S: Sleeper,
        R: FnMut(&ChatMessage),
    {
        let idx = match self.pending_index() {
            Some(idx) => idx,
            None => {
                self.messages.push(ChatMessage::assistant(MessageContent::Pending {
                    task_id: task_id.to_string(),
                    progress: None,
                    message: "Starting recommendation process...".into(),
                }));
                self.messages.len() - 1
            }
        };
        on_render(&self.messages[idx]);

        let ticket = self.tracker.retarget(task_id);
        let user_id = self.user_id.clone();
        let conversation_id = self.conversation_id.clone();

        let tracker = &mut self.tracker;
        let messages = &mut self.messages;
        let outcome = poll.run(
            tracker,
            &ticket,
            |id| backend.task_status(id, &user_id, conversation_id.as_deref()),
            |status| {
                if let Some(msg) = messages.get_mut(idx) {
                    msg.content = MessageContent::Pending {
                        task_id: status.task_id.clone(),
                        progress: Some(status.progress),
                        message: status.message.clone(),
                    };
                    on_render(msg);
                }
            },
        );

        if let PollOutcome::Finished(status) = &outcome {
            if self.complete_task(backend, status) {
                on_render(&self.messages[idx]);
            }
        }
        outcome
    }

    /// Completion callback for a terminal task status.
    ///
    /// Fires once per task id; later calls (e.g. from a status observed
    /// outside the poll loop) return `false` without touching state. A failed
    /// save is logged and leaves the result visible.
    pub fn complete_task<B: ChatBackend>(&mut self, backend: &B, status: &TaskStatus) -> bool {
        if !status.is_terminal() || self.completed_tasks.contains(&status.task_id) {
            return false;
        }
        self.completed_tasks.insert(status.task_id.clone());

        match status.status {
            TaskState::Completed => {
                let restaurants = status
                    .result
                    .as_ref()
                    .map(|r| r.restaurants.clone())
                    .unwrap_or_default();
                tracing::info!(task_id = %status.task_id, count = restaurants.len(), "task completed");
                self.replace_pending(MessageContent::Recommendations(restaurants.clone()));
                self.record_result(backend, &restaurants);
            }
            _ => {
                let error = status
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| status.message.clone());
                tracing::info!(task_id = %status.task_id, %error, "task failed");
                let content = MessageContent::Failed {
                    task_id: status.task_id.clone(),
                    error,
                };
                self.persist(backend, &ChatMessage::assistant(content.clone()));
                self.replace_pending(content);
            }
        }
        true
    }

    /// Persist a result set unless the same restaurant ids were saved before.
    pub fn save_recommendation_result<B: ChatBackend>(
        &mut self,
        backend: &B,
        restaurants: &[Restaurant],
    ) -> Result<bool, ClientError> {
        let fingerprint = result_fingerprint(restaurants);
        if self.saved_results.contains(&fingerprint) {
            tracing::debug!(%fingerprint, "result already saved");
            return Ok(false);
        }

        if let Some(conversation_id) = &self.conversation_id {
            let content = MessageContent::Recommendations(restaurants.to_vec());
            let message = SavedMessage {
                role: Role::Assistant,
                content: content.summary(),
                metadata: Some(json!({ "restaurants": restaurants })),
            };
            backend.save_message(&self.user_id, conversation_id, &message)?;
        }
        self.saved_results.insert(fingerprint);
        Ok(true)
    }

    /// Save a displayed result set; failures only cost the saved copy, and
    /// the fingerprint stays unrecorded so a later save can retry.
    fn record_result<B: ChatBackend>(&mut self, backend: &B, restaurants: &[Restaurant]) {
        if let Err(err) = self.save_recommendation_result(backend, restaurants) {
            tracing::warn!(error = %err, "failed to save recommendations");
        }
    }

    fn stream_text<B: ChatBackend>(
        &self,
        backend: &B,
        request: &ProcessRequest,
        fallback: &str,
        on_chunk: &mut dyn FnMut(&str),
    ) -> String {
        match backend.stream_reply(request, on_chunk) {
            Ok(streamed) if !streamed.is_empty() => streamed,
            Ok(_) => fallback.to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "reply stream failed, using buffered reply");
                fallback.to_string()
            }
        }
    }

    fn push<B: ChatBackend>(&mut self, backend: &B, message: ChatMessage) {
        self.persist(backend, &message);
        self.messages.push(message);
    }

    fn persist<B: ChatBackend>(&self, backend: &B, message: &ChatMessage) {
        let conversation_id = match &self.conversation_id {
            Some(id) => id,
            None => return,
        };
        let saved = SavedMessage {
            role: message.role,
            content: message.content.summary(),
            metadata: None,
        };
        if let Err(err) = backend.save_message(&self.user_id, conversation_id, &saved) {
            tracing::warn!(error = %err, "failed to save message");
        }
    }

    fn pending_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.content.is_pending())
    }

    fn replace_pending(&mut self, content: MessageContent) {
        match self.pending_index() {
            Some(idx) => self.messages[idx].content = content,
            None => self.messages.push(ChatMessage::assistant(content)),
        }
    }
}

fn kind_name(kind: &ReplyKind) -> &'static str {
    match kind {
        ReplyKind::Text(_) => "text",
        ReplyKind::Confirmation { .. } => "confirmation",
        ReplyKind::Task { .. } => "task",
        ReplyKind::Results(_) => "results",
    }
}

/// One `data:` frame of the reply stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: bool,
}

/// Read server-sent reply frames until `done`, returning the full text.
pub fn read_reply_stream(
    reader: impl BufRead,
    on_chunk: &mut dyn FnMut(&str),
) -> Result<String, ClientError> {
    let mut text = String::new();
    for line in reader.lines() {
        let line = line.map_err(ClientError::StreamRead)?;
        let payload = match line.strip_prefix("data:") {
            Some(payload) => payload.trim(),
            None => continue,
        };
        let chunk: StreamChunk =
            serde_json::from_str(payload).map_err(|_| ClientError::StreamFrame {
                frame: payload.to_string(),
            })?;
        if chunk.error {
            return Err(ClientError::StreamFailed {
                message: chunk.content,
            });
        }
        if !chunk.content.is_empty() {
            on_chunk(&chunk.content);
            text.push_str(&chunk.content);
        }
        if chunk.done {
            break;
        }
    }
    Ok(text)
}

impl ChatBackend for BackendClient {
    fn process(&self, request: &ProcessRequest) -> Result<RecommendationResponse, ClientError> {
        self.post("/api/process", request)
    }

    fn stream_reply(
        &self,
        request: &ProcessRequest,
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, ClientError> {
        let reader = self.post_stream("/api/process/stream", request)?;
        read_reply_stream(reader, on_chunk)
    }

    fn task_status(
        &self,
        task_id: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<TaskStatus, ClientError> {
        let path = format!("/api/status/{}", urlencoding::encode(task_id));
        let mut query = vec![("user_id".to_string(), user_id.to_string())];
        if let Some(conversation_id) = conversation_id {
            query.push(("conversation_id".to_string(), conversation_id.to_string()));
        }
        self.get_with_query(&path, &query)
    }

    fn save_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &SavedMessage,
    ) -> Result<(), ClientError> {
        let path = format!(
            "/api/conversations/{}/{}/messages",
            urlencoding::encode(user_id),
            urlencoding::encode(conversation_id)
        );
        let _: Value = self.post(&path, message)?;
        Ok(())
    }
}
