//! Client library and console for the MetaRec recommendation backend.
//!
//! Talks to the backend over HTTP only: the chat flow (`/api/process`,
//! task polling, conversation persistence), stored conversations and
//! preferences, the admin debug endpoints, and an API playground built from
//! the backend's own OpenAPI document.
//!
//! # Usage
//!
//! ```no_run
//! use metarec_console::{BackendClient, ChatSession, ConsoleConfig, ReplyKind, PollLoop};
//!
//! let config = ConsoleConfig::new("http://localhost:8000").user_id("alice");
//! let client = BackendClient::new(&config).unwrap();
//! let mut chat = ChatSession::new(&config.user_id, None);
//!
//! if let ReplyKind::Task { task_id } = chat.submit(&client, "spicy dinner near Chinatown", &mut |_| {}).unwrap() {
//!     let poll = PollLoop::new(config.task_poll_interval);
//!     chat.track_task(&client, &task_id, &poll, |msg| println!("{msg:?}"));
//! }
//! ```

pub mod builder;
pub mod chat;
pub mod client;
pub mod config;
pub mod conversations;
pub mod debug;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod models;
pub mod polling;
pub mod resolve;
pub mod spec;
pub mod view;

pub use builder::{build_playground_command, find_operation_by_command, normalize_group, normalize_operation_id};
pub use chat::{ChatBackend, ChatMessage, ChatSession, ConfirmationAnswer, MessageContent, ReplyKind};
pub use client::BackendClient;
pub use config::ConsoleConfig;
pub use conversations::Conversations;
pub use debug::DebugConsole;
pub use dispatch::{dispatch, PlaygroundInput};
pub use error::{ClientError, ConfigError, DispatchError, InputError};
pub use input::{synthesize_input_schema, InputMode};
pub use models::{RecommendationResponse, Restaurant, TaskState, TaskStatus};
pub use polling::{CancelFlag, PollLoop, PollOutcome, StatusTracker};
pub use resolve::resolve_schema;
pub use spec::{extract_operations, find_operation, ApiOperation, Param};

// Re-export dependencies for downstream crates
pub use clap;
pub use reqwest;
