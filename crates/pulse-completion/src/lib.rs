mod http;
pub mod structured;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpCompletionClient;
pub use structured::{DecodeError, decode_structured, strip_code_fence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub structured: bool,
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, text: impl Into<String>) -> Self {
        self.messages.insert(0, Message::system(text));
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_output_tokens(mut self, limit: u32) -> Self {
        self.max_output_tokens = Some(limit);
        self
    }

    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion request timed out")]
    Timeout,
    #[error("completion provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("completion provider rate limit exceeded")]
    RateLimited,
    #[error("completion provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response could not be interpreted: {0}")]
    Content(String),
    #[error("completion client is misconfigured: {0}")]
    Config(String),
}

impl CompletionError {
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content(_))
    }
}

// Single remote call, no retries.
pub trait CompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

impl<T: CompletionClient + ?Sized> CompletionClient for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request)
    }
}

impl<T: CompletionClient + ?Sized> CompletionClient for Box<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request)
    }
}
