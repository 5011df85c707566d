//! Provider seams.
//!
//! The synchronizer talks to a [`DocumentStore`]; chat sessions talk to a
//! [`ChatModel`]. [`GeminiClient`](crate::gemini::GeminiClient) implements
//! both over HTTPS, and [`memory`](crate::memory) provides in-process
//! implementations for tests and offline runs.
//!
//! ```text
//!  ┌──────────────┐  upload/get/list   ┌───────────────┐
//!  │ Synchronizer │──────────────────▶│ DocumentStore │
//!  └──────┬───────┘                    └───────────────┘
//!         │ KnowledgeBase
//!         ▼
//!  ┌──────────────┐  generate/stream   ┌───────────────┐
//!  │ ChatSession  │──────────────────▶│   ChatModel   │
//!  └──────────────┘                    └───────────────┘
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SafetyMode;
use crate::error::ProviderError;
use crate::models::RemoteDocument;

/// Remote storage of uploaded documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Upload `bytes` under `display_name`. The returned handle is usually
    /// still pending.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteDocument, ProviderError>;

    /// Fetch the current state of a handle by its provider id.
    async fn get(&self, id: &str) -> Result<RemoteDocument, ProviderError>;

    /// Every handle the provider currently holds for this account.
    async fn list(&self) -> Result<Vec<RemoteDocument>, ProviderError>;
}

/// A remote conversational model.
///
/// The model is stateless from the caller's point of view: every request
/// carries the whole conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError>;

    /// Like [`generate`](ChatModel::generate), delivering text chunks to
    /// `on_chunk` as they arrive. Returns the concatenated reply.
    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    File { mime_type: String, uri: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ContentRole::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: ContentRole::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// Per-category content-filter threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

impl SafetyMode {
    pub fn settings(&self) -> Vec<SafetySetting> {
        match self {
            SafetyMode::Default => Vec::new(),
            SafetyMode::Permissive => HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        }
    }
}

/// A full conversation sent to the model in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub safety: Vec<SafetySetting>,
}

impl GenerateRequest {
    /// Text of the final user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .find(|c| c.role == ContentRole::User)
            .and_then(|c| {
                c.parts.iter().find_map(|p| match p {
                    Part::Text(t) => Some(t.as_str()),
                    Part::File { .. } => None,
                })
            })
    }

    /// URIs of every file referenced anywhere in the conversation.
    pub fn file_uris(&self) -> Vec<&str> {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match p {
                Part::File { uri, .. } => Some(uri.as_str()),
                Part::Text(_) => None,
            })
            .collect()
    }
}
