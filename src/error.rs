//! Typed error taxonomy.
//!
//! Command plumbing uses `anyhow`; the synchronizer, the provider client and
//! the chat session return these enums so callers can contain failures per
//! file or per turn instead of aborting.

use std::path::PathBuf;
use std::time::Duration;

/// Failure talking to the remote provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error: {status} - {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("prompt blocked by the provider: {0}")]
    Blocked(String),
}

impl ProviderError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Failures while building the knowledge base.
///
/// Only [`SyncError::NoDocumentsFound`] and [`SyncError::EmptyKnowledgeBase`]
/// end a build; the per-file variants are collected in the sync report.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no PDF files found in '{}'", .dir.display())]
    NoDocumentsFound { dir: PathBuf },
    #[error("failed to upload '{name}': {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: ProviderError,
    },
    #[error("'{name}' was still processing after {}s", .waited.as_secs())]
    ProcessingTimeout { name: String, waited: Duration },
    #[error("provider marked '{name}' as failed")]
    ProcessingFailed { name: String },
    #[error("remote document listing unavailable: {0}")]
    ListingUnavailable(#[source] ProviderError),
    #[error("'{name}' shares its display name with another local file")]
    DuplicateName { name: String },
    #[error("no document could be loaded ({} skipped)", .skipped.len())]
    EmptyKnowledgeBase { skipped: Vec<String> },
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single chat turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("{0}")]
    Unknown(String),
    #[error("the session has no knowledge base loaded")]
    NoContext,
    #[error("the session is already open")]
    AlreadyOpen,
    #[error("message must not be empty")]
    EmptyMessage,
}

impl ChatError {
    /// Sort a provider failure into the user-facing categories.
    pub fn classify(err: ProviderError) -> Self {
        match &err {
            ProviderError::Http { status: 429, .. } => ChatError::RateLimited(err.to_string()),
            ProviderError::Http { message, .. } if message.contains("RESOURCE_EXHAUSTED") => {
                ChatError::RateLimited(err.to_string())
            }
            ProviderError::Http { status: 400, .. } | ProviderError::Blocked(_) => {
                ChatError::MalformedRequest(err.to_string())
            }
            ProviderError::Http { message, .. } if message.contains("INVALID_ARGUMENT") => {
                ChatError::MalformedRequest(err.to_string())
            }
            _ => ChatError::Unknown(err.to_string()),
        }
    }

    /// Machine-readable category, used by the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::RateLimited(_) => "rate_limited",
            ChatError::MalformedRequest(_) => "malformed_request",
            ChatError::Unknown(_) => "unknown",
            ChatError::NoContext => "no_context",
            ChatError::AlreadyOpen => "already_open",
            ChatError::EmptyMessage => "empty_message",
        }
    }

    /// Explanation rendered in the assistant slot in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::RateLimited(_) => "⚠️ Hệ thống đang bị giới hạn tần suất truy vấn (rate limit). \
                 Vui lòng đợi khoảng một phút rồi hỏi lại."
                .to_string(),
            ChatError::MalformedRequest(detail) => format!(
                "⚠️ Yêu cầu không hợp lệ hoặc bị bộ lọc nội dung chặn. \
                 Hãy diễn đạt lại câu hỏi. ({})",
                detail
            ),
            ChatError::Unknown(detail) => format!("⚠️ Lỗi kết nối API: {}", detail),
            ChatError::NoContext => "⚠️ Chưa nạp được dữ liệu luật nên không thể trả lời. \
                 Hãy kiểm tra thư mục tài liệu và API key, sau đó tải lại."
                .to_string(),
            ChatError::AlreadyOpen => "⚠️ Phiên hội thoại đã được khởi tạo.".to_string(),
            ChatError::EmptyMessage => "⚠️ Câu hỏi không được để trống.".to_string(),
        }
    }
}

/// No API key could be resolved from any source.
#[derive(Debug, thiserror::Error)]
#[error(
    "no API key found: set the {env_var} environment variable, add {env_var} to {}, \
     or enter it when prompted",
    .secrets_file.display()
)]
pub struct CredentialMissing {
    pub env_var: String,
    pub secrets_file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str) -> ProviderError {
        ProviderError::Http {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn classify_rate_limit() {
        assert!(matches!(
            ChatError::classify(http(429, "quota")),
            ChatError::RateLimited(_)
        ));
        assert!(matches!(
            ChatError::classify(http(503, "RESOURCE_EXHAUSTED")),
            ChatError::RateLimited(_)
        ));
    }

    #[test]
    fn classify_malformed() {
        assert!(matches!(
            ChatError::classify(http(400, "bad")),
            ChatError::MalformedRequest(_)
        ));
        assert!(matches!(
            ChatError::classify(ProviderError::Blocked("SAFETY".into())),
            ChatError::MalformedRequest(_)
        ));
    }

    #[test]
    fn classify_everything_else_unknown() {
        assert!(matches!(
            ChatError::classify(ProviderError::Timeout),
            ChatError::Unknown(_)
        ));
        assert!(matches!(
            ChatError::classify(http(500, "oops")),
            ChatError::Unknown(_)
        ));
    }

    #[test]
    fn user_messages_name_the_category() {
        let rate = ChatError::RateLimited("x".into()).user_message();
        assert!(rate.contains("rate limit"));
        let bad = ChatError::MalformedRequest("x".into()).user_message();
        assert!(bad.contains("không hợp lệ"));
        assert_ne!(rate, bad);
    }

    #[test]
    fn credential_message_is_actionable() {
        let err = CredentialMissing {
            env_var: "GOOGLE_API_KEY".into(),
            secrets_file: PathBuf::from(".streamlit/secrets.toml"),
        };
        let msg = err.to_string();
        assert!(msg.contains("GOOGLE_API_KEY"));
        assert!(msg.contains("secrets.toml"));
    }
}
