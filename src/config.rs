//! TOML configuration.
//!
//! Every section has defaults, so a missing file is not an error: the
//! assistant runs against `./tailieu` with the stock Gemini model. When a file
//! is present it is parsed and validated by [`load_config`].
//!
//! ```toml
//! [documents]
//! dir = "tailieu"
//!
//! [gemini]
//! model = "gemini-2.5-flash"
//! safety = "permissive"
//!
//! [sync]
//! poll_interval_ms = 1500
//! processing_timeout_secs = 90
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("tailieu")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub safety: SafetyMode,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            safety: SafetyMode::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

/// Content-filter thresholds applied when a conversation is created.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    /// Send no safety settings; the provider's defaults apply.
    #[default]
    Default,
    /// `BLOCK_NONE` for every harm category.
    Permissive,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Multiplier applied to the poll interval after each check. `1.0` keeps it fixed.
    #[serde(default = "default_poll_backoff")]
    pub poll_backoff: f64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,
    #[serde(default = "default_upload_delay_ms")]
    pub upload_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_backoff: default_poll_backoff(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            processing_timeout_secs: default_processing_timeout_secs(),
            upload_delay_ms: default_upload_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1500
}
fn default_poll_backoff() -> f64 {
    1.0
}
fn default_max_poll_interval_ms() -> u64 {
    5000
}
fn default_processing_timeout_secs() -> u64 {
    90
}
fn default_upload_delay_ms() -> u64 {
    500
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms.max(self.poll_interval_ms))
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn upload_delay(&self) -> Duration {
        Duration::from_millis(self.upload_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Text of the seed user turn that carries the document references.
    #[serde(default = "default_seed_prompt")]
    pub seed_prompt: String,
    /// Seed model turn acknowledging the documents.
    #[serde(default = "default_acknowledgement")]
    pub acknowledgement: String,
    #[serde(default)]
    pub stream: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_instruction: default_system_instruction(),
            seed_prompt: default_seed_prompt(),
            acknowledgement: default_acknowledgement(),
            stream: false,
        }
    }
}

fn default_system_instruction() -> String {
    "Bạn là Chuyên gia Tư vấn Thuế (Tax Expert) dành cho người Việt Nam.\n\
     Dữ liệu: Hãy trả lời CHỈ dựa trên các tài liệu PDF được cung cấp.\n\
     Yêu cầu:\n\
     1. Trích dẫn điều luật cụ thể (Ví dụ: Theo Điều 5, Khoản 2 Luật Thuế GTGT...).\n\
     2. Nếu là Luật mới 2024/2025, hãy nhấn mạnh sự thay đổi so với luật cũ.\n\
     3. Trả lời ngắn gọn, súc tích, dễ hiểu."
        .to_string()
}
fn default_seed_prompt() -> String {
    "Hãy ghi nhớ các tài liệu đính kèm này.".to_string()
}
fn default_acknowledgement() -> String {
    "Đã tiếp nhận toàn bộ văn bản luật. Tôi sẵn sàng giải đáp.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    #[serde(default = "default_env_var")]
    pub env_var: String,
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_var: default_env_var(),
            secrets_file: default_secrets_file(),
        }
    }
}

fn default_env_var() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_secrets_file() -> PathBuf {
    PathBuf::from(".streamlit/secrets.toml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sessions untouched for this long are dropped. `0` keeps them until
    /// deleted.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl ServerConfig {
    pub fn session_idle(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_session_idle_secs() -> u64 {
    3600
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a file that does not exist yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.gemini.model.trim().is_empty() {
        anyhow::bail!("gemini.model must not be empty");
    }
    if config.gemini.timeout_secs == 0 {
        anyhow::bail!("gemini.timeout_secs must be > 0");
    }

    let sync = &config.sync;
    if sync.poll_interval_ms == 0 {
        anyhow::bail!("sync.poll_interval_ms must be > 0");
    }
    if sync.processing_timeout_secs == 0 {
        anyhow::bail!("sync.processing_timeout_secs must be > 0");
    }
    if sync.poll_backoff.is_nan() || sync.poll_backoff < 1.0 {
        anyhow::bail!("sync.poll_backoff must be >= 1.0");
    }

    if config.credentials.env_var.trim().is_empty() {
        anyhow::bail!("credentials.env_var must not be empty");
    }

    Ok(())
}
