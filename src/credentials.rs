//! API key resolution.
//!
//! Sources, first match wins:
//!
//! 1. the environment variable named by `credentials.env_var`
//! 2. the same key in the TOML secrets file (`credentials.secrets_file`)
//! 3. an interactive prompt, only when stdin is a terminal
//!
//! Blank values are ignored at every step.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;

use crate::config::CredentialsConfig;
use crate::error::CredentialMissing;

/// Where the key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    SecretsFile,
    Prompt,
}

/// A resolved API key. `Debug` never prints the value.
#[derive(Clone)]
pub struct ApiKey {
    value: String,
    pub source: KeySource,
}

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolve the key from the process environment, the secrets file and, if
/// `interactive` and stdin is a TTY, a prompt on stderr.
pub fn resolve_api_key(
    config: &CredentialsConfig,
    interactive: bool,
) -> Result<ApiKey, CredentialMissing> {
    let prompt = interactive && atty::is(atty::Stream::Stdin);
    resolve_with(
        config,
        |name| std::env::var(name).ok(),
        prompt.then_some(prompt_stdin as fn() -> io::Result<String>),
    )
}

/// Resolution with injectable environment lookup and prompt.
pub fn resolve_with<E, P>(
    config: &CredentialsConfig,
    env: E,
    prompt: Option<P>,
) -> Result<ApiKey, CredentialMissing>
where
    E: Fn(&str) -> Option<String>,
    P: FnOnce() -> io::Result<String>,
{
    if let Some(value) = non_blank(env(&config.env_var)) {
        tracing::debug!(var = %config.env_var, "API key taken from environment");
        return Ok(ApiKey {
            value,
            source: KeySource::Environment,
        });
    }

    if let Some(value) = non_blank(read_secrets_file(&config.secrets_file, &config.env_var)) {
        tracing::debug!(file = %config.secrets_file.display(), "API key taken from secrets file");
        return Ok(ApiKey {
            value,
            source: KeySource::SecretsFile,
        });
    }

    if let Some(prompt) = prompt {
        match prompt() {
            Ok(answer) => {
                if let Some(value) = non_blank(Some(answer)) {
                    return Ok(ApiKey {
                        value,
                        source: KeySource::Prompt,
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not read API key from prompt"),
        }
    }

    Err(CredentialMissing {
        env_var: config.env_var.clone(),
        secrets_file: config.secrets_file.clone(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_secrets_file(path: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<toml::Table>(&content) {
        Ok(table) => table.get(key)?.as_str().map(str::to_string),
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "ignoring malformed secrets file");
            None
        }
    }
}

fn prompt_stdin() -> io::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "🔑 Nhập Google API Key: ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}
