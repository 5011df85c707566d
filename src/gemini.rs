//! Gemini REST client.
//!
//! Implements [`DocumentStore`] over the Files API and [`ChatModel`] over
//! `generateContent` / `streamGenerateContent`.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upload    | `POST /upload/v1beta/files` (resumable: start, then upload+finalize) |
//! | get       | `GET /v1beta/{files/id}` |
//! | list      | `GET /v1beta/files?pageSize=100&pageToken=…` |
//! | generate  | `POST /v1beta/models/{model}:generateContent` |
//! | stream    | `POST /v1beta/models/{model}:streamGenerateContent?alt=sse` |
//!
//! The API key travels in the `x-goog-api-key` header so it never appears in
//! logged URLs.
//!
//! # Errors
//!
//! Non-2xx responses become [`ProviderError::Http`] carrying the status code
//! and the provider's `status: message` text (e.g. `RESOURCE_EXHAUSTED: …`).
//! A prompt rejected by the content filter becomes [`ProviderError::Blocked`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GeminiConfig;
use crate::error::ProviderError;
use crate::models::{FileState, RemoteDocument};
use crate::traits::{ChatModel, ContentRole, DocumentStore, GenerateRequest, Part, SafetySetting};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";
const LIST_PAGE_SIZE: u32 = 100;
const BLOCKING_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// HTTP client for the Gemini API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post_generate(
        &self,
        method: &str,
        request: &GenerateRequest,
    ) -> Result<Response, ProviderError> {
        let url = self.url(&format!("v1beta/models/{}:{}", self.model, method));
        tracing::debug!(model = %self.model, method, turns = request.contents.len(), "calling model");
        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&WireRequest::from(request))
            .send()
            .await?;
        check(resp).await
    }
}

/// Turn a non-2xx response into [`ProviderError::Http`].
async fn check(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Http {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Extract `status: message` from a Google error body, falling back to the
/// raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        message: String,
        #[serde(default)]
        status: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope { error }) if !error.status.is_empty() => {
            format!("{}: {}", error.status, error.message)
        }
        Ok(Envelope { error }) => error.message,
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl DocumentStore for GeminiClient {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteDocument, ProviderError> {
        tracing::debug!(display_name, size = bytes.len(), "starting resumable upload");
        let start = self
            .client
            .post(self.url("upload/v1beta/files"))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Decode("upload session has no upload URL".into()))?;

        let resp = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let uploaded: FileEnvelope = check(resp).await?.json().await?;
        Ok(uploaded.file.into())
    }

    async fn get(&self, id: &str) -> Result<RemoteDocument, ProviderError> {
        let resp = self
            .client
            .get(self.url(&format!("v1beta/{}", id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let file: WireFile = check(resp).await?.json().await?;
        Ok(file.into())
    }

    async fn list(&self) -> Result<Vec<RemoteDocument>, ProviderError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let resp = self
                .client
                .get(self.url("v1beta/files"))
                .header(API_KEY_HEADER, &self.api_key)
                .query(&query)
                .send()
                .await?;
            let page: ListResponse = check(resp).await?.json().await?;
            documents.extend(page.files.into_iter().map(RemoteDocument::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(count = documents.len(), "listed remote documents");
        Ok(documents)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        let reply: WireResponse = self
            .post_generate("generateContent", request)
            .await?
            .json()
            .await?;
        if let Some(reason) = reply.blocked() {
            return Err(ProviderError::Blocked(reason));
        }
        let text = reply.text();
        if text.is_empty() {
            return Err(ProviderError::Decode("model returned no text".into()));
        }
        Ok(text)
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, ProviderError> {
        let resp = self
            .post_generate("streamGenerateContent?alt=sse", request)
            .await?;

        let mut full = String::new();
        let mut lines = SseBuffer::default();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in lines.push(&chunk) {
                apply_event(&data, &mut full, on_chunk)?;
            }
        }
        // the last event may arrive without a trailing newline
        if let Some(data) = lines.finish() {
            apply_event(&data, &mut full, on_chunk)?;
        }

        if full.is_empty() {
            return Err(ProviderError::Decode("stream ended without text".into()));
        }
        Ok(full)
    }
}

fn apply_event(
    data: &str,
    full: &mut String,
    on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
) -> Result<(), ProviderError> {
    let event: WireResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("bad stream event: {}", e)))?;
    if let Some(reason) = event.blocked() {
        return Err(ProviderError::Blocked(reason));
    }
    let text = event.text();
    if !text.is_empty() {
        full.push_str(&text);
        on_chunk(&text);
    }
    Ok(())
}

/// Splits a server-sent-event byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line is available so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            out.extend(data_payload(&line));
        }
        out
    }

    /// Payload of a final line left unterminated when the stream closed.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

// ---- wire types ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    safety_settings: &'a [SafetySetting],
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<ContentRole>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: WireFileData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

impl<'a> From<&'a Part> for WirePart<'a> {
    fn from(part: &'a Part) -> Self {
        match part {
            Part::Text(text) => WirePart::Text { text },
            Part::File { mime_type, uri } => WirePart::File {
                file_data: WireFileData {
                    mime_type,
                    file_uri: uri,
                },
            },
        }
    }
}

impl<'a> From<&'a GenerateRequest> for WireRequest<'a> {
    fn from(req: &'a GenerateRequest) -> Self {
        WireRequest {
            system_instruction: req.system_instruction.as_deref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart::Text { text }],
            }),
            contents: req
                .contents
                .iter()
                .map(|c| WireContent {
                    role: Some(c.role),
                    parts: c.parts.iter().map(WirePart::from).collect(),
                })
                .collect(),
            safety_settings: &req.safety,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    state: String,
}

impl From<WireFile> for RemoteDocument {
    fn from(f: WireFile) -> Self {
        RemoteDocument {
            id: f.name,
            display_name: f.display_name,
            mime_type: f.mime_type,
            uri: f.uri,
            state: FileState::from_provider(&f.state),
        }
    }
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: WireFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<WireFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    prompt_feedback: Option<WirePromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireReplyContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireReplyContent {
    #[serde(default)]
    parts: Vec<WireReplyPart>,
}

#[derive(Deserialize)]
struct WireReplyPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePromptFeedback {
    block_reason: Option<String>,
}

impl WireResponse {
    /// Why the provider refused to answer, if it did.
    fn blocked(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Some(reason);
        }
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
            .map(str::to_string)
    }

    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
