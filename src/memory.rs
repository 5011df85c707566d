//! In-process [`DocumentStore`] and [`ChatModel`] implementations.
//!
//! Used by the test suites and by `--offline` runs. The document store keeps
//! uploads in a `Vec` behind a `Mutex` and simulates server-side processing:
//! a fresh upload turns `Active` after a configurable number of status checks.
//! Individual names can be made to fail or to stay pending forever.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{FileState, RemoteDocument, PDF_MIME};
use crate::traits::{ChatModel, DocumentStore, GenerateRequest};

struct StoredFile {
    doc: RemoteDocument,
    checks: usize,
}

#[derive(Default)]
struct StoreState {
    files: Vec<StoredFile>,
    uploads: Vec<String>,
    lists: usize,
    next_id: usize,
}

/// Document store for tests and offline runs.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<StoreState>,
    ready_after: usize,
    stuck: HashSet<String>,
    failing_uploads: HashSet<String>,
    failing_processing: HashSet<String>,
    listing_fails: bool,
}

impl InMemoryDocumentStore {
    /// Uploads become `Active` immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads stay `Pending` until `checks` status calls have been made.
    pub fn ready_after(mut self, checks: usize) -> Self {
        self.ready_after = checks;
        self
    }

    /// Seed an `Active` document, as if uploaded by an earlier process.
    pub fn with_existing(self, name: &str) -> Self {
        self.seed(name, FileState::Active);
        self
    }

    /// Seed a document that is still processing.
    pub fn with_pending(self, name: &str) -> Self {
        self.seed(name, FileState::Pending);
        self
    }

    /// Seed a document whose processing failed.
    pub fn with_failed(self, name: &str) -> Self {
        self.seed(name, FileState::Failed);
        self
    }

    /// Documents named `name` never leave `Pending`.
    pub fn never_ready(mut self, name: &str) -> Self {
        self.stuck.insert(name.to_string());
        self
    }

    pub fn fail_upload(mut self, name: &str) -> Self {
        self.failing_uploads.insert(name.to_string());
        self
    }

    /// Uploads of `name` succeed but processing ends `Failed`.
    pub fn fail_processing(mut self, name: &str) -> Self {
        self.failing_processing.insert(name.to_string());
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Display names passed to `upload`, in call order.
    pub fn uploaded_names(&self) -> Vec<String> {
        self.lock().uploads.clone()
    }

    pub fn list_count(&self) -> usize {
        self.lock().lists
    }

    fn seed(&self, name: &str, state: FileState) {
        let mut st = self.lock();
        let doc = new_handle(&mut st, name, PDF_MIME, state);
        st.files.push(StoredFile { doc, checks: 0 });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_after_check(&self, file: &StoredFile) -> FileState {
        let name = &file.doc.display_name;
        if file.doc.state != FileState::Pending {
            file.doc.state
        } else if self.stuck.contains(name) {
            FileState::Pending
        } else if self.failing_processing.contains(name) {
            FileState::Failed
        } else if file.checks >= self.ready_after {
            FileState::Active
        } else {
            FileState::Pending
        }
    }
}

fn new_handle(st: &mut StoreState, name: &str, mime: &str, state: FileState) -> RemoteDocument {
    st.next_id += 1;
    let id = format!("files/mem-{}", st.next_id);
    RemoteDocument {
        uri: format!("mem://{}", id),
        id,
        display_name: name.to_string(),
        mime_type: mime.to_string(),
        state,
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteDocument, ProviderError> {
        let mut st = self.lock();
        st.uploads.push(display_name.to_string());
        if self.failing_uploads.contains(display_name) {
            return Err(ProviderError::Http {
                status: 500,
                message: format!("upload of {} rejected", display_name),
            });
        }

        let mut file = StoredFile {
            doc: new_handle(&mut st, display_name, mime_type, FileState::Pending),
            checks: 0,
        };
        file.doc.state = self.state_after_check(&file);
        let doc = file.doc.clone();
        st.files.push(file);
        Ok(doc)
    }

    async fn get(&self, id: &str) -> Result<RemoteDocument, ProviderError> {
        let mut st = self.lock();
        let file = st
            .files
            .iter_mut()
            .find(|f| f.doc.id == id)
            .ok_or_else(|| ProviderError::Http {
                status: 404,
                message: format!("{} not found", id),
            })?;
        file.checks += 1;
        file.doc.state = self.state_after_check(file);
        Ok(file.doc.clone())
    }

    async fn list(&self) -> Result<Vec<RemoteDocument>, ProviderError> {
        let mut st = self.lock();
        st.lists += 1;
        if self.listing_fails {
            return Err(ProviderError::Http {
                status: 503,
                message: "listing unavailable".to_string(),
            });
        }
        Ok(st.files.iter().map(|f| f.doc.clone()).collect())
    }
}

/// One scripted model response.
#[derive(Debug)]
pub enum Scripted {
    Reply(String),
    Fail(ProviderError),
    /// Streams the chunks, then fails.
    StreamThenFail(Vec<String>, ProviderError),
}

/// Chat model that plays back scripted responses, then echoes.
///
/// With an empty script every request is answered with
/// `"Trả lời: <last user message>"`.
#[derive(Default)]
pub struct ScriptedChatModel {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, next: Scripted) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(next);
        self
    }

    pub fn then_reply(self, text: &str) -> Self {
        self.then(Scripted::Reply(text.to_string()))
    }

    pub fn then_fail(self, err: ProviderError) -> Self {
        self.then(Scripted::Fail(err))
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next(&self, request: &GenerateRequest) -> Scripted {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Scripted::Reply(format!(
                    "Trả lời: {}",
                    request.last_user_text().unwrap_or_default()
                ))
            })
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ProviderError> {
        match self.next(request) {
            Scripted::Reply(text) => Ok(text),
            Scripted::Fail(err) | Scripted::StreamThenFail(_, err) => Err(err),
        }
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, ProviderError> {
        match self.next(request) {
            Scripted::Reply(text) => {
                for piece in text.split_inclusive(' ') {
                    on_chunk(piece);
                }
                Ok(text)
            }
            Scripted::Fail(err) => Err(err),
            Scripted::StreamThenFail(chunks, err) => {
                for chunk in &chunks {
                    on_chunk(chunk);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_poll_until_active() {
        let store = InMemoryDocumentStore::new().ready_after(2);
        let doc = store.upload(vec![1], "a.pdf", PDF_MIME).await.unwrap();
        assert_eq!(doc.state, FileState::Pending);
        assert_eq!(store.get(&doc.id).await.unwrap().state, FileState::Pending);
        assert_eq!(store.get(&doc.id).await.unwrap().state, FileState::Active);
    }

    #[tokio::test]
    async fn immediate_ready_by_default() {
        let store = InMemoryDocumentStore::new();
        let doc = store.upload(vec![1], "a.pdf", PDF_MIME).await.unwrap();
        assert!(doc.is_ready());
        assert_eq!(store.uploaded_names(), vec!["a.pdf"]);
    }

    #[tokio::test]
    async fn listing_shows_seeded_and_uploaded() {
        let store = InMemoryDocumentStore::new().with_existing("cu.pdf");
        store.upload(vec![], "moi.pdf", PDF_MIME).await.unwrap();
        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.display_name)
            .collect();
        assert_eq!(names, vec!["cu.pdf", "moi.pdf"]);
        assert_eq!(store.list_count(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_404() {
        let store = InMemoryDocumentStore::new();
        let err = store.get("files/none").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn scripted_model_plays_script_then_echoes() {
        let model = ScriptedChatModel::new().then_reply("một");
        let req = GenerateRequest {
            system_instruction: None,
            contents: vec![crate::traits::Content::user_text("hai")],
            safety: Vec::new(),
        };
        assert_eq!(model.generate(&req).await.unwrap(), "một");
        assert_eq!(model.generate(&req).await.unwrap(), "Trả lời: hai");
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn scripted_stream_hands_out_chunks() {
        let model = ScriptedChatModel::new()
            .then_reply("thuế suất 10%")
            .then(Scripted::StreamThenFail(
                vec!["nửa ".to_string()],
                ProviderError::Timeout,
            ));
        let req = GenerateRequest {
            system_instruction: None,
            contents: vec![crate::traits::Content::user_text("hỏi")],
            safety: Vec::new(),
        };

        let mut chunks: Vec<String> = Vec::new();
        let full = model
            .generate_stream(&req, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(full, "thuế suất 10%");
        assert_eq!(chunks, vec!["thuế ", "suất ", "10%"]);

        chunks.clear();
        let err = model
            .generate_stream(&req, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout));
        assert_eq!(chunks, vec!["nửa "]);
    }
}
