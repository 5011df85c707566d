//! Chat sessions.
//!
//! A [`ChatSession`] owns one user's transcript and, once opened, a
//! conversation context seeded with the knowledge base: the system
//! instruction, a user turn referencing every document, and the model's
//! acknowledgement. Each successful exchange is appended to the context so
//! the model sees the whole conversation on every call.
//!
//! The transcript is what the user sees. A user turn is always recorded; the
//! assistant slot holds either the reply or an explanation of the failure.
//! Failed exchanges never enter the context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ChatConfig, SafetyMode};
use crate::error::ChatError;
use crate::models::Turn;
use crate::sync::KnowledgeBase;
use crate::traits::{ChatModel, Content, ContentRole, GenerateRequest, Part, SafetySetting};

/// Conversation state held for the remote model.
#[derive(Debug, Clone)]
struct ConversationContext {
    system_instruction: String,
    seed: Vec<Content>,
    history: Vec<Content>,
    safety: Vec<SafetySetting>,
    documents: Vec<String>,
}

impl ConversationContext {
    fn seeded(kb: &KnowledgeBase, chat: &ChatConfig, safety: SafetyMode) -> Self {
        let mut parts = vec![Part::Text(chat.seed_prompt.clone())];
        parts.extend(kb.documents.iter().map(|d| Part::File {
            mime_type: d.mime_type.clone(),
            uri: d.uri.clone(),
        }));

        Self {
            system_instruction: chat.system_instruction.clone(),
            seed: vec![
                Content {
                    role: ContentRole::User,
                    parts,
                },
                Content::model_text(chat.acknowledgement.clone()),
            ],
            history: Vec::new(),
            safety: safety.settings(),
            documents: kb.names().into_iter().map(String::from).collect(),
        }
    }

    fn request_for(&self, message: &str) -> GenerateRequest {
        let mut contents = Vec::with_capacity(self.seed.len() + self.history.len() + 1);
        contents.extend(self.seed.iter().cloned());
        contents.extend(self.history.iter().cloned());
        contents.push(Content::user_text(message));
        GenerateRequest {
            system_instruction: Some(self.system_instruction.clone()),
            contents,
            safety: self.safety.clone(),
        }
    }

    fn commit(&mut self, message: &str, reply: &str) {
        self.history.push(Content::user_text(message));
        self.history.push(Content::model_text(reply));
    }
}

/// Accumulates streamed text; nothing is visible in the transcript until
/// [`commit`](PendingReply::commit).
#[derive(Debug, Default)]
pub struct PendingReply {
    text: String,
}

impl PendingReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the text so far.
    pub fn push(&mut self, chunk: &str) -> &str {
        self.text.push_str(chunk);
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn commit(self) -> String {
        self.text
    }

    /// Drop the partial text. Returns how many bytes were discarded.
    pub fn discard(self) -> usize {
        self.text.len()
    }
}

/// One user's conversation.
#[derive(Debug, Default)]
pub struct ChatSession {
    transcript: Vec<Turn>,
    context: Option<ConversationContext>,
}

impl ChatSession {
    /// An unopened session. Messages sent before [`open`](Self::open) are
    /// answered with [`ChatError::NoContext`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the conversation with every document in `kb`. Allowed once.
    pub fn open(
        &mut self,
        kb: &KnowledgeBase,
        chat: &ChatConfig,
        safety: SafetyMode,
    ) -> Result<(), ChatError> {
        if self.context.is_some() {
            return Err(ChatError::AlreadyOpen);
        }
        debug!(documents = kb.len(), "opening chat session");
        self.context = Some(ConversationContext::seeded(kb, chat, safety));
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.context.is_some()
    }

    /// Display names of the documents the session was seeded with.
    pub fn documents(&self) -> &[String] {
        self.context
            .as_ref()
            .map(|c| c.documents.as_slice())
            .unwrap_or(&[])
    }

    pub fn document_count(&self) -> usize {
        self.documents().len()
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Ask a question and wait for the full reply.
    pub async fn send(&mut self, model: &dyn ChatModel, text: &str) -> Result<&Turn, ChatError> {
        let message = self.record_user(text)?;
        let Some(context) = self.context.as_mut() else {
            return self.fail(ChatError::NoContext);
        };

        let request = context.request_for(&message);
        match model.generate(&request).await {
            Ok(reply) => {
                context.commit(&message, &reply);
                self.push(Turn::assistant(reply))
            }
            Err(e) => {
                warn!(model = model.model_name(), error = %e, "chat send failed");
                self.fail(ChatError::classify(e))
            }
        }
    }

    /// Ask a question, handing the growing reply to `on_partial` as chunks
    /// arrive. The reply enters the transcript only once the stream is
    /// complete; a broken stream leaves just the failure explanation.
    pub async fn send_streaming(
        &mut self,
        model: &dyn ChatModel,
        text: &str,
        on_partial: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<&Turn, ChatError> {
        let message = self.record_user(text)?;
        let Some(context) = self.context.as_mut() else {
            return self.fail(ChatError::NoContext);
        };

        let request = context.request_for(&message);
        let mut pending = PendingReply::new();
        let result = model
            .generate_stream(&request, &mut |chunk: &str| {
                on_partial(pending.push(chunk));
            })
            .await;

        match result {
            Ok(_) => {
                let reply = pending.commit();
                context.commit(&message, &reply);
                self.push(Turn::assistant(reply))
            }
            Err(e) => {
                let dropped = pending.discard();
                warn!(model = model.model_name(), error = %e, dropped, "chat stream failed");
                self.fail(ChatError::classify(e))
            }
        }
    }

    fn record_user(&mut self, text: &str) -> Result<String, ChatError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.transcript.push(Turn::user(message));
        Ok(message.to_string())
    }

    fn push(&mut self, turn: Turn) -> Result<&Turn, ChatError> {
        self.transcript.push(turn);
        Ok(&self.transcript[self.transcript.len() - 1])
    }

    fn fail(&mut self, err: ChatError) -> Result<&Turn, ChatError> {
        self.transcript.push(Turn::failed(err.user_message()));
        Err(err)
    }
}

/// Live sessions keyed by id. Each session sits behind its own async mutex,
/// so one user's messages are handled one at a time.
///
/// Sessions live until removed or until [`sweep_idle`](Self::sweep_idle)
/// finds them untouched for longer than the idle limit.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Entry>>,
}

struct Entry {
    session: Arc<Mutex<ChatSession>>,
    last_used: StdMutex<Instant>,
}

impl Entry {
    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: ChatSession) -> Uuid {
        let id = Uuid::new_v4();
        let entry = Entry {
            session: Arc::new(Mutex::new(session)),
            last_used: StdMutex::new(Instant::now()),
        };
        self.write().insert(id, entry);
        id
    }

    /// Look up a session and mark it as used.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Mutex<ChatSession>>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.get(id)?;
        *entry.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        Some(entry.session.clone())
    }

    /// Destroy a session. Returns false if it did not exist.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.write().remove(id).is_some()
    }

    /// Drop sessions not looked up for longer than `max_idle`. Returns how
    /// many were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.idle_for() <= max_idle);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "expired idle sessions");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Entry>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::memory::{Scripted, ScriptedChatModel};
    use crate::models::{FileState, RemoteDocument, Role, TurnStatus, PDF_MIME};
    use crate::sync::SyncReport;

    fn kb(names: &[&str]) -> KnowledgeBase {
        KnowledgeBase {
            documents: names
                .iter()
                .enumerate()
                .map(|(i, n)| RemoteDocument {
                    id: format!("files/{}", i),
                    display_name: n.to_string(),
                    mime_type: PDF_MIME.to_string(),
                    uri: format!("mem://files/{}", i),
                    state: FileState::Active,
                })
                .collect(),
            report: SyncReport::default(),
        }
    }

    fn opened(names: &[&str]) -> ChatSession {
        let mut s = ChatSession::new();
        s.open(&kb(names), &ChatConfig::default(), SafetyMode::Default)
            .unwrap();
        s
    }

    fn rate_limited() -> ProviderError {
        ProviderError::Http {
            status: 429,
            message: "RESOURCE_EXHAUSTED".into(),
        }
    }

    #[tokio::test]
    async fn seeds_every_document() {
        let model = ScriptedChatModel::new();
        let mut s = opened(&["luat_thue_tncn.pdf", "luat_thue_gtgt.pdf"]);
        assert_eq!(s.documents(), ["luat_thue_tncn.pdf", "luat_thue_gtgt.pdf"]);
        assert_eq!(s.document_count(), 2);

        s.send(&model, "Thuế TNCN tính thế nào?").await.unwrap();
        let req = &model.requests()[0];
        assert_eq!(req.file_uris(), vec!["mem://files/0", "mem://files/1"]);
        assert_eq!(req.contents[1].role, ContentRole::Model);
        assert!(req.system_instruction.as_deref().unwrap().contains("Thuế"));
    }

    #[tokio::test]
    async fn reply_follows_user_turn() {
        let model = ScriptedChatModel::new().then_reply("Theo Điều 7...");
        let mut s = opened(&["a.pdf"]);

        let turn = s.send(&model, "  Thuế TNCN tính thế nào?  ").await.unwrap();
        assert_eq!(turn.text, "Theo Điều 7...");

        let t = s.transcript();
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].role, Role::User);
        assert_eq!(t[0].text, "Thuế TNCN tính thế nào?");
        assert_eq!(t[1].role, Role::Assistant);
        assert_eq!(t[1].status, TurnStatus::Complete);
    }

    #[tokio::test]
    async fn history_carries_prior_exchanges() {
        let model = ScriptedChatModel::new();
        let mut s = opened(&["a.pdf"]);
        s.send(&model, "một").await.unwrap();
        s.send(&model, "hai").await.unwrap();

        let second = &model.requests()[1];
        // seed user, seed model, "một", reply, "hai"
        assert_eq!(second.contents.len(), 5);
        assert_eq!(second.last_user_text(), Some("hai"));
    }

    #[tokio::test]
    async fn rate_limit_keeps_user_turn_and_explains() {
        let model = ScriptedChatModel::new().then_fail(rate_limited());
        let mut s = opened(&["a.pdf"]);

        let err = s.send(&model, "Hỏi gì đó").await.unwrap_err();
        assert!(matches!(err, ChatError::RateLimited(_)));

        let t = s.transcript();
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].text, "Hỏi gì đó");
        assert_eq!(t[1].status, TurnStatus::Failed);
        assert!(t[1].text.contains("rate limit"));
        assert!(!t[1].text.contains("RESOURCE_EXHAUSTED"));
    }

    #[tokio::test]
    async fn failed_exchange_is_not_sent_again() {
        let model = ScriptedChatModel::new().then_fail(rate_limited());
        let mut s = opened(&["a.pdf"]);
        let _ = s.send(&model, "lỗi").await;
        s.send(&model, "lần nữa").await.unwrap();

        let retry = &model.requests()[1];
        assert_eq!(retry.contents.len(), 3);
    }

    #[tokio::test]
    async fn unopened_session_records_turn_and_error() {
        let model = ScriptedChatModel::new();
        let mut s = ChatSession::new();

        let err = s.send(&model, "Có ai không?").await.unwrap_err();
        assert!(matches!(err, ChatError::NoContext));
        assert_eq!(s.transcript().len(), 2);
        assert_eq!(s.transcript()[0].text, "Có ai không?");
        assert_eq!(s.transcript()[1].status, TurnStatus::Failed);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_message_records_nothing() {
        let model = ScriptedChatModel::new();
        let mut s = opened(&["a.pdf"]);
        assert!(matches!(
            s.send(&model, "   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(s.transcript().is_empty());
    }

    #[test]
    fn open_twice_is_rejected() {
        let mut s = opened(&["a.pdf"]);
        let err = s
            .open(&kb(&["b.pdf"]), &ChatConfig::default(), SafetyMode::Default)
            .unwrap_err();
        assert!(matches!(err, ChatError::AlreadyOpen));
        assert_eq!(s.documents(), ["a.pdf"]);
    }

    #[tokio::test]
    async fn permissive_safety_is_sent() {
        let model = ScriptedChatModel::new();
        let mut s = ChatSession::new();
        s.open(&kb(&["a.pdf"]), &ChatConfig::default(), SafetyMode::Permissive)
            .unwrap();
        s.send(&model, "x").await.unwrap();
        assert_eq!(model.requests()[0].safety.len(), 4);
    }

    #[tokio::test]
    async fn streaming_commits_only_the_full_reply() {
        let model = ScriptedChatModel::new().then_reply("Thuế suất là 10%");
        let mut s = opened(&["a.pdf"]);
        let mut partials = Vec::new();

        let turn = s
            .send_streaming(&model, "GTGT?", &mut |p: &str| partials.push(p.to_string()))
            .await
            .unwrap();
        assert_eq!(turn.text, "Thuế suất là 10%");
        assert_eq!(partials.first().map(String::as_str), Some("Thuế "));
        assert_eq!(partials.last().map(String::as_str), Some("Thuế suất là 10%"));
        assert_eq!(s.transcript().len(), 2);
    }

    #[tokio::test]
    async fn broken_stream_discards_partial_text() {
        let model = ScriptedChatModel::new().then(Scripted::StreamThenFail(
            vec!["Theo ".into(), "Điều ".into()],
            ProviderError::Timeout,
        ));
        let mut s = opened(&["a.pdf"]);
        let mut seen = String::new();

        let err = s
            .send_streaming(&model, "GTGT?", &mut |p: &str| seen = p.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unknown(_)));
        assert_eq!(seen, "Theo Điều ");

        let t = s.transcript();
        assert_eq!(t.len(), 2);
        assert_eq!(t[1].status, TurnStatus::Failed);
        assert!(!t[1].text.contains("Theo Điều"));
    }

    #[test]
    fn pending_reply_accumulates() {
        let mut p = PendingReply::new();
        assert_eq!(p.push("a"), "a");
        assert_eq!(p.push("b"), "ab");
        assert_eq!(p.text(), "ab");
        assert_eq!(p.discard(), 2);
    }

    #[test]
    fn registry_lifecycle() {
        let reg = SessionRegistry::new();
        assert!(reg.is_empty());
        let id = reg.insert(ChatSession::new());
        assert!(reg.get(&id).is_some());
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&id));
        assert!(!reg.remove(&id));
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn sweep_drops_only_idle_sessions() {
        let reg = SessionRegistry::new();
        let stale = reg.insert(ChatSession::new());
        std::thread::sleep(Duration::from_millis(30));
        let fresh = reg.insert(ChatSession::new());

        assert_eq!(reg.sweep_idle(Duration::from_millis(20)), 1);
        assert!(reg.get(&stale).is_none());
        assert!(reg.get(&fresh).is_some());
        assert_eq!(reg.sweep_idle(Duration::from_secs(60)), 0);
    }

    #[test]
    fn lookup_keeps_session_alive() {
        let reg = SessionRegistry::new();
        let id = reg.insert(ChatSession::new());
        std::thread::sleep(Duration::from_millis(30));
        assert!(reg.get(&id).is_some());

        assert_eq!(reg.sweep_idle(Duration::from_millis(20)), 0);
        assert_eq!(reg.len(), 1);
    }
}
