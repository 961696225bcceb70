//! Multi-session registry.
//!
//! Live conversations are cached in memory behind a per-session async lock,
//! so turns for one session are applied strictly one at a time while other
//! sessions proceed independently. A cache miss reloads the session from the
//! persistence adapter. Sessions that are idle or ended and fully saved are
//! dropped from the cache after each operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineKind;
use crate::conversation::{Backend, Conversation, TurnResult};
use crate::engine::Engines;
use crate::error::{IntakeError, IntakeResult};
use crate::llm::{PromptMessage, TriagePayload, triage_or_fallback};
use crate::models::{ConversationSession, DocumentRef, Report, language_by_code};
use crate::report::synthesize_from_triage;
use crate::store::{SessionRecord, SessionSummary};

struct SessionEntry {
    conversation: Arc<Mutex<Conversation>>,
    /// Token of the turn currently holding the conversation lock
    in_flight: StdMutex<Option<CancellationToken>>,
    /// Set once the entry has left the cache; lock holders must reload
    evicted: AtomicBool,
}

impl SessionEntry {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation: Arc::new(Mutex::new(conversation)),
            in_flight: StdMutex::new(None),
            evicted: AtomicBool::new(false),
        }
    }

    fn set_in_flight(&self, token: Option<CancellationToken>) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *slot = token;
    }

    fn cancel_in_flight(&self) {
        let slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = slot.as_ref() {
            token.cancel();
        }
    }
}

/// Stored report for a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub session_id: String,
    pub report: Report,
    pub document: Option<DocumentRef>,
}

/// Entry of the rendered-document listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListing {
    pub filename: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Answer of the one-shot triage call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub reply_text: String,
    pub triage: TriagePayload,
    pub report: Report,
    pub document: Option<DocumentRef>,
    /// The model was unreachable and the offline generator answered
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub struct IntakeService {
    backend: Backend,
    engines: Engines,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl IntakeService {
    pub fn new(backend: Backend, engines: Engines) -> Self {
        Self {
            backend,
            engines,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Create a session and run `start()` on it
    pub async fn create(
        &self,
        engine: Option<EngineKind>,
        language: Option<String>,
    ) -> IntakeResult<TurnResult> {
        let kind = engine.unwrap_or(self.backend.config.engine);
        let language = match language {
            Some(code) => language_by_code(&code)
                .map(|l| l.code.to_string())
                .ok_or_else(|| IntakeError::InvalidState(format!("unsupported language {code}")))?,
            None => self.backend.config.default_language.clone(),
        };

        let session = ConversationSession::new(kind, language);
        let session_id = session.session_id.clone();
        let mut conversation = Conversation::new(session, self.engines.get(kind), self.backend.clone());
        let result = conversation.start().await;

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(SessionEntry::new(conversation)));
        Ok(result)
    }

    /// Lock a session's conversation. An entry evicted while we waited is
    /// dropped and the session reloaded.
    async fn lock(&self, session_id: &str) -> IntakeResult<(Arc<SessionEntry>, OwnedMutexGuard<Conversation>)> {
        loop {
            let entry = self.entry(session_id).await?;
            let guard = entry.conversation.clone().lock_owned().await;
            if !entry.evicted.load(Ordering::Acquire) {
                return Ok((entry, guard));
            }
        }
    }

    /// Drop a settled conversation from the cache; called with its lock held
    async fn release(&self, entry: &Arc<SessionEntry>, conversation: &Conversation) {
        if !conversation.is_settled() {
            return;
        }
        let session_id = &conversation.session().session_id;
        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id).is_some_and(|cached| Arc::ptr_eq(cached, entry)) {
            sessions.remove(session_id);
            debug!("Session {} released from cache", session_id);
        }
        entry.evicted.store(true, Ordering::Release);
    }

    /// Apply one transcript to a session
    pub async fn submit(&self, session_id: &str, text: &str) -> IntakeResult<TurnResult> {
        if text.trim().is_empty() {
            return Err(IntakeError::EmptyInput);
        }
        let (entry, mut conversation) = self.lock(session_id).await?;

        let token = CancellationToken::new();
        entry.set_in_flight(Some(token.clone()));
        let result = conversation.submit(text, &token).await;
        entry.set_in_flight(None);
        self.release(&entry, &conversation).await;
        result
    }

    /// Cancel in-flight work and move the session to `idle`
    pub async fn stop(&self, session_id: &str) -> IntakeResult<TurnResult> {
        self.entry(session_id).await?.cancel_in_flight();
        let (entry, mut conversation) = self.lock(session_id).await?;
        let result = conversation.stop().await;
        self.release(&entry, &conversation).await;
        Ok(result)
    }

    /// Restart the intake on an existing session
    pub async fn restart(&self, session_id: &str) -> IntakeResult<TurnResult> {
        self.entry(session_id).await?.cancel_in_flight();
        let (_entry, mut conversation) = self.lock(session_id).await?;
        Ok(conversation.start().await)
    }

    pub async fn get(&self, session_id: &str) -> IntakeResult<SessionRecord> {
        let (entry, conversation) = self.lock(session_id).await?;
        let record = conversation.snapshot();
        self.release(&entry, &conversation).await;
        Ok(record)
    }

    pub async fn report(&self, session_id: &str) -> IntakeResult<StoredReport> {
        let (entry, conversation) = self.lock(session_id).await?;
        let stored = conversation.report().cloned().map(|report| StoredReport {
            session_id: session_id.to_string(),
            report,
            document: conversation.document().cloned(),
        });
        self.release(&entry, &conversation).await;
        stored.ok_or_else(|| IntakeError::NotFound(format!("report for session {session_id}")))
    }

    /// Rebuild the session's report from its conversation, replacing the old one
    pub async fn regenerate(&self, session_id: &str) -> IntakeResult<TurnResult> {
        let (entry, mut conversation) = self.lock(session_id).await?;

        let token = CancellationToken::new();
        entry.set_in_flight(Some(token.clone()));
        let result = conversation.regenerate_report(&token).await;
        entry.set_in_flight(None);
        self.release(&entry, &conversation).await;
        result
    }

    pub async fn history(&self) -> IntakeResult<Vec<SessionSummary>> {
        self.backend.persistence.summaries().await
    }

    pub async fn documents(&self) -> IntakeResult<Vec<DocumentListing>> {
        let stored = self.backend.documents.list().await?;
        Ok(stored
            .into_iter()
            .map(|d| DocumentListing {
                url: self.backend.config.document_url(&d.filename),
                filename: d.filename,
                created_at: d.modified_at,
            })
            .collect())
    }

    pub async fn document(&self, filename: &str) -> IntakeResult<Vec<u8>> {
        self.backend.documents.read(filename).await
    }

    /// One-shot triage of a single transcript.
    ///
    /// An unreachable model is answered by the offline generator; a render
    /// failure still returns the report, with `note` set.
    pub async fn assistant(
        &self,
        transcript: &str,
        session_id: Option<&str>,
    ) -> IntakeResult<AssistantReply> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(IntakeError::EmptyInput);
        }

        // Unknown sessions fail before the model is asked
        if let Some(id) = session_id {
            let (entry, conversation) = self.lock(id).await?;
            self.release(&entry, &conversation).await;
        }

        let history = vec![PromptMessage::new("user", transcript)];
        let outcome = triage_or_fallback(self.backend.gateway.as_ref(), &history, transcript).await?;
        if outcome.fallback {
            info!("One-shot triage answered offline");
        }

        let (report, document, note) = match session_id {
            Some(id) => {
                let (entry, mut conversation) = self.lock(id).await?;
                let report =
                    synthesize_from_triage(&outcome.payload, Some(conversation.session()), outcome.fallback, Utc::now());
                let attached = conversation.attach_report(report.clone()).await;
                self.release(&entry, &conversation).await;
                let attached = attached?;
                let document = match attached.note {
                    None => conversation.document().cloned(),
                    Some(_) => None,
                };
                (report, document, attached.note)
            }
            None => {
                let report = synthesize_from_triage(&outcome.payload, None, outcome.fallback, Utc::now());
                let scope = uuid::Uuid::new_v4().to_string();
                match self.backend.render(&report, &scope).await {
                    Ok(document) => (report, Some(document), None),
                    Err(e) => {
                        warn!("Render failed for one-shot triage: {}", e);
                        (report, None, Some("render_failed".to_string()))
                    }
                }
            }
        };

        Ok(AssistantReply {
            reply_text: outcome.payload.reply_text.clone(),
            triage: outcome.payload,
            report,
            document,
            fallback: outcome.fallback,
            note,
        })
    }

    #[cfg(test)]
    async fn cached_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cached entry, or reload from the store
    async fn entry(&self, session_id: &str) -> IntakeResult<Arc<SessionEntry>> {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            return Ok(entry.clone());
        }

        let record = self.backend.persistence.load(session_id).await?;
        debug!("Session {} reloaded from store", session_id);
        let engine = self.engines.get(record.conversation.engine);
        let conversation = Conversation::resume(record, engine, self.backend.clone());

        let mut sessions = self.sessions.write().await;
        // Another request may have loaded it meanwhile; keep the first
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionEntry::new(conversation)));
        Ok(entry.clone())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::testing::{service, service_with_gateway};
    use super::*;
    use crate::engine::rules::OPENING_PROMPT;
    use crate::llm::LlmGateway;
    use crate::llm::testing::ScriptedGateway;
    use crate::models::Stage;

    /// Gateway that holds every call for `delay` and records how many overlap
    struct SlowGateway {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        started: Notify,
    }

    impl SlowGateway {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                started: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl LlmGateway for SlowGateway {
        async fn complete(&self, _system: &str, _history: &[PromptMessage]) -> IntakeResult<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(serde_json::json!({
                "replyText": "How long has this been going on?",
                "symptoms": [],
                "escalate": false
            })
            .to_string())
        }
    }

    #[tokio::test]
    async fn test_create_submit_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;

        let created = svc.create(None, None).await.unwrap();
        assert_eq!(created.reply_text, OPENING_PROMPT);
        assert_eq!(created.stage, Stage::AskDisease);

        let turn = svc.submit(&created.session_id, "I have a fever").await.unwrap();
        assert_eq!(turn.stage, Stage::AskLanguage);

        // A fresh service over the same store picks the session up again
        let engines = svc.engines.clone();
        let restarted = IntakeService::new(svc.backend.clone(), engines);
        let record = restarted.get(&created.session_id).await.unwrap();
        assert_eq!(record.conversation.stage, Stage::AskLanguage);
        let turn = restarted.submit(&created.session_id, "Telugu").await.unwrap();
        assert_eq!(turn.stage, Stage::CollectName);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_session_and_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        assert!(matches!(
            svc.submit("missing", "hello").await,
            Err(IntakeError::NotFound(_))
        ));
        assert!(matches!(
            svc.submit("missing", "  ").await,
            Err(IntakeError::EmptyInput)
        ));
        assert!(matches!(
            svc.create(None, Some("xx-XX".into())).await,
            Err(IntakeError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_report_missing_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let created = svc.create(Some(EngineKind::Llm), None).await.unwrap();
        assert!(matches!(
            svc.report(&created.session_id).await,
            Err(IntakeError::NotFound(_))
        ));

        let turn = svc.submit(&created.session_id, "I have a headache").await.unwrap();
        assert!(turn.report.is_some());
        let stored = svc.report(&created.session_id).await.unwrap();
        assert_eq!(stored.report.medications[0].name, "Ibuprofen");
        assert!(stored.document.is_some());

        let listed = svc.documents().await.unwrap();
        assert_eq!(listed.len(), 1);
        let bytes = svc.document(&listed[0].filename).await.unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("Ibuprofen"));
    }

    #[tokio::test]
    async fn test_stop_moves_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let created = svc.create(None, None).await.unwrap();
        let stopped = svc.stop(&created.session_id).await.unwrap();
        assert_eq!(stopped.stage, Stage::Idle);
        assert!(matches!(
            svc.submit(&created.session_id, "fever").await,
            Err(IntakeError::InvalidState(_))
        ));

        let restarted = svc.restart(&created.session_id).await.unwrap();
        assert_eq!(restarted.stage, Stage::AskDisease);
    }

    #[tokio::test]
    async fn test_assistant_one_shot_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let reply = svc.assistant("I have had a headache since morning", None).await.unwrap();
        assert!(reply.fallback);
        assert_eq!(reply.report.medications[0].name, "Ibuprofen");
        assert_eq!(reply.triage.diagnosis.as_deref(), Some("Tension-type headache"));
        assert!(reply.document.is_some());
        assert!(reply.note.is_none());
    }

    #[tokio::test]
    async fn test_assistant_attaches_to_session() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let created = svc.create(None, None).await.unwrap();
        svc.assistant("fever", Some(&created.session_id)).await.unwrap();
        let stored = svc.report(&created.session_id).await.unwrap();
        assert_eq!(stored.report.medications[0].name, "Paracetamol");
    }

    #[tokio::test]
    async fn test_create_keeps_requested_language() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let created = svc.create(None, Some("hi-IN".into())).await.unwrap();
        let record = svc.get(&created.session_id).await.unwrap();
        assert_eq!(record.conversation.language, "hi-IN");
    }

    #[tokio::test]
    async fn test_one_shot_documents_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let a = svc.assistant("I have a fever", None).await.unwrap();
        let b = svc.assistant("I have a fever", None).await.unwrap();

        let (a, b) = (a.document.unwrap(), b.document.unwrap());
        assert_ne!(a.filename, b.filename);
        assert_eq!(svc.documents().await.unwrap().len(), 2);
        assert!(svc.document(&a.filename).await.is_ok());
        assert!(svc.document(&b.filename).await.is_ok());
    }

    #[tokio::test]
    async fn test_settled_sessions_leave_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;

        let mut ids = Vec::new();
        for _ in 0..50 {
            let created = svc.create(None, None).await.unwrap();
            svc.stop(&created.session_id).await.unwrap();
            ids.push(created.session_id);
        }
        assert_eq!(svc.cached_sessions().await, 0);

        // Reads reload from the store without pinning the session again
        let record = svc.get(&ids[0]).await.unwrap();
        assert_eq!(record.conversation.stage, Stage::Idle);
        assert_eq!(svc.cached_sessions().await, 0);

        // A live session stays cached
        svc.restart(&ids[0]).await.unwrap();
        assert_eq!(svc.cached_sessions().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_apply_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, svc) = service(dir.path(), ScriptedGateway::unreachable()).await;
        let svc = Arc::new(svc);
        let id = svc.create(None, None).await.unwrap().session_id;

        let first = tokio::spawn({
            let (svc, id) = (svc.clone(), id.clone());
            async move { svc.submit(&id, "I have a fever").await }
        });
        let second = tokio::spawn({
            let (svc, id) = (svc.clone(), id.clone());
            async move { svc.submit(&id, "Hindi").await }
        });
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        // Each transcript advanced the stage exactly once
        let mut stages = vec![first.stage, second.stage];
        stages.sort_by_key(|s| s.as_str());
        assert_eq!(stages, vec![Stage::AskLanguage, Stage::CollectName]);
        let record = svc.get(&id).await.unwrap();
        assert_eq!(record.conversation.stage, Stage::CollectName);
        assert_eq!(record.conversation.messages.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_model_turns_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(SlowGateway::new(Duration::from_millis(50)));
        let (_store, svc) = service_with_gateway(dir.path(), gateway.clone()).await;
        let svc = Arc::new(svc);
        let id = svc.create(Some(EngineKind::Llm), None).await.unwrap().session_id;

        let turns: Vec<_> = ["I have a cough", "It started on Monday"]
            .into_iter()
            .map(|text| {
                let (svc, id) = (svc.clone(), id.clone());
                tokio::spawn(async move { svc.submit(&id, text).await })
            })
            .collect();
        for turn in turns {
            turn.await.unwrap().unwrap();
        }

        assert_eq!(gateway.max_active.load(Ordering::SeqCst), 1);
        let record = svc.get(&id).await.unwrap();
        // Greeting plus one user message and one reply per transcript
        assert_eq!(record.conversation.messages.len(), 5);
        assert_eq!(record.conversation.stage, Stage::AskDisease);
    }

    #[tokio::test]
    async fn test_stop_drops_late_model_response() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(SlowGateway::new(Duration::from_secs(60)));
        let (store, svc) = service_with_gateway(dir.path(), gateway.clone()).await;
        let svc = Arc::new(svc);
        let id = svc.create(Some(EngineKind::Llm), None).await.unwrap().session_id;

        let turn = tokio::spawn({
            let (svc, id) = (svc.clone(), id.clone());
            async move { svc.submit(&id, "I have a cough").await }
        });
        gateway.started.notified().await;

        let stopped = svc.stop(&id).await.unwrap();
        assert_eq!(stopped.stage, Stage::Idle);
        assert!(matches!(turn.await.unwrap(), Err(IntakeError::Cancelled)));

        let record = svc.get(&id).await.unwrap();
        assert_eq!(record.conversation.stage, Stage::Idle);
        assert!(record.conversation.patient.disease.is_none());
        assert!(
            record
                .conversation
                .messages
                .iter()
                .all(|m| m.content != "I have a cough")
        );
        assert!(record.report.is_none());
        assert_eq!(store.len().await, 1);
    }
}
