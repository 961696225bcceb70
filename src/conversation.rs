//! Per-session driver.
//!
//! Owns one [`ConversationSession`] and runs every turn through the engine,
//! the document renderer and the persistence adapter. The engine always
//! works on a copy; the copy replaces the live session only when the turn
//! succeeds and was not cancelled.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::IntakeConfig;
use crate::engine::{ConversationEngine, REPROMPT, RETRY_PROMPT};
use crate::error::{IntakeError, IntakeResult};
use crate::llm::{LlmGateway, offline_triage, request_report};
use crate::models::{ConversationSession, DocumentRef, Report, Role, Stage};
use crate::report::{
    DocumentRenderer, synthesize_from_session, synthesize_from_summary, synthesize_from_triage,
};
use crate::store::{DocumentStore, PersistenceAdapter, SessionRecord, SessionUpdate};

/// Collaborators shared by every conversation
#[derive(Clone)]
pub struct Backend {
    pub persistence: PersistenceAdapter,
    pub documents: Arc<DocumentStore>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub gateway: Arc<dyn LlmGateway>,
    pub config: Arc<IntakeConfig>,
}

impl Backend {
    /// Render a report and store the document
    pub async fn render(&self, report: &Report, session_id: &str) -> IntakeResult<DocumentRef> {
        let rendered = self.renderer.render(report, session_id)?;
        self.documents
            .save(&rendered)
            .await
            .map_err(|e| IntakeError::Render(e.to_string()))?;
        Ok(DocumentRef {
            url: self.config.document_url(&rendered.filename),
            filename: rendered.filename,
            created_at: Utc::now(),
        })
    }
}

/// What the caller gets back from a turn
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub session_id: String,
    pub stage: Stage,
    pub replies: Vec<String>,
    /// Replies joined for clients that speak a single string
    pub reply_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub ended: bool,
    /// Whether the session record reached the store on this turn
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub struct Conversation {
    session: ConversationSession,
    engine: Arc<dyn ConversationEngine>,
    backend: Backend,
    report: Option<Report>,
    document: Option<DocumentRef>,
    updated_at: DateTime<Utc>,
    /// Last save failed; the next turn writes the full record again
    save_pending: bool,
}

impl Conversation {
    pub fn new(
        session: ConversationSession,
        engine: Arc<dyn ConversationEngine>,
        backend: Backend,
    ) -> Self {
        Self {
            updated_at: session.created_at,
            session,
            engine,
            backend,
            report: None,
            document: None,
            save_pending: false,
        }
    }

    /// Rebuild from the stored record after a restart or cache miss
    pub fn resume(
        record: SessionRecord,
        engine: Arc<dyn ConversationEngine>,
        backend: Backend,
    ) -> Self {
        Self {
            session: record.conversation,
            engine,
            backend,
            report: record.report,
            document: record.document,
            updated_at: record.updated_at,
            save_pending: false,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    /// Idle or ended with everything saved, so the store alone can rebuild it
    pub fn is_settled(&self) -> bool {
        matches!(self.session.stage, Stage::Idle | Stage::Ended) && !self.save_pending
    }

    /// Current state in its persisted shape
    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.session.session_id.clone(),
            conversation: self.session.clone(),
            report: self.report.clone(),
            document: self.document.clone(),
            created_at: self.session.created_at,
            updated_at: self.updated_at,
        }
    }

    /// `start()`: reset the intake and emit the opening prompt
    pub async fn start(&mut self) -> TurnResult {
        let outcome = self.engine.start(&mut self.session);
        info!(
            "Session {} started ({:?} engine)",
            self.session.session_id,
            self.engine.kind()
        );
        let persisted = self.persist().await;
        self.result(outcome.replies, None, None, false, persisted, None)
    }

    /// Apply one normalized transcript.
    ///
    /// Unintelligible turns degrade to a re-prompt with the stage unchanged.
    /// A schema violation from the model is returned as an error after the
    /// retry prompt is recorded, also with the stage unchanged.
    pub async fn submit(&mut self, text: &str, cancel: &CancellationToken) -> IntakeResult<TurnResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntakeError::EmptyInput);
        }
        if !self.session.stage.accepts_input() {
            return Err(IntakeError::InvalidState(format!(
                "session {} is {}",
                self.session.session_id, self.session.stage
            )));
        }

        let mut draft = self.session.clone();
        let engine = self.engine.clone();
        let result = cancellable(cancel, engine.respond(&mut draft, text)).await;

        match result {
            Ok(outcome) => {
                self.session = draft;

                let mut note = None;
                let mut document_url = None;
                if let Some(report) = &outcome.report {
                    self.report = Some(report.clone());
                    match self.backend.render(report, &self.session.session_id).await {
                        Ok(document) => {
                            document_url = Some(document.url.clone());
                            self.document = Some(document);
                        }
                        Err(e) => {
                            warn!("Render failed for session {}: {}", self.session.session_id, e);
                            note = Some("render_failed".to_string());
                        }
                    }
                }

                let persisted = self.persist().await;
                Ok(self.result(
                    outcome.replies,
                    outcome.report,
                    document_url,
                    outcome.ended,
                    persisted,
                    note,
                ))
            }
            Err(IntakeError::Cancelled) => {
                info!(
                    "Session {}: turn cancelled, late response dropped",
                    self.session.session_id
                );
                Err(IntakeError::Cancelled)
            }
            Err(e @ IntakeError::SchemaViolation { .. }) => {
                warn!(
                    "Session {}: unusable model response in {}: {}",
                    self.session.session_id, self.session.stage, e
                );
                self.session.push_user(text);
                self.session.push_assistant(RETRY_PROMPT);
                self.persist().await;
                Err(e)
            }
            Err(e) => {
                warn!(
                    "Session {}: turn failed in {}: {}",
                    self.session.session_id, self.session.stage, e
                );
                self.session.push_user(text);
                self.session.push_assistant(REPROMPT);
                let persisted = self.persist().await;
                Ok(self.result(
                    vec![REPROMPT.to_string()],
                    None,
                    None,
                    false,
                    persisted,
                    Some("reprompt".to_string()),
                ))
            }
        }
    }

    /// Move a live session back to `idle`; an ended session stays ended.
    /// Any stored report is left as it is.
    pub async fn stop(&mut self) -> TurnResult {
        if !self.session.stage.is_terminal() {
            self.session.stage = Stage::Idle;
        }
        info!("Session {} stopped", self.session.session_id);
        let persisted = self.persist().await;
        self.result(Vec::new(), None, None, self.session.stage.is_terminal(), persisted, None)
    }

    /// Summarize the whole conversation into a fresh report, replacing the
    /// stored one.
    ///
    /// An unreachable model falls back to rule-based synthesis, or to the
    /// offline triage when no complaint was captured.
    pub async fn regenerate_report(&mut self, cancel: &CancellationToken) -> IntakeResult<TurnResult> {
        if !self.session.messages.iter().any(|m| m.role == Role::User) {
            return Err(IntakeError::EmptyInput);
        }

        let now = Utc::now();
        let gateway = self.backend.gateway.clone();
        let summary = cancellable(cancel, request_report(gateway.as_ref(), &self.session.messages)).await;

        let report = match summary {
            Ok(payload) => synthesize_from_summary(&payload, &self.session, now),
            Err(IntakeError::UpstreamUnreachable(reason)) => {
                warn!(
                    "Session {}: model unreachable for report ({}), using rules",
                    self.session.session_id, reason
                );
                match synthesize_from_session(&self.session, now) {
                    Ok(report) => report,
                    Err(_) => {
                        let transcript = user_transcript(&self.session);
                        synthesize_from_triage(&offline_triage(&transcript), Some(&self.session), true, now)
                    }
                }
            }
            Err(e) => return Err(e),
        };

        self.attach_report(report).await
    }

    /// Store an externally produced report (one-shot triage) on this session
    pub async fn attach_report(&mut self, report: Report) -> IntakeResult<TurnResult> {
        let mut note = None;
        let mut document_url = None;
        match self.backend.render(&report, &self.session.session_id).await {
            Ok(document) => {
                document_url = Some(document.url.clone());
                self.document = Some(document);
            }
            Err(e) => {
                warn!("Render failed for session {}: {}", self.session.session_id, e);
                note = Some("render_failed".to_string());
            }
        }
        self.report = Some(report.clone());
        let persisted = self.persist().await;
        Ok(self.result(Vec::new(), Some(report), document_url, false, persisted, note))
    }

    /// Write the full record; a failure is logged and retried on the next turn
    async fn persist(&mut self) -> bool {
        let mut update = SessionUpdate::conversation(&self.session);
        update.report = self.report.clone();
        update.document = self.document.clone();

        match self.backend.persistence.save(&self.session.session_id, update).await {
            Ok(record) => {
                if self.save_pending {
                    info!("Session {}: pending save recovered", self.session.session_id);
                }
                self.save_pending = false;
                self.updated_at = record.updated_at;
                true
            }
            Err(e) => {
                warn!(
                    "Session {}: save failed, will retry next turn: {}",
                    self.session.session_id, e
                );
                self.save_pending = true;
                false
            }
        }
    }

    fn result(
        &self,
        replies: Vec<String>,
        report: Option<Report>,
        document_url: Option<String>,
        ended: bool,
        persisted: bool,
        note: Option<String>,
    ) -> TurnResult {
        TurnResult {
            session_id: self.session.session_id.clone(),
            stage: self.session.stage,
            reply_text: replies.join(" "),
            replies,
            report,
            document_url,
            ended,
            persisted,
            note,
        }
    }
}

/// Race a future against cancellation; cancellation wins ties
async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = IntakeResult<T>>,
) -> IntakeResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IntakeError::Cancelled),
        result = work => result,
    }
}

fn user_transcript(session: &ConversationSession) -> String {
    session
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(". ")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use super::*;
    use crate::report::TextRenderer;
    use crate::store::MemorySessionStore;

    /// Backend over an in-memory store and a temp document dir
    pub async fn backend(
        dir: &Path,
        store: Arc<MemorySessionStore>,
        gateway: Arc<dyn LlmGateway>,
    ) -> Backend {
        let config = IntakeConfig {
            data_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Backend {
            persistence: PersistenceAdapter::new(store),
            documents: Arc::new(DocumentStore::new(config.reports_dir()).await.unwrap()),
            renderer: Arc::new(TextRenderer),
            gateway,
            config: Arc::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::testing::backend;
    use super::*;
    use crate::config::EngineKind;
    use crate::engine::{DelegatedEngine, RuleEngine, TurnOutcome};
    use crate::classifier::{ConfirmPolicy, FEVER_FOLLOW_UPS};
    use crate::llm::testing::ScriptedGateway;
    use crate::report::RenderedDocument;
    use crate::store::MemorySessionStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemorySessionStore>,
        backend: Backend,
    }

    async fn fixture(gateway: ScriptedGateway) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySessionStore::new());
        let backend = backend(dir.path(), store.clone(), Arc::new(gateway)).await;
        Fixture {
            _dir: dir,
            store,
            backend,
        }
    }

    async fn rules_conversation(fx: &Fixture) -> Conversation {
        let session = ConversationSession::new(EngineKind::Rules, "en-IN");
        let mut conversation = Conversation::new(session, Arc::new(RuleEngine::default()), fx.backend.clone());
        conversation.start().await;
        conversation
    }

    async fn say(conversation: &mut Conversation, text: &str) -> TurnResult {
        conversation
            .submit(text, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_intake_persists_report_and_document() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let mut conversation = rules_conversation(&fx).await;

        say(&mut conversation, "fever").await;
        say(&mut conversation, "English").await;
        say(&mut conversation, "Asha Rao").await;
        say(&mut conversation, "34").await;
        let mut last = None;
        for _ in 0..FEVER_FOLLOW_UPS.len() {
            last = Some(say(&mut conversation, "yes").await);
        }
        let last = last.unwrap();

        assert_eq!(last.stage, Stage::Confirm);
        let report = last.report.clone().unwrap();
        let url = last.document_url.clone().unwrap();
        assert!(url.starts_with("/reports/Asha_Rao_fever_"));
        assert!(last.persisted);

        // Round-trip through the store is structurally identical
        let stored = fx.backend.persistence.load(&conversation.session().session_id).await.unwrap();
        assert_eq!(stored.report.as_ref(), Some(&report));
        assert_eq!(&stored.conversation, conversation.session());
        assert_eq!(fx.backend.documents.list().await.unwrap().len(), 1);

        let end = say(&mut conversation, "no thank you").await;
        assert!(end.ended);
        assert_eq!(end.stage, Stage::Ended);
        // The report survives the end of the session
        let stored = fx.backend.persistence.load(&end.session_id).await.unwrap();
        assert_eq!(stored.report, Some(report));
    }

    #[tokio::test]
    async fn test_persistence_failure_retried_next_turn() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let mut conversation = rules_conversation(&fx).await;

        fx.store.set_fail_writes(true);
        let turn = say(&mut conversation, "skin rash").await;
        assert!(!turn.persisted);
        assert_eq!(turn.stage, Stage::AskLanguage);

        fx.store.set_fail_writes(false);
        let turn = say(&mut conversation, "Hindi").await;
        assert!(turn.persisted);
        let stored = fx.backend.persistence.load(&turn.session_id).await.unwrap();
        assert_eq!(stored.conversation.patient.disease.as_deref(), Some("skin rash"));
        assert_eq!(stored.conversation.language, "hi-IN");
    }

    #[tokio::test]
    async fn test_schema_violation_keeps_stage() {
        let fx = fixture(ScriptedGateway::new(vec![Ok("garbage".to_string())])).await;
        let gateway = fx.backend.gateway.clone();
        let engine = Arc::new(DelegatedEngine::new(gateway, ConfirmPolicy::Keyword));
        let session = ConversationSession::new(EngineKind::Llm, "en-IN");
        let mut conversation = Conversation::new(session, engine, fx.backend.clone());
        conversation.start().await;

        let err = conversation
            .submit("headache", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::SchemaViolation { .. }));
        assert_eq!(conversation.session().stage, Stage::AskDisease);
        let last = conversation.session().messages.last().unwrap();
        assert_eq!(last.content, RETRY_PROMPT);
    }

    struct SlowEngine;

    #[async_trait]
    impl ConversationEngine for SlowEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Llm
        }

        fn start(&self, session: &mut ConversationSession) -> TurnOutcome {
            session.stage = Stage::AskDisease;
            TurnOutcome::reply("hello")
        }

        async fn respond(
            &self,
            session: &mut ConversationSession,
            _text: &str,
        ) -> IntakeResult<TurnOutcome> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            session.stage = Stage::Confirm;
            Ok(TurnOutcome::reply("late"))
        }
    }

    #[tokio::test]
    async fn test_cancelled_turn_is_dropped() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let session = ConversationSession::new(EngineKind::Llm, "en-IN");
        let mut conversation = Conversation::new(session, Arc::new(SlowEngine), fx.backend.clone());
        conversation.start().await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = conversation.submit("anything", &cancel).await.unwrap_err();
        assert!(matches!(err, IntakeError::Cancelled));
        assert_eq!(conversation.session().stage, Stage::AskDisease);
        assert!(conversation.session().messages.is_empty());

        let stopped = conversation.stop().await;
        assert_eq!(stopped.stage, Stage::Idle);
    }

    #[tokio::test]
    async fn test_unintelligible_turn_reprompts() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let mut conversation = rules_conversation(&fx).await;
        conversation.session.stage = Stage::Followups;

        // No follow-up set and no complaint: synthesis cannot run
        let turn = say(&mut conversation, "something").await;
        assert_eq!(turn.replies, vec![REPROMPT.to_string()]);
        assert_eq!(turn.stage, Stage::Followups);
        assert_eq!(turn.note.as_deref(), Some("reprompt"));
    }

    #[tokio::test]
    async fn test_rejects_input_when_idle_or_empty() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let session = ConversationSession::new(EngineKind::Rules, "en-IN");
        let mut conversation = Conversation::new(session, Arc::new(RuleEngine::default()), fx.backend.clone());

        let cancel = CancellationToken::new();
        assert!(matches!(
            conversation.submit("fever", &cancel).await,
            Err(IntakeError::InvalidState(_))
        ));
        conversation.start().await;
        assert!(matches!(
            conversation.submit("   ", &cancel).await,
            Err(IntakeError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_regenerate_overwrites_report() {
        let summary = serde_json::json!({
            "patientInfo": {"name": "Asha", "age": "34"},
            "chiefComplaint": "Cough for a week",
            "assessment": "Likely bronchitis",
            "followUp": "Review in 5 days"
        })
        .to_string();
        let fx = fixture(ScriptedGateway::new(vec![Ok(format!("```json\n{summary}\n```"))])).await;
        let mut conversation = rules_conversation(&fx).await;
        say(&mut conversation, "cough").await;

        let cancel = CancellationToken::new();
        let first = conversation.regenerate_report(&cancel).await.unwrap();
        assert_eq!(first.report.as_ref().unwrap().diagnosis, "Likely bronchitis");

        // Model now unreachable: rules take over and replace the stored report
        let second = conversation.regenerate_report(&cancel).await.unwrap();
        let report = second.report.unwrap();
        assert_eq!(report.chief_complaint, "cough");
        assert_eq!(report.medications[0].name, "Guaifenesin");

        let stored = fx.backend.persistence.load(&second.session_id).await.unwrap();
        assert_eq!(stored.report, Some(report));
    }

    #[tokio::test]
    async fn test_regenerate_requires_user_messages() {
        let fx = fixture(ScriptedGateway::unreachable()).await;
        let mut conversation = rules_conversation(&fx).await;
        let err = conversation
            .regenerate_report(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::EmptyInput));
    }

    struct BrokenRenderer;

    impl DocumentRenderer for BrokenRenderer {
        fn extension(&self) -> &'static str {
            "pdf"
        }

        fn render(&self, _report: &Report, _session_id: &str) -> IntakeResult<RenderedDocument> {
            Err(IntakeError::Render("renderer offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_render_failure_is_isolated() {
        let mut fx = fixture(ScriptedGateway::unreachable()).await;
        fx.backend.renderer = Arc::new(BrokenRenderer);
        let engine = Arc::new(DelegatedEngine::new(fx.backend.gateway.clone(), ConfirmPolicy::Keyword));
        let session = ConversationSession::new(EngineKind::Llm, "en-IN");
        let mut conversation = Conversation::new(session, engine, fx.backend.clone());
        conversation.start().await;

        let turn = say(&mut conversation, "fever and chills").await;
        assert_eq!(turn.note.as_deref(), Some("render_failed"));
        assert!(turn.report.is_some());
        assert!(turn.document_url.is_none());
        assert_eq!(turn.stage, Stage::Confirm);

        let stored = fx.backend.persistence.load(&turn.session_id).await.unwrap();
        assert!(stored.report.is_some());
        assert!(stored.document.is_none());
    }
}
