use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{IntakeError, IntakeResult};
use crate::models::{ConversationSession, DocumentRef, Report, Stage};

use super::{SessionRecord, SessionStore};

/// Fields to write for a session; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub conversation: Option<ConversationSession>,
    pub report: Option<Report>,
    pub document: Option<DocumentRef>,
}

impl SessionUpdate {
    pub fn conversation(session: &ConversationSession) -> Self {
        Self {
            conversation: Some(session.clone()),
            ..Default::default()
        }
    }

    pub fn with_report(mut self, report: Report) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = Some(document);
        self
    }
}

/// Row of the history listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub stage: Stage,
    pub patient_name: Option<String>,
    pub chief_complaint: Option<String>,
    /// Opening words of the first patient message
    pub excerpt: Option<String>,
    pub message_count: usize,
    pub has_report: bool,
    pub document: Option<DocumentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(record: &SessionRecord) -> Self {
        let conversation = &record.conversation;
        Self {
            session_id: record.session_id.clone(),
            stage: conversation.stage,
            patient_name: conversation.patient.name.clone(),
            chief_complaint: record
                .report
                .as_ref()
                .map(|r| r.chief_complaint.clone())
                .or_else(|| conversation.patient.disease.clone()),
            excerpt: conversation.first_user_message().map(excerpt),
            message_count: conversation.messages.len(),
            has_report: record.report.is_some(),
            document: record.document.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

const EXCERPT_CHARS: usize = 80;

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Upsert-by-session-id over a [`SessionStore`]
#[derive(Clone)]
pub struct PersistenceAdapter {
    store: Arc<dyn SessionStore>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Merge the update into the stored record.
    ///
    /// Saving the same content twice leaves a single unchanged record and
    /// skips the write.
    pub async fn save(&self, session_id: &str, update: SessionUpdate) -> IntakeResult<SessionRecord> {
        let existing = self.store.get(session_id).await?;

        let mut record = match (&existing, &update.conversation) {
            (Some(record), _) => record.clone(),
            (None, Some(conversation)) => SessionRecord::new(conversation.clone()),
            (None, None) => return Err(IntakeError::NotFound(format!("session {session_id}"))),
        };

        if let Some(conversation) = update.conversation {
            if conversation.session_id != session_id {
                return Err(IntakeError::InvalidState(format!(
                    "conversation {} saved under {}",
                    conversation.session_id, session_id
                )));
            }
            record.conversation = conversation;
        }
        if let Some(report) = update.report {
            record.report = Some(report);
        }
        if let Some(document) = update.document {
            record.document = Some(document);
        }

        if let Some(previous) = &existing {
            if previous.same_content(&record) {
                debug!("Session {} unchanged, skipping write", session_id);
                return Ok(record);
            }
        }

        record.updated_at = Utc::now();
        self.store.upsert(&record).await?;
        Ok(record)
    }

    pub async fn load(&self, session_id: &str) -> IntakeResult<SessionRecord> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(format!("session {session_id}")))
    }

    /// All sessions, most recently updated first
    pub async fn summaries(&self) -> IntakeResult<Vec<SessionSummary>> {
        let mut records = self.store.list().await?;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records.iter().map(SessionSummary::from).collect())
    }
}
