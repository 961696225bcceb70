pub mod documents;
pub mod file;
pub mod memory;
pub mod persistence;

pub use documents::*;
pub use file::*;
pub use memory::*;
pub use persistence::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntakeResult;
use crate::models::{ConversationSession, DocumentRef, Report};

/// Everything persisted for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub conversation: ConversationSession,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub document: Option<DocumentRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(conversation: ConversationSession) -> Self {
        let now = Utc::now();
        Self {
            session_id: conversation.session_id.clone(),
            created_at: conversation.created_at,
            conversation,
            report: None,
            document: None,
            updated_at: now,
        }
    }

    /// Equality ignoring the write timestamp
    pub fn same_content(&self, other: &SessionRecord) -> bool {
        self.session_id == other.session_id
            && self.conversation == other.conversation
            && self.report == other.report
            && self.document == other.document
            && self.created_at == other.created_at
    }
}

/// Keyed record storage; the single source of truth across restarts
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> IntakeResult<Option<SessionRecord>>;

    /// Insert or wholly replace the record for its session id
    async fn upsert(&self, record: &SessionRecord) -> IntakeResult<()>;

    async fn list(&self) -> IntakeResult<Vec<SessionRecord>>;
}

/// Session ids double as file names, so only a conservative alphabet is accepted
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
