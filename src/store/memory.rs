use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{IntakeError, IntakeResult};

use super::{SessionRecord, SessionStore};

/// Volatile store for tests and throwaway runs
#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise persistence-failure paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> IntakeResult<Option<SessionRecord>> {
        Ok(self.records.read().await.get(session_id).cloned())
    }

    async fn upsert(&self, record: &SessionRecord) -> IntakeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IntakeError::Persistence("store unavailable".to_string()));
        }
        self.records
            .write()
            .await
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> IntakeResult<Vec<SessionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
