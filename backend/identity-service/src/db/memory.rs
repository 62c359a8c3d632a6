use super::sessions::{SessionFilter, SessionStore};
use crate::error::Result;
use crate::models::SessionRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Process-local session store keyed by record id.
///
/// Used by tests and single-node deployments without a database.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records currently held for `subject`
    pub fn count_for(&self, subject: &str) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().subject == subject)
            .count()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_one(&self, filter: &SessionFilter) -> Result<Option<SessionRecord>> {
        Ok(self
            .records
            .iter()
            .find(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone()))
    }

    async fn delete_where(&self, filter: &SessionFilter) -> Result<u64> {
        // Counted inside retain: each call reports only its own removals.
        let mut deleted = 0u64;
        self.records.retain(|_, record| {
            let hit = filter.matches(record);
            deleted += u64::from(hit);
            !hit
        });
        Ok(deleted)
    }
}
