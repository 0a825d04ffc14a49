use super::RecordStore;
use crate::domain::recipient::StoredRecord;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered in-memory collection for tests.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub records: Vec<StoredRecord>,
    pub unreachable: bool,
    pub scans: AtomicUsize,
}

impl MemoryStore {
    pub fn new(records: Vec<StoredRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    fn store_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, _collection: &str, id: &str) -> anyhow::Result<Option<StoredRecord>> {
        anyhow::ensure!(!self.unreachable, "store unreachable");
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    async fn scan(&self, _collection: &str) -> anyhow::Result<Vec<StoredRecord>> {
        anyhow::ensure!(!self.unreachable, "store unreachable");
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}
