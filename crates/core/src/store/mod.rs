use crate::domain::recipient::StoredRecord;

pub mod firestore;
#[cfg(test)]
pub(crate) mod memory;

/// Read-only access to a key-value record collection.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    fn store_name(&self) -> &'static str;

    /// `Ok(None)` when the document does not exist.
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<StoredRecord>>;

    /// Every record in the collection, in the store's stable iteration order.
    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<StoredRecord>>;
}
