use async_trait::async_trait;
use tokio::sync::RwLock;

use cleanq_core::domain::record::QueueEntry;

use super::{QueueStore, QueueStoreError};

#[derive(Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<Vec<QueueEntry>>,
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn ensure_initialized(&self) -> Result<(), QueueStoreError> {
        Ok(())
    }

    async fn append(&self, entry: QueueEntry) -> Result<(), QueueStoreError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        entries.sort_by_key(|entry| entry.date_added);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let entries = self.entries.read().await;
        Ok(entries.clone())
    }

    async fn exists(&self) -> Result<bool, QueueStoreError> {
        Ok(true)
    }
}
