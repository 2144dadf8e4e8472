//! In-memory contract store
//!
//! Backs tests and default runs; a real deployment points the same trait at
//! an external storage service.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::products::ContractId;

use super::{ContractRecord, ContractStore, StorageError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ContractId, ContractRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractStore for MemoryStore {
    async fn save(&self, record: ContractRecord) -> Result<(), StorageError> {
        self.records.lock().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &ContractId) -> Result<Option<ContractRecord>, StorageError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn delete(&self, id: &ContractId) -> Result<(), StorageError> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContractRecord>, StorageError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn clean(&self) -> Result<(), StorageError> {
        self.records.lock().await.clear();
        Ok(())
    }
}
