//! Contract persistence
//!
//! The store is an out-of-band collaborator: the engine saves, deactivates,
//! and deletes records best-effort, and recovers active contracts at boot.
//! Every caller logs failures and continues; storage trouble never stalls
//! tick delivery or surfaces to clients.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::products::ContractId;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend unreachable or refusing the operation
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    /// Record could not be encoded or decoded
    #[error("invalid contract record: {0}")]
    InvalidRecord(String),
}

/// A persisted contract
///
/// `parameters` is an opaque blob carrying the product-specific fields,
/// decoded again only during recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRecord {
    pub id: ContractId,
    pub contract_type: String,
    pub parameters: Value,
    /// Milliseconds since epoch
    pub created_at: i64,
    pub is_active: bool,
    /// Milliseconds
    pub duration: i64,
}

/// Persistence operations for contract records
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Insert or overwrite the record for `record.id`
    async fn save(&self, record: ContractRecord) -> Result<(), StorageError>;

    async fn get(&self, id: &ContractId) -> Result<Option<ContractRecord>, StorageError>;

    /// Remove a record; unknown ids are a no-op
    async fn delete(&self, id: &ContractId) -> Result<(), StorageError>;

    async fn list(&self) -> Result<Vec<ContractRecord>, StorageError>;

    /// Remove every record
    async fn clean(&self) -> Result<(), StorageError>;
}
