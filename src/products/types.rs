//! Shared contract types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque contract identifier: 16 random bytes as 32 lowercase hex chars
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractId(String);

impl ContractId {
    /// Generate a fresh, globally unique identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContractId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContractId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Contract lifecycle status
///
/// `Active` is the only non-terminal status; every transition out of it is
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    TargetHit,
    Expired,
    Inactive,
}

impl ContractStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ContractStatus::Active)
    }
}

/// Externally visible contract state, serialized into `ContractUpdate` frames
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContractState {
    Ladder(LadderState),
    Momentum(MomentumState),
}

impl ContractState {
    pub fn status(&self) -> ContractStatus {
        match self {
            ContractState::Ladder(s) => s.status,
            ContractState::Momentum(s) => s.status,
        }
    }
}

/// Snapshot of a Lucky Ladder contract
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderState {
    pub contract_id: ContractId,
    pub status: ContractStatus,
    pub current_price: Option<f64>,
    /// Milliseconds since epoch of the last observed tick
    pub timestamp: Option<i64>,
    pub start_time: i64,
    pub expiry_time: i64,
    pub rungs_hit: Vec<f64>,
    pub remaining_rungs: Vec<f64>,
    pub payoff: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Decimal>,
}

/// Snapshot of a Momentum Catcher contract
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumState {
    pub contract_id: ContractId,
    pub status: ContractStatus,
    pub current_price: Option<f64>,
    /// Milliseconds since epoch of the last observed tick
    pub timestamp: Option<i64>,
    pub start_time: i64,
    pub expiry_time: i64,
    pub starting_price: Option<f64>,
    pub movement: f64,
    pub target_movement: f64,
    pub payoff: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Decimal>,
}
