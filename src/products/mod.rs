//! Contract evaluators
//!
//! Each product consumes the simulated price stream and turns it into a
//! terminal outcome. Evaluators are pure state machines: `on_price` mutates
//! internal state and returns the update to forward to the owning session,
//! `snapshot` reads the externally visible state without mutating anything.

mod ladder;
mod momentum;
mod types;

pub use ladder::LuckyLadder;
pub use momentum::MomentumCatcher;
pub use types::{ContractId, ContractState, ContractStatus, LadderState, MomentumState};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A contract evaluator driven by price events
///
/// Terminal statuses are absorbing: `on_price` after a terminal transition
/// returns `None` and leaves state untouched.
pub trait Product: Send {
    fn contract_id(&self) -> &ContractId;

    fn status(&self) -> ContractStatus;

    /// Consume one price event; returns the state update to forward to the
    /// owning session, or `None` when nothing observable changed
    fn on_price(&mut self, price: f64, timestamp: DateTime<Utc>) -> Option<ContractState>;

    /// Current externally visible state
    fn snapshot(&self) -> ContractState;

    /// Force the contract out of `Active`, e.g. when the owning session
    /// disconnects; no-op on already-terminal contracts
    fn deactivate(&mut self);
}

/// Shared handle to an evaluator: locked per-event by its worker task and
/// between events by the session's query handler
pub type SharedProduct = Arc<Mutex<dyn Product>>;
