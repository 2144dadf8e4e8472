//! Momentum Catcher contract
//!
//! Pays out when the price moves far enough, in either direction, from the
//! price observed on the first tick after activation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::types::{ContractId, ContractState, ContractStatus, MomentumState};
use super::Product;

pub struct MomentumCatcher {
    contract_id: ContractId,
    status: ContractStatus,
    /// Captured on the first observed tick, never changes afterwards
    starting_price: Option<f64>,
    target_movement: f64,
    movement: f64,
    start_time: DateTime<Utc>,
    expiry_time: DateTime<Utc>,
    payoff: Decimal,
    payout: Option<Decimal>,
    current_price: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MomentumCatcher {
    /// Create an active contract starting at `start_time`
    pub fn new(
        contract_id: ContractId,
        target_movement: f64,
        duration_ms: i64,
        payoff: Decimal,
        start_time: DateTime<Utc>,
    ) -> Self {
        debug!(contract_id = %contract_id, target_movement, duration_ms, "creating MomentumCatcher");
        Self {
            contract_id,
            status: ContractStatus::Active,
            starting_price: None,
            target_movement,
            movement: 0.0,
            start_time,
            expiry_time: start_time + Duration::milliseconds(duration_ms),
            payoff,
            payout: None,
            current_price: None,
            last_timestamp: None,
        }
    }

    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    fn build_state(&self) -> MomentumState {
        MomentumState {
            contract_id: self.contract_id.clone(),
            status: self.status,
            current_price: self.current_price,
            timestamp: self.last_timestamp.map(|t| t.timestamp_millis()),
            start_time: self.start_time.timestamp_millis(),
            expiry_time: self.expiry_time.timestamp_millis(),
            starting_price: self.starting_price,
            movement: self.movement,
            target_movement: self.target_movement,
            payoff: self.payoff,
            payout: self.payout,
        }
    }
}

impl Product for MomentumCatcher {
    fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    fn status(&self) -> ContractStatus {
        self.status
    }

    fn on_price(&mut self, price: f64, timestamp: DateTime<Utc>) -> Option<ContractState> {
        if self.status != ContractStatus::Active {
            return None;
        }

        self.current_price = Some(price);
        self.last_timestamp = Some(timestamp);

        // The first tick establishes the reference price; movement is zero
        // by definition, so no target or expiry checks apply yet.
        let Some(starting_price) = self.starting_price else {
            self.starting_price = Some(price);
            return Some(ContractState::Momentum(self.build_state()));
        };

        if timestamp >= self.expiry_time {
            self.status = ContractStatus::Expired;
            self.payout = Some(Decimal::ZERO);
            debug!(contract_id = %self.contract_id, "momentum contract expired");
            return Some(ContractState::Momentum(self.build_state()));
        }

        self.movement = (price - starting_price).abs();
        if self.movement >= self.target_movement {
            self.status = ContractStatus::TargetHit;
            self.payout = Some(self.payoff);
            debug!(
                contract_id = %self.contract_id,
                movement = self.movement,
                target = self.target_movement,
                "momentum target reached"
            );
        }

        Some(ContractState::Momentum(self.build_state()))
    }

    fn snapshot(&self) -> ContractState {
        ContractState::Momentum(self.build_state())
    }

    fn deactivate(&mut self) {
        if self.status == ContractStatus::Active {
            self.status = ContractStatus::Inactive;
            self.payout = Some(Decimal::ZERO);
        }
    }
}
