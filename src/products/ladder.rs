//! Lucky Ladder contract
//!
//! A ladder of ascending price levels ("rungs"). A rung is hit the first
//! time the price reaches or crosses it; hitting every rung before expiry
//! terminates the contract with `target_hit`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::types::{ContractId, ContractState, ContractStatus, LadderState};
use super::Product;

pub struct LuckyLadder {
    contract_id: ContractId,
    status: ContractStatus,
    /// Rungs not yet hit, ascending
    remaining_rungs: Vec<f64>,
    /// Rungs hit so far, ascending (promotion order is ascending too)
    rungs_hit: Vec<f64>,
    start_time: DateTime<Utc>,
    expiry_time: DateTime<Utc>,
    payoff: Decimal,
    payout: Option<Decimal>,
    current_price: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LuckyLadder {
    /// Create an active contract starting at `start_time`
    ///
    /// `rungs` must be non-empty; validation of ordering and uniqueness
    /// happens at the protocol boundary. They are sorted here so the
    /// prefix-promotion in `on_price` holds regardless of input order.
    pub fn new(
        contract_id: ContractId,
        mut rungs: Vec<f64>,
        duration_ms: i64,
        payoff: Decimal,
        start_time: DateTime<Utc>,
    ) -> Self {
        rungs.sort_by(f64::total_cmp);
        debug!(contract_id = %contract_id, ?rungs, duration_ms, "creating LuckyLadder");
        Self {
            contract_id,
            status: ContractStatus::Active,
            remaining_rungs: rungs,
            rungs_hit: Vec::new(),
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

    /// Proportional payout: the full payoff scaled by the share of rungs hit
    fn compute_payout(&self) -> Decimal {
        let total = self.rungs_hit.len() + self.remaining_rungs.len();
        if total == 0 {
            return Decimal::ZERO;
        }
        self.payoff * Decimal::from(self.rungs_hit.len()) / Decimal::from(total)
    }

    fn build_state(&self) -> LadderState {
        LadderState {
            contract_id: self.contract_id.clone(),
            status: self.status,
            current_price: self.current_price,
            timestamp: self.last_timestamp.map(|t| t.timestamp_millis()),
            start_time: self.start_time.timestamp_millis(),
            expiry_time: self.expiry_time.timestamp_millis(),
            rungs_hit: self.rungs_hit.clone(),
            remaining_rungs: self.remaining_rungs.clone(),
            payoff: self.payoff,
            payout: self.payout,
        }
    }
}

impl Product for LuckyLadder {
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

        if timestamp >= self.expiry_time {
            self.status = ContractStatus::Expired;
            self.payout = Some(self.compute_payout());
            debug!(contract_id = %self.contract_id, "ladder expired");
            return Some(ContractState::Ladder(self.build_state()));
        }

        // Remaining rungs are ascending, so everything at or below the price
        // is a prefix; promote the whole prefix in one event.
        let crossed = self.remaining_rungs.partition_point(|rung| price >= *rung);
        if crossed > 0 {
            self.rungs_hit.extend(self.remaining_rungs.drain(..crossed));
            if self.remaining_rungs.is_empty() {
                self.status = ContractStatus::TargetHit;
                self.payout = Some(self.compute_payout());
                debug!(contract_id = %self.contract_id, "ladder fully climbed");
            }
        }

        Some(ContractState::Ladder(self.build_state()))
    }

    fn snapshot(&self) -> ContractState {
        ContractState::Ladder(self.build_state())
    }

    fn deactivate(&mut self) {
        if self.status == ContractStatus::Active {
            self.status = ContractStatus::Inactive;
            self.payout = Some(self.compute_payout());
        }
    }
}
