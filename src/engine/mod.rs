//! Price simulation engine
//!
//! The tick loop drives a seeded geometric Brownian generator on a fixed
//! cadence and fans each `(price, timestamp)` event out to the active
//! subscriptions. Every subscription owns a long-lived worker task with a
//! bounded mailbox; the loop posts non-blockingly and drops the event for a
//! saturated subscriber only, so a slow consumer never delays the cadence or
//! delivery to anyone else.

mod generator;
mod registry;

pub use generator::GbmGenerator;
pub use registry::SubscriptionRegistry;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::products::{ContractId, ContractState, SharedProduct};
use crate::protocol::ServerMessage;
use crate::storage::ContractStore;

/// Per-subscription mailbox depth; ticks beyond this are dropped for that
/// subscriber only
const MAILBOX_CAPACITY: usize = 16;

/// One price observation produced by the tick loop
#[derive(Debug, Clone, Copy)]
pub struct PriceEvent {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// One-way handle evaluator workers use to push updates toward a session
///
/// This is the only session-facing reference a worker holds, so the
/// session ↔ evaluator cycle never forms. Sends never block: a full queue
/// drops the update, a closed queue (session gone) is silently ignored.
#[derive(Clone)]
pub struct UpdateSink {
    tx: Option<mpsc::Sender<String>>,
}

impl UpdateSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every update, for contracts with no owning
    /// session (e.g. restored at boot)
    pub fn discard() -> Self {
        Self { tx: None }
    }

    fn send_update(&self, contract_id: &ContractId, state: ContractState) {
        let Some(tx) = &self.tx else { return };

        let frame = ServerMessage::contract_update(contract_id.clone(), state);
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(contract_id = %contract_id, error = %e, "failed to serialize update");
                return;
            }
        };

        match tx.try_send(json) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(contract_id = %contract_id, "outbound queue full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// The price engine: generator, tick loop, and subscription fan-out
pub struct Engine {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn ContractStore>,
    price_rx: watch::Receiver<f64>,
    shutdown_tx: watch::Sender<bool>,
    tick_interval: Duration,
    tick_loop: Mutex<Option<TickLoop>>,
}

impl Engine {
    pub fn new(config: &EngineConfig, store: Arc<dyn ContractStore>) -> Self {
        let generator = match config.seed {
            Some(seed) => GbmGenerator::new(config.base_price, seed),
            None => GbmGenerator::from_entropy(config.base_price),
        };
        let registry = Arc::new(SubscriptionRegistry::new());
        let (price_tx, price_rx) = watch::channel(config.base_price);
        let (shutdown_tx, _) = watch::channel(false);

        let tick_loop = TickLoop {
            generator,
            registry: registry.clone(),
            price_tx,
        };

        Self {
            registry,
            store,
            price_rx,
            shutdown_tx,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            tick_loop: Mutex::new(Some(tick_loop)),
        }
    }

    /// Spawn the tick loop; called once at hub boot
    pub async fn start(&self) {
        let Some(tick_loop) = self.tick_loop.lock().await.take() else {
            warn!("tick loop already started");
            return;
        };
        let interval = self.tick_interval;
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(tick_loop.run(interval, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "tick loop started");
    }

    /// Cooperatively stop the tick loop
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Last generated price (the initial base price before the first tick)
    pub fn current_price(&self) -> f64 {
        *self.price_rx.borrow()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Number of contracts currently subscribed
    pub async fn active_contracts(&self) -> usize {
        self.registry.len().await
    }

    /// Register an evaluator and deliver its priming tick
    ///
    /// The priming tick carries the current price so evaluators that need a
    /// starting reference establish it deterministically before the next
    /// generator step. A duplicate id replaces the stale entry and warns.
    pub async fn subscribe(&self, product: SharedProduct, sink: UpdateSink) {
        let id = product.lock().await.contract_id().clone();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);

        tokio::spawn(run_worker(
            id.clone(),
            product,
            mailbox_rx,
            sink,
            self.registry.clone(),
            self.store.clone(),
        ));

        let replaced = self
            .registry
            .subscribe(id.clone(), mailbox_tx, self.current_price())
            .await;
        if replaced {
            warn!(contract_id = %id, "replaced existing subscription for duplicate contract id");
        }
        debug!(contract_id = %id, "subscribed");
    }

    /// Remove a subscription; idempotent. The worker drains its mailbox and
    /// exits once the sender is gone.
    pub async fn unsubscribe(&self, id: &ContractId) {
        if self.registry.remove(id).await {
            debug!(contract_id = %id, "unsubscribed");
        }
    }
}

/// Owns the generator; the sole task that touches the PRNG
struct TickLoop {
    generator: GbmGenerator,
    registry: Arc<SubscriptionRegistry>,
    price_tx: watch::Sender<f64>,
}

impl TickLoop {
    async fn run(mut self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        // A missed cadence boundary coalesces; no catch-up bursts
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("stopping tick loop");
                    break;
                }
            }
        }
    }

    /// One cadence step: snapshot subscribers, advance the walk, fan out
    ///
    /// The walk only advances while someone is listening. Returns the number
    /// of subscribers the event was delivered to.
    async fn tick_once(&mut self) -> usize {
        let subscribers = self.registry.snapshot().await;
        if subscribers.is_empty() {
            return 0;
        }

        let price = self.generator.step();
        self.price_tx.send_replace(price);
        let timestamp = Utc::now();
        debug!(price, subscribers = subscribers.len(), "generated tick");

        let mut delivered = 0;
        for (contract_id, mailbox) in subscribers {
            let event = PriceEvent { price, timestamp };
            match mailbox.try_send(event) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(contract_id = %contract_id, "mailbox full, dropping tick");
                }
                // Worker already gone; registry cleanup is on its way
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// Long-lived delivery task for one subscription
///
/// Locks the evaluator per event, forwards any resulting update through the
/// sink, and on a terminal transition removes the subscription and marks the
/// persisted record inactive (best-effort) before exiting.
async fn run_worker(
    contract_id: ContractId,
    product: SharedProduct,
    mut mailbox: mpsc::Receiver<PriceEvent>,
    sink: UpdateSink,
    registry: Arc<SubscriptionRegistry>,
    store: Arc<dyn ContractStore>,
) {
    while let Some(event) = mailbox.recv().await {
        let (update, status) = {
            let mut product = product.lock().await;
            let update = product.on_price(event.price, event.timestamp);
            (update, product.status())
        };

        if let Some(state) = update {
            sink.send_update(&contract_id, state);
        }

        if status.is_terminal() {
            registry.remove(&contract_id).await;
            deactivate_record(&contract_id, store.as_ref()).await;
            debug!(contract_id = %contract_id, ?status, "contract reached terminal status");
            break;
        }
    }
}

/// Best-effort: flip the stored record to inactive; failures never propagate
async fn deactivate_record(contract_id: &ContractId, store: &dyn ContractStore) {
    match store.get(contract_id).await {
        Ok(Some(mut record)) => {
            record.is_active = false;
            if let Err(e) = store.save(record).await {
                debug!(contract_id = %contract_id, error = %e, "failed to deactivate stored contract");
            }
        }
        Ok(None) => {}
        Err(e) => {
            debug!(contract_id = %contract_id, error = %e, "failed to load stored contract");
        }
    }
}
