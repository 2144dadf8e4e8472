//! Hub
//!
//! Owns the engine, the store handle, and the session table. Coordinates
//! global startup (tick loop + best-effort recovery of persisted active
//! contracts) and cooperative shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{Config, SessionConfig};
use crate::engine::{Engine, UpdateSink};
use crate::products::{LuckyLadder, MomentumCatcher, SharedProduct};
use crate::storage::{ContractRecord, ContractStore};

pub struct Hub {
    engine: Engine,
    store: Arc<dyn ContractStore>,
    sessions: Mutex<HashMap<String, mpsc::Sender<String>>>,
    shutdown_tx: watch::Sender<bool>,
    session_config: SessionConfig,
}

impl Hub {
    pub fn new(config: &Config, store: Arc<dyn ContractStore>) -> Arc<Self> {
        let engine = Engine::new(&config.engine, store.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            engine,
            store,
            sessions: Mutex::new(HashMap::new()),
            shutdown_tx,
            session_config: config.session.clone(),
        })
    }

    /// Start the tick loop and recover persisted active contracts
    pub async fn start(&self) {
        self.engine.start().await;
        self.recover().await;
    }

    /// Cooperative shutdown: stop the tick loop and signal every session
    pub async fn shutdown(&self) {
        info!("hub shutting down");
        self.engine.stop();
        self.shutdown_tx.send_replace(true);
        self.sessions.lock().await.clear();
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ContractStore> {
        &self.store
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Observed by sessions and the accept loop to exit cooperatively
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub async fn register_session(&self, session_id: &str, outbound: mpsc::Sender<String>) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.to_string(), outbound);
        debug!(session_id, total = sessions.len(), "session registered");
    }

    pub async fn unregister_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
        debug!(session_id, total = sessions.len(), "session unregistered");
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Re-subscribe persisted contracts whose stored record is still active
    ///
    /// Individual failures are logged and skipped; recovery itself never
    /// aborts. Restored contracts have no owning session, so their updates
    /// go to a discard sink.
    async fn recover(&self) {
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to list persisted contracts, skipping recovery");
                return;
            }
        };

        let mut restored = 0usize;
        for record in records.into_iter().filter(|r| r.is_active) {
            match rebuild_product(&record) {
                Ok(Some(product)) => {
                    self.engine.subscribe(product, UpdateSink::discard()).await;
                    restored += 1;
                }
                Ok(None) => {
                    debug!(contract_id = %record.id, "skipping contract already past expiry");
                }
                Err(e) => {
                    warn!(contract_id = %record.id, error = %e, "skipping contract that failed to restore");
                }
            }
        }
        info!(restored, "contract recovery complete");
    }
}

#[derive(Deserialize)]
struct StoredLadderParams {
    rungs: Vec<f64>,
    payoff: Decimal,
}

#[derive(Deserialize)]
struct StoredMomentumParams {
    target_movement: f64,
    payoff: Decimal,
}

/// Rebuild an evaluator from its stored record
///
/// Returns `Ok(None)` for contracts whose window already closed.
fn rebuild_product(record: &ContractRecord) -> anyhow::Result<Option<SharedProduct>> {
    let start_time: DateTime<Utc> = Utc
        .timestamp_millis_opt(record.created_at)
        .single()
        .with_context(|| format!("invalid created_at: {}", record.created_at))?;

    if start_time + chrono::Duration::milliseconds(record.duration) <= Utc::now() {
        return Ok(None);
    }

    let product: SharedProduct = match record.contract_type.as_str() {
        "lucky_ladder" => {
            let params: StoredLadderParams =
                serde_json::from_value(record.parameters.clone())
                    .context("invalid lucky_ladder parameters")?;
            if params.rungs.is_empty() {
                bail!("lucky_ladder record has no rungs");
            }
            Arc::new(Mutex::new(LuckyLadder::new(
                record.id.clone(),
                params.rungs,
                record.duration,
                params.payoff,
                start_time,
            )))
        }
        "momentum_catcher" => {
            let params: StoredMomentumParams =
                serde_json::from_value(record.parameters.clone())
                    .context("invalid momentum_catcher parameters")?;
            if params.target_movement <= 0.0 {
                bail!("momentum_catcher record has non-positive target movement");
            }
            Arc::new(Mutex::new(MomentumCatcher::new(
                record.id.clone(),
                params.target_movement,
                record.duration,
                params.payoff,
                start_time,
            )))
        }
        other => bail!("unknown contract type: {other}"),
    };

    Ok(Some(product))
}
