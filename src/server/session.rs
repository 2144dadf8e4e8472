//! Per-connection session
//!
//! Frames inbound JSON messages, validates submissions, owns the contracts
//! it created, and pushes replies and evaluator updates through a bounded
//! outbound queue. A read pump and a write pump run per connection; the
//! write pump enforces the keep-alive cadence and a deadline on every
//! transmission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::UpdateSink;
use crate::products::{ContractId, LuckyLadder, MomentumCatcher, SharedProduct};
use crate::protocol::{self, ClientRequest, ContractSubmission, ErrorType, ServerMessage};
use crate::storage::ContractRecord;

use super::hub::Hub;

pub struct Session {
    id: String,
    hub: Arc<Hub>,
    outbound: mpsc::Sender<String>,
    owned: Mutex<HashMap<ContractId, SharedProduct>>,
}

impl Session {
    /// Create a session and its outbound queue receiver
    pub fn new(hub: Arc<Hub>) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(hub.session_config().outbound_queue);
        let session = Arc::new(Self {
            id: Uuid::new_v4().simple().to_string(),
            hub,
            outbound,
            owned: Mutex::new(HashMap::new()),
        });
        (session, outbound_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drive the connection until disconnect, error, or hub shutdown
    pub async fn run<S>(
        self: Arc<Self>,
        ws: WebSocketStream<S>,
        outbound_rx: mpsc::Receiver<String>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.hub
            .register_session(&self.id, self.outbound.clone())
            .await;
        info!(session_id = %self.id, "session opened");

        let (sink, mut stream) = ws.split();
        let config = self.hub.session_config();
        let writer = tokio::spawn(write_pump(
            outbound_rx,
            sink,
            Duration::from_secs(config.keepalive_secs),
            Duration::from_secs(config.write_timeout_secs),
        ));

        let mut shutdown_rx = self.hub.shutdown_rx();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %self.id, error = %e, "read error");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        self.teardown().await;
        writer.abort();
    }

    /// Process one inbound text frame
    pub async fn handle_frame(&self, text: &str) {
        match protocol::parse_request(text) {
            Ok(ClientRequest::Submission(submission)) => {
                self.handle_submission(submission).await;
            }
            Ok(ClientRequest::Query { contract_id }) => {
                self.handle_query(contract_id).await;
            }
            Err(reject) => {
                debug!(
                    session_id = %self.id,
                    error_type = ?reject.error_type,
                    message = %reject.message,
                    "rejected frame"
                );
                self.send(ServerMessage::rejection(reject)).await;
            }
        }
    }

    async fn handle_submission(&self, submission: ContractSubmission) {
        let contract_id = ContractId::generate();
        let start_time = Utc::now();

        let product: SharedProduct = match &submission {
            ContractSubmission::LuckyLadder {
                duration,
                payoff,
                rungs,
            } => Arc::new(Mutex::new(LuckyLadder::new(
                contract_id.clone(),
                rungs.clone(),
                *duration,
                *payoff,
                start_time,
            ))),
            ContractSubmission::MomentumCatcher {
                duration,
                payoff,
                target_movement,
            } => Arc::new(Mutex::new(MomentumCatcher::new(
                contract_id.clone(),
                *target_movement,
                *duration,
                *payoff,
                start_time,
            ))),
        };

        // Best-effort persistence; a storage failure never rejects the
        // submission
        let record = build_record(&contract_id, &submission, start_time.timestamp_millis());
        if let Err(e) = self.hub.store().save(record).await {
            warn!(contract_id = %contract_id, error = %e, "failed to persist contract");
        }

        self.owned
            .lock()
            .await
            .insert(contract_id.clone(), product.clone());

        info!(
            session_id = %self.id,
            contract_id = %contract_id,
            product = submission.contract_type(),
            "contract accepted"
        );

        // The acceptance is enqueued before the subscription so it precedes
        // the priming update in the FIFO outbound queue
        self.send(ServerMessage::contract_accepted(contract_id.clone()))
            .await;
        self.hub
            .engine()
            .subscribe(product, UpdateSink::new(self.outbound.clone()))
            .await;
    }

    async fn handle_query(&self, contract_id: ContractId) {
        let product = self.owned.lock().await.get(&contract_id).cloned();
        match product {
            Some(product) => {
                let state = product.lock().await.snapshot();
                self.send(ServerMessage::contract_update(contract_id, state))
                    .await;
            }
            None => {
                self.send(ServerMessage::error(
                    ErrorType::ValidationError,
                    format!("Contract not found: {contract_id}"),
                ))
                .await;
            }
        }
    }

    async fn send(&self, message: ServerMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to serialize reply");
                return;
            }
        };
        if self.outbound.send(json).await.is_err() {
            debug!(session_id = %self.id, "outbound queue closed");
        }
    }

    /// Release everything the session owns: deactivate and unsubscribe each
    /// contract and drop its stored record best-effort
    async fn teardown(&self) {
        let owned: Vec<_> = self.owned.lock().await.drain().collect();
        for (contract_id, product) in owned {
            product.lock().await.deactivate();
            self.hub.engine().unsubscribe(&contract_id).await;
            if let Err(e) = self.hub.store().delete(&contract_id).await {
                debug!(contract_id = %contract_id, error = %e, "failed to delete stored contract");
            }
        }
        self.hub.unregister_session(&self.id).await;
        info!(session_id = %self.id, "session closed");
    }
}

fn build_record(
    contract_id: &ContractId,
    submission: &ContractSubmission,
    created_at: i64,
) -> ContractRecord {
    let parameters = match submission {
        ContractSubmission::LuckyLadder {
            duration,
            payoff,
            rungs,
        } => json!({"rungs": rungs, "duration": duration, "payoff": payoff}),
        ContractSubmission::MomentumCatcher {
            duration,
            payoff,
            target_movement,
        } => json!({"target_movement": target_movement, "duration": duration, "payoff": payoff}),
    };

    ContractRecord {
        id: contract_id.clone(),
        contract_type: submission.contract_type().to_string(),
        parameters,
        created_at,
        is_active: true,
        duration: submission.duration_ms(),
    }
}

/// Consume the outbound queue, enforcing the write deadline and keep-alive
async fn write_pump<S>(
    mut outbound_rx: mpsc::Receiver<String>,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    keepalive: Duration,
    write_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    match tokio::time::timeout(write_timeout, sink.send(Message::Text(text))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(error = %e, "write failed");
                            return;
                        }
                        Err(_) => {
                            debug!("write deadline exceeded");
                            return;
                        }
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                match tokio::time::timeout(write_timeout, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        debug!("keep-alive ping failed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStore;
    use serde_json::Value;

    fn test_hub() -> Arc<Hub> {
        let mut config = Config::default();
        config.engine.seed = Some(1);
        Hub::new(&config, Arc::new(MemoryStore::new()))
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    const LADDER_SUBMISSION: &str = r#"{
        "type": "ContractSubmission",
        "data": {
            "productType": "LuckyLadder",
            "duration": 60000,
            "payoff": 100,
            "rungs": [150.0, 160.0, 170.0]
        }
    }"#;

    #[tokio::test]
    async fn test_submission_accepted_then_primed() {
        let (session, mut rx) = Session::new(test_hub());

        session.handle_frame(LADDER_SUBMISSION).await;

        let accepted = recv_frame(&mut rx).await;
        assert_eq!(accepted["type"], "ContractAccepted");
        let id = accepted["contractID"].as_str().unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        // The priming tick produces the first update
        let update = recv_frame(&mut rx).await;
        assert_eq!(update["type"], "ContractUpdate");
        assert_eq!(update["contractID"], id);
        assert_eq!(update["data"]["status"], "active");
        assert_eq!(update["data"]["currentPrice"], 100.0);
    }

    #[tokio::test]
    async fn test_parse_error_keeps_session_usable() {
        let (session, mut rx) = Session::new(test_hub());

        session.handle_frame("invalid json{").await;
        let error = recv_frame(&mut rx).await;
        assert_eq!(error["type"], "Error");
        assert_eq!(error["errorType"], "ParseError");

        // A valid submission still goes through afterwards
        session.handle_frame(LADDER_SUBMISSION).await;
        let accepted = recv_frame(&mut rx).await;
        assert_eq!(accepted["type"], "ContractAccepted");
    }

    #[tokio::test]
    async fn test_descending_rungs_rejected_with_message() {
        let (session, mut rx) = Session::new(test_hub());

        session
            .handle_frame(
                r#"{"type": "ContractSubmission", "data": {
                    "productType": "LuckyLadder",
                    "duration": 5000,
                    "payoff": 100,
                    "rungs": [115.0, 110.0, 105.0]
                }}"#,
            )
            .await;

        let error = recv_frame(&mut rx).await;
        assert_eq!(error["errorType"], "ValidationError");
        assert!(error["message"]
            .as_str()
            .unwrap()
            .contains("ascending order"));
    }

    #[tokio::test]
    async fn test_query_matches_last_update() {
        let (session, mut rx) = Session::new(test_hub());

        session.handle_frame(LADDER_SUBMISSION).await;
        let accepted = recv_frame(&mut rx).await;
        let id = accepted["contractID"].as_str().unwrap().to_string();
        let update = recv_frame(&mut rx).await;

        session
            .handle_frame(&format!(
                r#"{{"type": "ContractQuery", "contractID": "{id}"}}"#
            ))
            .await;
        let queried = recv_frame(&mut rx).await;

        assert_eq!(queried["type"], "ContractUpdate");
        assert_eq!(queried["data"]["status"], update["data"]["status"]);
        assert_eq!(
            queried["data"]["remainingRungs"],
            update["data"]["remainingRungs"]
        );
    }

    #[tokio::test]
    async fn test_query_unknown_contract_errors() {
        let (session, mut rx) = Session::new(test_hub());

        session
            .handle_frame(r#"{"type": "ContractQuery", "contractID": "ffffffffffffffff"}"#)
            .await;

        let error = recv_frame(&mut rx).await;
        assert_eq!(error["errorType"], "ValidationError");
        assert!(error["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_teardown_releases_owned_contracts() {
        let hub = test_hub();
        let (session, mut rx) = Session::new(hub.clone());

        session.handle_frame(LADDER_SUBMISSION).await;
        let accepted = recv_frame(&mut rx).await;
        let id = ContractId::from(accepted["contractID"].as_str().unwrap());

        // Wait until the subscription is live
        for _ in 0..100 {
            if hub.engine().registry().contains(&id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.engine().active_contracts().await, 1);

        session.teardown().await;
        assert_eq!(hub.engine().active_contracts().await, 0);
        assert_eq!(hub.session_count().await, 0);

        // Stored record is gone too
        assert!(hub.store().get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submission_persists_record() {
        let hub = test_hub();
        let (session, mut rx) = Session::new(hub.clone());

        session
            .handle_frame(
                r#"{"type": "ContractSubmission", "data": {
                    "productType": "MomentumCatcher",
                    "duration": 2000,
                    "payoff": 100,
                    "targetMovement": 5.0
                }}"#,
            )
            .await;

        let accepted = recv_frame(&mut rx).await;
        let id = ContractId::from(accepted["contractID"].as_str().unwrap());

        let record = hub.store().get(&id).await.unwrap().unwrap();
        assert_eq!(record.contract_type, "momentum_catcher");
        assert!(record.is_active);
        assert_eq!(record.duration, 2000);
        assert_eq!(record.parameters["target_movement"], 5.0);
    }
}
