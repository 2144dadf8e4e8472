//! End-to-end tests driving the full server over a real WebSocket
//!
//! Each test boots its own server on an ephemeral port with a seeded
//! engine, so the priming price is always the configured base (100.0) and
//! assertions avoid depending on the exact generated path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pricing_server::config::Config;
use pricing_server::server::{self, Hub};
use pricing_server::storage::MemoryStore;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> (SocketAddr, Arc<Hub>) {
    let mut config = Config::default();
    config.engine.seed = Some(42);
    config.engine.tick_interval_ms = 50;

    let hub = Hub::new(&config, Arc::new(MemoryStore::new()));
    hub.start().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, hub.clone()));

    (addr, hub)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("failed to connect");
    ws
}

/// Next JSON text frame, skipping control frames
async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("read error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json(ws: &mut WsClient, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

fn assert_contract_id(value: &Value) -> String {
    let id = value.as_str().expect("contractID missing");
    assert_eq!(id.len(), 32, "contract id should be 32 hex chars: {id}");
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    id.to_string()
}

#[tokio::test]
async fn test_ladder_submission_streams_updates() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 10000,
            "payoff": 100,
            "rungs": [150.0, 160.0, 170.0]
        }}"#,
    )
    .await;

    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");
    let id = assert_contract_id(&accepted["contractID"]);

    // Priming update first, then the ticking cadence
    let mut last_timestamp = 0i64;
    let mut last_hits = 0usize;
    for i in 0..5 {
        let update = next_json(&mut ws).await;
        assert_eq!(update["type"], "ContractUpdate");
        assert_eq!(update["contractID"], id.as_str());
        assert_eq!(update["data"]["status"], "active");

        // Far-away rungs stay unhit; hit set only grows
        let hits = update["data"]["rungsHit"].as_array().unwrap().len();
        assert!(hits >= last_hits);
        last_hits = hits;

        let timestamp = update["data"]["timestamp"].as_i64().unwrap();
        assert!(timestamp >= last_timestamp, "timestamps must not go back");
        last_timestamp = timestamp;

        if i == 0 {
            assert_eq!(update["data"]["currentPrice"], 100.0);
        }
    }
}

#[tokio::test]
async fn test_rung_at_priming_price_hits_immediately() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 10000,
            "payoff": 100,
            "rungs": [50.0]
        }}"#,
    )
    .await;

    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");

    let update = next_json(&mut ws).await;
    assert_eq!(update["data"]["status"], "target_hit");
    assert_eq!(update["data"]["rungsHit"][0], 50.0);
    assert_eq!(update["data"]["payout"].as_f64().unwrap(), 100.0);
}

#[tokio::test]
async fn test_partial_ladder_pays_proportionally_at_expiry() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    // The lower rung is hit on the priming tick; the upper one is
    // unreachable before the 400 ms window closes
    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 400,
            "payoff": 100,
            "rungs": [90.0, 150.0]
        }}"#,
    )
    .await;

    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");

    let first = next_json(&mut ws).await;
    assert_eq!(first["data"]["status"], "active");
    assert_eq!(first["data"]["rungsHit"][0], 90.0);

    // Stream until terminal
    let final_update = loop {
        let update = next_json(&mut ws).await;
        if update["data"]["status"] != "active" {
            break update;
        }
    };
    assert_eq!(final_update["data"]["status"], "expired");
    assert_eq!(final_update["data"]["payout"].as_f64().unwrap(), 50.0);
}

#[tokio::test]
async fn test_momentum_lifecycle_to_expiry() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "MomentumCatcher",
            "duration": 300,
            "payoff": 100,
            "targetMovement": 1000000.0
        }}"#,
    )
    .await;

    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");

    let first = next_json(&mut ws).await;
    assert_eq!(first["data"]["status"], "active");
    assert_eq!(first["data"]["movement"], 0.0);
    assert_eq!(first["data"]["startingPrice"], 100.0);

    let final_update = loop {
        let update = next_json(&mut ws).await;
        assert_eq!(update["data"]["startingPrice"], 100.0);
        if update["data"]["status"] != "active" {
            break update;
        }
    };
    assert_eq!(final_update["data"]["status"], "expired");
    assert_eq!(final_update["data"]["payout"].as_f64().unwrap(), 0.0);
}

#[tokio::test]
async fn test_descending_rungs_rejected() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 5000,
            "payoff": 100,
            "rungs": [115.0, 110.0, 105.0]
        }}"#,
    )
    .await;

    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "Error");
    assert_eq!(error["errorType"], "ValidationError");
    assert!(error["message"].as_str().unwrap().contains("ascending order"));

    // Connection remains usable
    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 5000,
            "payoff": 100,
            "rungs": [105.0, 110.0, 115.0]
        }}"#,
    )
    .await;
    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");
}

#[tokio::test]
async fn test_duplicate_rungs_rejected() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 5000,
            "payoff": 100,
            "rungs": [105.0, 105.0, 110.0]
        }}"#,
    )
    .await;

    let error = next_json(&mut ws).await;
    assert_eq!(error["errorType"], "ValidationError");
    assert!(error["message"].as_str().unwrap().contains("duplicate"));
}

#[tokio::test]
async fn test_invalid_json_then_valid_submission() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, "invalid json{").await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "Error");
    assert_eq!(error["errorType"], "ParseError");

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "MomentumCatcher",
            "duration": 5000,
            "payoff": 100,
            "targetMovement": 5.0
        }}"#,
    )
    .await;
    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");
    assert_contract_id(&accepted["contractID"]);
}

#[tokio::test]
async fn test_query_after_accept() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "LuckyLadder",
            "duration": 10000,
            "payoff": 100,
            "rungs": [150.0, 160.0]
        }}"#,
    )
    .await;
    let accepted = next_json(&mut ws).await;
    let id = assert_contract_id(&accepted["contractID"]);

    send_json(
        &mut ws,
        &format!(r#"{{"type": "ContractQuery", "contractID": "{id}"}}"#),
    )
    .await;

    // The reply stream interleaves tick updates with the query answer; every
    // frame for this contract carries a consistent snapshot
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "ContractUpdate");
    assert_eq!(reply["contractID"], id.as_str());
    assert_eq!(reply["data"]["status"], "active");
    assert_eq!(
        reply["data"]["remainingRungs"].as_array().unwrap().len()
            + reply["data"]["rungsHit"].as_array().unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_query_unknown_contract() {
    let (addr, _hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractQuery", "contractID": "00000000000000000000000000000000"}"#,
    )
    .await;

    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "Error");
    assert_eq!(error["errorType"], "ValidationError");
}

#[tokio::test]
async fn test_disconnect_unsubscribes_contracts() {
    let (addr, hub) = spawn_server().await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"type": "ContractSubmission", "data": {
            "productType": "MomentumCatcher",
            "duration": 60000,
            "payoff": 100,
            "targetMovement": 1000000.0
        }}"#,
    )
    .await;
    let accepted = next_json(&mut ws).await;
    assert_eq!(accepted["type"], "ContractAccepted");
    assert_eq!(hub.engine().active_contracts().await, 1);

    ws.close(None).await.unwrap();
    drop(ws);

    // Cleanup lands within a couple of tick intervals
    for _ in 0..100 {
        if hub.engine().active_contracts().await == 0 && hub.session_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("contracts still subscribed after disconnect");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (addr, hub) = spawn_server().await;
    let mut ws_a = connect(addr).await;
    let mut ws_b = connect(addr).await;

    let submission = r#"{"type": "ContractSubmission", "data": {
        "productType": "MomentumCatcher",
        "duration": 60000,
        "payoff": 100,
        "targetMovement": 1000000.0
    }}"#;

    send_json(&mut ws_a, submission).await;
    let accepted_a = next_json(&mut ws_a).await;
    let id_a = assert_contract_id(&accepted_a["contractID"]);

    send_json(&mut ws_b, submission).await;
    let accepted_b = next_json(&mut ws_b).await;
    let id_b = assert_contract_id(&accepted_b["contractID"]);

    assert_ne!(id_a, id_b);
    assert_eq!(hub.engine().active_contracts().await, 2);

    // Dropping one client leaves the other's contract ticking
    ws_a.close(None).await.unwrap();
    drop(ws_a);

    for _ in 0..100 {
        if hub.engine().active_contracts().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hub.engine().active_contracts().await, 1);

    let update = next_json(&mut ws_b).await;
    assert_eq!(update["type"], "ContractUpdate");
    assert_eq!(update["contractID"], id_b.as_str());
}
