//! pricing-server: real-time simulated market prices and contract evaluation
//!
//! This library provides the core components for:
//! - A seeded geometric Brownian price simulation on a fixed tick cadence
//! - Subscription fan-out from the tick loop to per-contract evaluators
//! - Lucky Ladder and Momentum Catcher contract evaluators
//! - Per-connection WebSocket sessions with validated JSON framing and
//!   bounded outbound queues
//! - A hub coordinating sessions, the engine, and boot-time recovery
//! - A pluggable contract store for out-of-band persistence

pub mod config;
pub mod engine;
pub mod products;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod telemetry;
