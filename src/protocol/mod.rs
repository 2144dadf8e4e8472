//! Client protocol
//!
//! JSON text frames over the WebSocket. Requests arrive through a lenient
//! envelope and decode into tagged variants per product type, so malformed
//! submissions are rejected at the boundary instead of surfacing as type
//! errors later.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::products::{ContractId, ContractState};

/// Error classes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorType {
    ParseError,
    ValidationError,
}

/// A rejected request, carrying the reply to send
#[derive(Debug, Clone, PartialEq)]
pub struct Reject {
    pub error_type: ErrorType,
    pub message: String,
}

impl Reject {
    fn parse(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::ParseError,
            message: message.into(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::ValidationError,
            message: message.into(),
        }
    }
}

/// A validated inbound request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Submission(ContractSubmission),
    Query { contract_id: ContractId },
}

/// Product-specific submission parameters, tagged by `productType`
///
/// Fields default so that an omitted value fails semantic validation with a
/// precise message rather than failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "productType")]
pub enum ContractSubmission {
    LuckyLadder {
        #[serde(default)]
        duration: i64,
        #[serde(default)]
        payoff: Decimal,
        #[serde(default)]
        rungs: Vec<f64>,
    },
    MomentumCatcher {
        #[serde(default)]
        duration: i64,
        #[serde(default)]
        payoff: Decimal,
        #[serde(default, rename = "targetMovement")]
        target_movement: f64,
    },
}

impl ContractSubmission {
    pub fn duration_ms(&self) -> i64 {
        match self {
            ContractSubmission::LuckyLadder { duration, .. } => *duration,
            ContractSubmission::MomentumCatcher { duration, .. } => *duration,
        }
    }

    pub fn payoff(&self) -> Decimal {
        match self {
            ContractSubmission::LuckyLadder { payoff, .. } => *payoff,
            ContractSubmission::MomentumCatcher { payoff, .. } => *payoff,
        }
    }

    /// Stored contract type tag, matching the persistence schema
    pub fn contract_type(&self) -> &'static str {
        match self {
            ContractSubmission::LuckyLadder { .. } => "lucky_ladder",
            ContractSubmission::MomentumCatcher { .. } => "momentum_catcher",
        }
    }
}

/// Outbound frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    ContractAccepted {
        #[serde(rename = "contractID")]
        contract_id: ContractId,
    },
    ContractUpdate {
        #[serde(rename = "contractID")]
        contract_id: ContractId,
        data: ContractState,
    },
    Error {
        #[serde(rename = "errorType")]
        error_type: ErrorType,
        message: String,
    },
}

impl ServerMessage {
    pub fn contract_accepted(contract_id: ContractId) -> Self {
        ServerMessage::ContractAccepted { contract_id }
    }

    pub fn contract_update(contract_id: ContractId, data: ContractState) -> Self {
        ServerMessage::ContractUpdate { contract_id, data }
    }

    pub fn error(error_type: ErrorType, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error_type,
            message: message.into(),
        }
    }

    pub fn rejection(reject: Reject) -> Self {
        ServerMessage::Error {
            error_type: reject.error_type,
            message: reject.message,
        }
    }
}

/// Lenient outer envelope; dispatch happens on `type`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    data: Option<Value>,
    #[serde(rename = "contractID")]
    contract_id: Option<String>,
}

/// Parse and validate one inbound text frame
pub fn parse_request(text: &str) -> Result<ClientRequest, Reject> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| Reject::parse("Invalid JSON format"))?;
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|_| Reject::parse("Invalid message format"))?;

    let msg_type = envelope
        .msg_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Reject::validation("Message type is required"))?;

    match msg_type.as_str() {
        "ContractSubmission" => {
            let data = envelope
                .data
                .ok_or_else(|| Reject::validation("Data field is required for contract submission"))?;
            let submission = decode_submission(data)?;
            validate_submission(&submission)?;
            Ok(ClientRequest::Submission(submission))
        }
        "ContractQuery" => {
            let contract_id = envelope
                .contract_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Reject::validation("ContractID is required for contract query"))?;
            Ok(ClientRequest::Query {
                contract_id: ContractId::from(contract_id),
            })
        }
        other => Err(Reject::validation(format!("Unknown message type: {other}"))),
    }
}

fn decode_submission(data: Value) -> Result<ContractSubmission, Reject> {
    // Check the tag by hand so an unsupported product is a validation
    // failure, not a decode failure
    match data.get("productType").and_then(Value::as_str) {
        None => return Err(Reject::validation("productType is required")),
        Some("LuckyLadder") | Some("MomentumCatcher") => {}
        Some(other) => {
            return Err(Reject::validation(format!(
                "Unsupported product type: {other}"
            )))
        }
    }

    serde_json::from_value(data).map_err(|_| Reject::parse("Invalid contract data format"))
}

fn validate_submission(submission: &ContractSubmission) -> Result<(), Reject> {
    if submission.duration_ms() <= 0 {
        return Err(Reject::validation("duration must be positive"));
    }
    if submission.payoff() <= Decimal::ZERO {
        return Err(Reject::validation("payoff must be positive"));
    }

    match submission {
        ContractSubmission::LuckyLadder { rungs, .. } => {
            if rungs.is_empty() {
                return Err(Reject::validation("rungs are required for LuckyLadder"));
            }

            // Duplicates first, then ordering, so each gets its own message
            let mut sorted = rungs.clone();
            sorted.sort_by(f64::total_cmp);
            if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
                return Err(Reject::validation("duplicate rung values are not allowed"));
            }

            if rungs.windows(2).any(|pair| pair[1] <= pair[0]) {
                return Err(Reject::validation("rungs must be in ascending order"));
            }
        }
        ContractSubmission::MomentumCatcher {
            target_movement, ..
        } => {
            if *target_movement <= 0.0 {
                return Err(Reject::validation("targetMovement must be positive"));
            }
        }
    }

    Ok(())
}
