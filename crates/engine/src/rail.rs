//! External card-network rail.
//!
//! The engine charges first and commits locally afterwards. When anything
//! fails after a charge was placed the charge is refunded through
//! [`refund_charges`]; the refund is retried a bounded number of times and a
//! charge that still cannot be refunded is logged for operational follow-up.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::EngineError;

/// Error reported by the rail, carrying its own machine-readable code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RailError {
    pub code: String,
    pub message: String,
}

impl RailError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<RailError> for EngineError {
    fn from(err: RailError) -> Self {
        EngineError::ExternalRail {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    /// Positive amount in minor units.
    pub amount: i64,
    pub currency: String,
    pub source: Option<String>,
    pub customer: Option<String>,
    /// `"{transactionId}-{stepIndex}"`; a retried request cannot double-charge.
    pub idempotency_key: String,
    /// `false` places an authorization that must be captured later.
    pub capture: bool,
    pub metadata: Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    pub captured: bool,
    /// Opaque rail record kept on the step for audit.
    pub record: Json,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: String,
    pub charge_id: String,
    pub amount: i64,
    pub record: Json,
}

#[async_trait]
pub trait ExternalRail: Send + Sync + Debug {
    async fn create_charge(&self, request: ChargeRequest) -> Result<Charge, RailError>;

    async fn capture_charge(&self, charge_id: &str) -> Result<Charge, RailError>;

    async fn refund_charge(&self, charge_id: &str, reason: &str) -> Result<Refund, RailError>;
}

/// Rail used when no card network is configured. Every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredRail;

#[async_trait]
impl ExternalRail for UnconfiguredRail {
    async fn create_charge(&self, _request: ChargeRequest) -> Result<Charge, RailError> {
        Err(unconfigured())
    }

    async fn capture_charge(&self, _charge_id: &str) -> Result<Charge, RailError> {
        Err(unconfigured())
    }

    async fn refund_charge(&self, _charge_id: &str, _reason: &str) -> Result<Refund, RailError> {
        Err(unconfigured())
    }
}

fn unconfigured() -> RailError {
    RailError::new(
        "RailNotConfigured",
        "No external payment rail is configured.",
    )
}

/// Refund every charge in `charge_ids`, retrying each up to `attempts` times.
///
/// Returns the ids that could not be refunded.
pub(crate) async fn refund_charges(
    rail: &dyn ExternalRail,
    transaction_id: &str,
    charge_ids: &[String],
    reason: &str,
    attempts: u32,
) -> Vec<String> {
    let mut failed = Vec::new();
    for charge_id in charge_ids {
        let mut refunded = false;
        for attempt in 1..=attempts.max(1) {
            match rail.refund_charge(charge_id, reason).await {
                Ok(_) => {
                    refunded = true;
                    break;
                }
                Err(err) => tracing::warn!(
                    transaction_id,
                    charge_id = charge_id.as_str(),
                    attempt,
                    "refund attempt failed: {err}"
                ),
            }
        }
        if !refunded {
            tracing::error!(
                transaction_id,
                charge_id = charge_id.as_str(),
                "compensating refund failed, charge requires manual follow-up"
            );
            failed.push(charge_id.clone());
        }
    }
    if failed.is_empty() && !charge_ids.is_empty() {
        tracing::info!(
            transaction_id,
            refunded = charge_ids.len(),
            "compensating refunds issued"
        );
    }
    failed
}
