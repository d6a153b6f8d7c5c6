use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{QueryFilter, QueryOrder, prelude::*};
use uuid::Uuid;

use crate::{
    ChainRequest, EngineError, ResultEngine, Step, Transaction, TransactionType, transactions,
};

use super::super::super::Engine;

/// Result of [`Engine::void_expired_pending`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    pub voided: Vec<Transaction>,
    /// Pending transactions whose void failed; retried on the next sweep.
    pub failed: Vec<String>,
}

/// Result of [`Engine::handle_fraud_signal`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FraudOutcome {
    /// The void or reverse created for the signal. `None` when the chain was
    /// already closed by an earlier signal.
    pub compensation: Option<Transaction>,
    /// Values frozen by this signal. Values that were already frozen are skipped.
    pub frozen: Vec<String>,
}

fn generated_request() -> ChainRequest {
    ChainRequest::new(Uuid::new_v4().to_string())
}

impl Engine {
    /// Void every pending transaction whose `pendingVoidDate` is at or before
    /// `now`, across all owners. Each void commits on its own.
    pub async fn void_expired_pending(&self, now: DateTime<Utc>) -> ResultEngine<SweepReport> {
        let expired = transactions::Entity::find()
            .filter(transactions::Column::PendingVoidDate.lte(now))
            .filter(transactions::Column::NextTransactionId.is_null())
            .order_by_asc(transactions::Column::PendingVoidDate)
            .all(&self.database)
            .await?;

        let mut report = SweepReport::default();
        for model in expired {
            match self
                .void_at(&model.owner_id, &model.id, generated_request(), now)
                .await
            {
                Ok(void) => report.voided.push(void),
                Err(err) => {
                    tracing::error!(
                        owner_id = model.owner_id.as_str(),
                        transaction_id = model.id.as_str(),
                        "voiding expired pending transaction failed: {err}"
                    );
                    report.failed.push(model.id);
                }
            }
        }
        tracing::info!(
            voided = report.voided.len(),
            failed = report.failed.len(),
            "expired pending sweep finished"
        );
        Ok(report)
    }

    /// Compensate a transaction reported as fraudulent: close its chain with
    /// a void (still pending) or a reverse, then freeze every Value it moved.
    ///
    /// The same signal can arrive more than once; an already closed chain
    /// and already frozen Values are skipped. Values frozen or canceled
    /// before the signal are still credited back by the reverse.
    pub async fn handle_fraud_signal(
        &self,
        owner_id: &str,
        transaction_id: &str,
    ) -> ResultEngine<FraudOutcome> {
        let chain = self.transaction_chain(owner_id, transaction_id).await?;
        let tail = chain.last().ok_or_else(|| {
            EngineError::Integrity(format!("transaction '{transaction_id}' has an empty chain"))
        })?;

        let compensation = match tail.transaction_type {
            TransactionType::Reverse | TransactionType::Void => {
                tracing::warn!(
                    transaction_id,
                    closed_by = tail.id.as_str(),
                    "fraud signal for an already reversed chain"
                );
                None
            }
            _ if tail.is_pending() => {
                Some(self.void(owner_id, &tail.id, generated_request()).await?)
            }
            _ => Some(
                self.reverse_as(owner_id, &tail.id, generated_request(), true)
                    .await?,
            ),
        };

        let value_ids: BTreeSet<&str> = chain
            .iter()
            .flat_map(|tx| tx.steps.iter().filter_map(Step::value_id))
            .collect();
        let mut frozen = Vec::new();
        for value_id in value_ids {
            let value = self.value(owner_id, value_id).await?;
            if value.frozen {
                tracing::warn!(transaction_id, value_id, "value already frozen");
                continue;
            }
            self.freeze_value(owner_id, value_id).await?;
            frozen.push(value_id.to_string());
        }

        tracing::info!(
            transaction_id,
            compensated = compensation.is_some(),
            frozen = frozen.len(),
            "fraud signal handled"
        );
        Ok(FraudOutcome {
            compensation,
            frozen,
        })
    }
}
