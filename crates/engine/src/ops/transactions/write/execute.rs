//! Plan execution.
//!
//! Order of work inside one database transaction:
//!
//! 1. insert the transaction row (the unique key rejects a reused id)
//! 2. call the external rail for every external step, in step order
//! 3. apply every ledger step as an optimistic, state-conditioned update
//! 4. insert the step rows and the tags
//! 5. link the predecessor of a chain transaction
//!
//! Charges cannot roll back with the database, so any failure after a charge
//! was placed (including the commit itself) refunds it before returning.

use chrono::Utc;
use sea_orm::{
    DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde_json::json;

use crate::{
    ConflictCode, EngineError, ResultEngine, Step, Transaction, TransactionType,
    chain::successor_conflict,
    plan::{ExternalAction, ExternalPlanStep, LightrailPlanStep, PlanStep, TransactionPlan},
    rail::{self, ChargeRequest},
    steps::{self, ExternalStep},
    tags::TagCoordinator,
    transactions, util, values,
};

use super::super::{super::Engine, load_transaction, successor_type};

/// Shape the committed (or simulated) transaction from a plan.
fn transaction_from_plan(plan: &TransactionPlan, steps: Vec<Step>) -> Transaction {
    let (root_transaction_id, previous_transaction_id) = match &plan.chain {
        Some(link) => (
            link.root_transaction_id.clone(),
            Some(link.previous_transaction_id.clone()),
        ),
        None => (plan.id.clone(), None),
    };
    Transaction {
        id: plan.id.clone(),
        transaction_type: plan.transaction_type,
        currency: plan.currency.clone(),
        line_items: plan.line_items.clone(),
        steps,
        payment_sources: plan.payment_sources.clone(),
        totals: plan.totals,
        root_transaction_id,
        previous_transaction_id,
        next_transaction_id: None,
        pending_void_date: plan.pending_void_date,
        tags: plan.tags.iter().cloned().collect(),
        metadata: plan.metadata.clone(),
        created_date: plan.created_date,
        simulated: false,
    }
}

impl Engine {
    /// Commit `plan`, or with `simulate` only compute the result.
    pub(super) async fn execute_plan(
        &self,
        owner_id: &str,
        plan: TransactionPlan,
        simulate: bool,
    ) -> ResultEngine<Transaction> {
        let previews = plan
            .steps
            .iter()
            .map(PlanStep::preview)
            .collect::<ResultEngine<Vec<_>>>()?;
        if simulate {
            let mut tx = transaction_from_plan(&plan, previews);
            tx.simulated = true;
            tracing::debug!(
                transaction_id = tx.id.as_str(),
                transaction_type = tx.transaction_type.as_str(),
                "transaction simulated"
            );
            return Ok(tx);
        }

        let db_tx = self.database.begin().await?;
        let mut charged = Vec::new();
        let applied = self
            .apply_plan(&db_tx, owner_id, &plan, previews, &mut charged)
            .await;
        let outcome = match applied {
            Ok(tx) => db_tx.commit().await.map(|()| tx).map_err(|err| {
                if !charged.is_empty() {
                    tracing::error!(
                        transaction_id = plan.id.as_str(),
                        "commit failed after external charges: {err}"
                    );
                }
                EngineError::from(err)
            }),
            Err(err) => {
                if let Err(rollback) = db_tx.rollback().await {
                    tracing::warn!(
                        transaction_id = plan.id.as_str(),
                        "rollback failed: {rollback}"
                    );
                }
                Err(err)
            }
        };

        let tx = match outcome {
            Ok(tx) => tx,
            Err(err) => {
                if !charged.is_empty() {
                    rail::refund_charges(
                        self.rail.as_ref(),
                        &plan.id,
                        &charged,
                        "transaction failed",
                        self.config.refund_attempts,
                    )
                    .await;
                }
                return Err(err);
            }
        };

        tracing::info!(
            transaction_id = tx.id.as_str(),
            transaction_type = tx.transaction_type.as_str(),
            steps = tx.steps.len(),
            "transaction committed"
        );
        self.announce(owner_id, &tx);
        Ok(tx)
    }

    async fn apply_plan(
        &self,
        db_tx: &DatabaseTransaction,
        owner_id: &str,
        plan: &TransactionPlan,
        previews: Vec<Step>,
        charged: &mut Vec<String>,
    ) -> ResultEngine<Transaction> {
        let header = transaction_from_plan(plan, Vec::new());
        transactions::Entity::insert(transactions::ActiveModel::from_transaction(
            owner_id, &header,
        )?)
        .exec_without_returning(db_tx)
        .await
        .map_err(|err| {
            util::unique_violation_as(
                err,
                ConflictCode::TransactionExists,
                "A transaction with this id already exists.",
            )
        })?;

        let mut recorded = Vec::with_capacity(plan.steps.len());
        for (index, (step, preview)) in plan.steps.iter().zip(previews).enumerate() {
            recorded.push(match step {
                PlanStep::External(step) => {
                    self.call_rail(plan, index, step, charged).await?
                }
                _ => preview,
            });
        }

        for step in &plan.steps {
            if let PlanStep::Lightrail(step) = step {
                update_value(db_tx, owner_id, step).await?;
            }
        }

        if !recorded.is_empty() {
            let models = recorded
                .iter()
                .enumerate()
                .map(|(index, step)| steps::ActiveModel::from_step(owner_id, &plan.id, index, step))
                .collect::<ResultEngine<Vec<_>>>()?;
            steps::Entity::insert_many(models)
                .exec_without_returning(db_tx)
                .await?;
        }

        TagCoordinator::persist(db_tx, owner_id, &plan.id, &plan.tags).await?;

        if let Some(link) = &plan.chain {
            link_predecessor(db_tx, owner_id, &link.previous_transaction_id, &plan.id).await?;
        }

        Ok(Transaction {
            steps: recorded,
            ..header
        })
    }

    async fn call_rail(
        &self,
        plan: &TransactionPlan,
        index: usize,
        step: &ExternalPlanStep,
        charged: &mut Vec<String>,
    ) -> ResultEngine<Step> {
        let transaction_id = plan.id.as_str();
        let (charge_id, charge) = match &step.action {
            ExternalAction::Charge { capture } => {
                let request = ChargeRequest {
                    amount: -step.amount,
                    currency: plan.currency.code().to_string(),
                    source: step.source.clone(),
                    customer: step.customer.clone(),
                    idempotency_key: format!("{transaction_id}-{index}"),
                    capture: *capture,
                    metadata: json!({
                        "transactionId": transaction_id,
                        "sources": plan.payment_sources,
                    }),
                };
                let charge = self.rail.create_charge(request).await.map_err(|err| {
                    tracing::warn!(transaction_id, step = index, "charge failed: {err}");
                    EngineError::from(err)
                })?;
                charged.push(charge.id.clone());
                (charge.id, charge.record)
            }
            ExternalAction::Capture { charge_id } => {
                let charge = self.rail.capture_charge(charge_id).await?;
                (charge.id, charge.record)
            }
            ExternalAction::Refund { charge_id } => {
                let reason = match plan.transaction_type {
                    TransactionType::Void => "voided",
                    _ => "reversed",
                };
                let refund = self.rail.refund_charge(charge_id, reason).await?;
                (refund.charge_id, refund.record)
            }
        };
        Ok(Step::External(ExternalStep {
            source: step.source.clone(),
            customer: step.customer.clone(),
            charge_id: Some(charge_id),
            amount: step.amount,
            charge: Some(charge),
        }))
    }
}

/// Apply a ledger step only if the Value still holds the snapshot it was planned on.
async fn update_value(
    db_tx: &DatabaseTransaction,
    owner_id: &str,
    step: &LightrailPlanStep,
) -> ResultEngine<()> {
    let value = &step.value;
    let mut update = values::Entity::update_many()
        .col_expr(values::Column::UpdatedDate, Expr::value(Utc::now()))
        .filter(values::Column::OwnerId.eq(owner_id))
        .filter(values::Column::Id.eq(value.id.as_str()));
    if let Some(after) = step.balance_after()? {
        update = update.col_expr(values::Column::Balance, Expr::value(after));
    }
    if let Some(after) = step.uses_after()? {
        update = update.col_expr(values::Column::UsesRemaining, Expr::value(after));
    }
    update = match value.balance {
        Some(balance) => update.filter(values::Column::Balance.eq(balance)),
        None => update.filter(values::Column::Balance.is_null()),
    };
    update = match value.uses_remaining {
        Some(uses) => update.filter(values::Column::UsesRemaining.eq(uses)),
        None => update.filter(values::Column::UsesRemaining.is_null()),
    };

    match update.exec(db_tx).await?.rows_affected {
        1 => Ok(()),
        0 => {
            tracing::warn!(
                value_id = value.id.as_str(),
                "value changed between planning and commit"
            );
            Err(EngineError::conflict(
                ConflictCode::ValueConcurrentlyModified,
                format!("Value '{}' was modified concurrently. Retry the request.", value.id),
            ))
        }
        rows => Err(EngineError::Integrity(format!(
            "updating value '{}' affected {rows} rows",
            value.id
        ))),
    }
}

/// Point `previous_id` at its successor. Fails when another successor won the race.
async fn link_predecessor(
    db_tx: &DatabaseTransaction,
    owner_id: &str,
    previous_id: &str,
    next_id: &str,
) -> ResultEngine<()> {
    let result = transactions::Entity::update_many()
        .col_expr(transactions::Column::NextTransactionId, Expr::value(next_id))
        .filter(transactions::Column::OwnerId.eq(owner_id))
        .filter(transactions::Column::Id.eq(previous_id))
        .filter(transactions::Column::NextTransactionId.is_null())
        .exec(db_tx)
        .await?;
    match result.rows_affected {
        1 => Ok(()),
        0 => {
            let previous = load_transaction(db_tx, owner_id, previous_id)
                .await?
                .ok_or_else(|| EngineError::TransactionNotFound(previous_id.to_string()))?;
            match successor_type(db_tx, owner_id, &previous).await? {
                Some(next) => Err(successor_conflict(&previous, next)),
                None => Err(EngineError::Integrity(format!(
                    "transaction '{previous_id}' could not be linked to '{next_id}'"
                ))),
            }
        }
        rows => Err(EngineError::Integrity(format!(
            "linking transaction '{previous_id}' affected {rows} rows"
        ))),
    }
}
