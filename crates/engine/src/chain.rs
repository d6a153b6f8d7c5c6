//! Capture, void and reverse.
//!
//! State machine of a chain link:
//!
//! - a pending transaction is captured or voided, once
//! - a completed transaction that has no successor can be reversed
//!
//! Successors are found through `next_transaction_id`; when one exists its
//! type names the precise conflict.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    ChainRequest, ConflictCode, EngineError, ResultEngine, Step, Transaction, TransactionType,
    Value,
    plan::{
        ChainLink, ExternalAction, ExternalPlanStep, InternalPlanStep, LightrailPlanStep, PlanStep,
        TransactionPlan, checked_change,
    },
};

/// Conflict reported when `previous` already has a successor of type `next`.
pub(crate) fn successor_conflict(previous: &Transaction, next: TransactionType) -> EngineError {
    let id = &previous.id;
    match next {
        TransactionType::Capture => EngineError::conflict(
            ConflictCode::TransactionCaptured,
            format!("Transaction '{id}' has already been captured."),
        ),
        TransactionType::Void => EngineError::conflict(
            ConflictCode::TransactionVoided,
            format!("Transaction '{id}' has already been voided."),
        ),
        _ => EngineError::conflict(
            ConflictCode::TransactionReversed,
            format!("Transaction '{id}' has already been reversed."),
        ),
    }
}

/// Builds chain plans from committed transactions.
pub struct ChainManager {
    now: DateTime<Utc>,
    compensating: bool,
}

impl ChainManager {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            compensating: false,
        }
    }

    /// Reverse plans built for fraud compensation credit frozen and canceled
    /// Values back, the same way a void does.
    #[must_use]
    pub fn compensating(mut self, compensating: bool) -> Self {
        self.compensating = compensating;
        self
    }

    /// Capture and void both require a pending transaction without a successor.
    pub fn ensure_pending(
        &self,
        tx: &Transaction,
        next: Option<TransactionType>,
    ) -> ResultEngine<()> {
        if let Some(next) = next {
            return Err(successor_conflict(tx, next));
        }
        if tx.pending_void_date.is_none() {
            return Err(EngineError::conflict(
                ConflictCode::TransactionNotPending,
                format!("Transaction '{}' is not pending.", tx.id),
            ));
        }
        Ok(())
    }

    pub fn ensure_reversible(
        &self,
        tx: &Transaction,
        next: Option<TransactionType>,
    ) -> ResultEngine<()> {
        if matches!(
            tx.transaction_type,
            TransactionType::Reverse | TransactionType::Void
        ) {
            return Err(EngineError::conflict(
                ConflictCode::TransactionNotReversible,
                format!(
                    "Transaction '{}' of type {} cannot be reversed.",
                    tx.id,
                    tx.transaction_type.as_str()
                ),
            ));
        }
        if let Some(next) = next {
            return Err(successor_conflict(tx, next));
        }
        if tx.is_pending() {
            return Err(EngineError::conflict(
                ConflictCode::TransactionPending,
                "Cannot reverse a pending transaction. Use void instead.",
            ));
        }
        Ok(())
    }

    fn plan_for(
        &self,
        request: &ChainRequest,
        transaction_type: TransactionType,
        previous: &Transaction,
    ) -> TransactionPlan {
        let mut plan = TransactionPlan::new(
            &request.id,
            transaction_type,
            previous.currency.clone(),
            self.now,
        );
        plan.chain = Some(ChainLink {
            root_transaction_id: previous.root_transaction_id.clone(),
            previous_transaction_id: previous.id.clone(),
        });
        plan.tags = previous.tags.iter().cloned().collect();
        plan.metadata = request.metadata.clone();
        plan
    }

    /// Make the hold of `pending` permanent.
    pub fn capture(
        &self,
        request: &ChainRequest,
        pending: &Transaction,
    ) -> ResultEngine<TransactionPlan> {
        let mut plan = self.plan_for(request, TransactionType::Capture, pending);
        plan.steps = pending
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::External(step) => step.charge_id.as_ref().map(|charge_id| {
                    PlanStep::External(ExternalPlanStep {
                        source: step.source.clone(),
                        customer: step.customer.clone(),
                        amount: 0,
                        action: ExternalAction::Capture {
                            charge_id: charge_id.clone(),
                        },
                    })
                }),
                Step::Lightrail(_) | Step::Internal(_) => None,
            })
            .collect();
        Ok(plan)
    }

    /// Release the hold of `pending`. Frozen and canceled Values are credited back.
    pub fn void(
        &self,
        request: &ChainRequest,
        pending: &Transaction,
        current: &HashMap<String, Value>,
    ) -> ResultEngine<TransactionPlan> {
        let mut plan = self.plan_for(request, TransactionType::Void, pending);
        plan.steps = invert_steps(pending, current, false)?;
        plan.totals = pending.totals.map(|totals| -totals);
        Ok(plan)
    }

    /// Reverse `tx`. `target` is the transaction whose steps are inverted:
    /// `tx` itself, or the pending transaction a capture made permanent.
    pub fn reverse(
        &self,
        request: &ChainRequest,
        tx: &Transaction,
        target: &Transaction,
        current: &HashMap<String, Value>,
    ) -> ResultEngine<TransactionPlan> {
        let mut plan = self.plan_for(request, TransactionType::Reverse, tx);
        plan.steps = invert_steps(target, current, !self.compensating)?;
        plan.totals = target.totals.map(|totals| -totals);
        Ok(plan)
    }
}

/// Mirror every step of `original`. With `check_state`, frozen and canceled
/// Values are refused.
fn invert_steps(
    original: &Transaction,
    current: &HashMap<String, Value>,
    check_state: bool,
) -> ResultEngine<Vec<PlanStep>> {
    let mut steps = Vec::with_capacity(original.steps.len());
    for step in &original.steps {
        match step {
            Step::Lightrail(step) => {
                let value = current
                    .get(&step.value_id)
                    .ok_or_else(|| EngineError::ValueNotFound(step.value_id.clone()))?;
                if check_state {
                    if value.frozen {
                        return Err(EngineError::conflict(
                            ConflictCode::ValueFrozen,
                            format!("Value '{}' is frozen.", value.id),
                        ));
                    }
                    if value.canceled {
                        return Err(EngineError::conflict(
                            ConflictCode::ValueCanceled,
                            format!("Value '{}' has been canceled.", value.id),
                        ));
                    }
                }
                let amount = -step.balance_change;
                let uses = step.uses_remaining_change.map(|change| -change);
                let what = format!("balance of Value '{}'", value.id);
                if let Some(balance) = value.balance
                    && checked_change(balance, amount, &what)? < 0
                {
                    return Err(EngineError::conflict(
                        ConflictCode::InsufficientBalance,
                        format!(
                            "Value '{}' has insufficient balance ({balance}) to reverse {}.",
                            value.id, -amount
                        ),
                    ));
                }
                let what = format!("usesRemaining of Value '{}'", value.id);
                if let (Some(remaining), Some(delta)) = (value.uses_remaining, uses)
                    && checked_change(remaining, delta, &what)? < 0
                {
                    return Err(EngineError::conflict(
                        ConflictCode::InsufficientUsesRemaining,
                        format!(
                            "Value '{}' has insufficient uses ({remaining}) to reverse.",
                            value.id
                        ),
                    ));
                }
                steps.push(PlanStep::Lightrail(LightrailPlanStep {
                    value: value.clone(),
                    amount,
                    uses,
                }));
            }
            Step::External(step) => {
                let Some(charge_id) = step.charge_id.as_ref() else {
                    continue;
                };
                if step.amount == 0 {
                    continue;
                }
                steps.push(PlanStep::External(ExternalPlanStep {
                    source: step.source.clone(),
                    customer: step.customer.clone(),
                    amount: -step.amount,
                    action: ExternalAction::Refund {
                        charge_id: charge_id.clone(),
                    },
                }));
            }
            Step::Internal(step) => steps.push(PlanStep::Internal(InternalPlanStep {
                internal_id: step.internal_id.clone(),
                balance_before: step.balance_after,
                amount: -step.balance_change,
            })),
        }
    }
    Ok(steps)
}
