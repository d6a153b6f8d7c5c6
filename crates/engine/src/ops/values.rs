use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    ConflictCode, CreateValueCmd, EngineError, ResultEngine, Step, Transaction, TransactionType,
    Value, resolver, steps,
    steps::LightrailStep,
    tags::{TagCoordinator, contact_tag},
    transactions, util, values,
};

use super::{Engine, with_tx};

#[derive(Clone, Copy, Debug)]
enum Flag {
    Freeze,
    Unfreeze,
    Cancel,
}

fn value_from_cmd(cmd: CreateValueCmd, now: DateTime<Utc>) -> Value {
    Value {
        id: cmd.id,
        currency: cmd.currency,
        balance: cmd.balance.or_else(|| cmd.value_rule.is_none().then_some(0)),
        uses_remaining: cmd.uses_remaining,
        active: cmd.active,
        frozen: false,
        canceled: false,
        start_date: cmd.start_date,
        end_date: cmd.end_date,
        contact_id: cmd.contact_id,
        code: cmd.code,
        is_generic_code: cmd.is_generic_code,
        redemption_rule: cmd.redemption_rule,
        value_rule: cmd.value_rule,
        discount: cmd.discount,
        discount_seller_liability: cmd.discount_seller_liability,
        pretax: cmd.pretax,
        metadata: cmd.metadata,
        created_date: now,
        updated_date: now,
    }
}

/// The `initialBalance` transaction recording a Value's starting state.
fn initial_balance(value: &Value) -> Option<Transaction> {
    let starts_with_balance = value.balance.is_some_and(|b| b > 0);
    if !starts_with_balance && value.uses_remaining.is_none() {
        return None;
    }
    let step = Step::Lightrail(LightrailStep {
        value_id: value.id.clone(),
        contact_id: value.contact_id.clone(),
        code: value.code_for_step(),
        balance_before: value.balance.map(|_| 0),
        balance_after: value.balance,
        balance_change: value.balance.unwrap_or(0),
        uses_remaining_before: value.uses_remaining.map(|_| 0),
        uses_remaining_after: value.uses_remaining,
        uses_remaining_change: value.uses_remaining,
    });
    Some(Transaction {
        id: value.id.clone(),
        transaction_type: TransactionType::InitialBalance,
        currency: value.currency.clone(),
        line_items: None,
        steps: vec![step],
        payment_sources: None,
        totals: None,
        root_transaction_id: value.id.clone(),
        previous_transaction_id: None,
        next_transaction_id: None,
        pending_void_date: None,
        tags: value.contact_id.iter().map(|c| contact_tag(c)).collect(),
        metadata: None,
        created_date: value.created_date,
        simulated: false,
    })
}

impl Engine {
    /// Provision a Value. A starting balance or uses count is recorded as an
    /// `initialBalance` transaction sharing the Value's id.
    pub async fn create_value(&self, owner_id: &str, cmd: CreateValueCmd) -> ResultEngine<Value> {
        util::validate_id(owner_id, "ownerId")?;
        cmd.validate()?;
        let value = value_from_cmd(cmd, Utc::now());
        let initial = initial_balance(&value);

        let stored: ResultEngine<()> = with_tx!(self, |db_tx| {
            values::Entity::insert(values::ActiveModel::from_value(owner_id, &value)?)
                .exec_without_returning(&db_tx)
                .await
                .map_err(|err| {
                    util::unique_violation_as(
                        err,
                        ConflictCode::ValueExists,
                        "A Value with this id or code already exists.",
                    )
                })?;
            if let Some(tx) = &initial {
                self.insert_initial_balance(&db_tx, owner_id, tx).await?;
            }
            Ok(())
        });
        stored?;

        tracing::info!(
            value_id = value.id.as_str(),
            balance = value.balance,
            uses_remaining = value.uses_remaining,
            "value created"
        );
        if let Some(tx) = initial {
            self.announce(owner_id, &tx);
        }
        Ok(value)
    }

    async fn insert_initial_balance(
        &self,
        db_tx: &DatabaseTransaction,
        owner_id: &str,
        tx: &Transaction,
    ) -> ResultEngine<()> {
        transactions::Entity::insert(transactions::ActiveModel::from_transaction(owner_id, tx)?)
            .exec_without_returning(db_tx)
            .await
            .map_err(|err| {
                util::unique_violation_as(
                    err,
                    ConflictCode::TransactionExists,
                    "A transaction with this id already exists.",
                )
            })?;
        let models = tx
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| steps::ActiveModel::from_step(owner_id, &tx.id, index, step))
            .collect::<ResultEngine<Vec<_>>>()?;
        steps::Entity::insert_many(models)
            .exec_without_returning(db_tx)
            .await?;
        let tags: BTreeSet<String> = tx.tags.iter().cloned().collect();
        TagCoordinator::persist(db_tx, owner_id, &tx.id, &tags).await
    }

    pub async fn value(&self, owner_id: &str, value_id: &str) -> ResultEngine<Value> {
        resolver::find_value(&self.database, owner_id, value_id)
            .await?
            .ok_or_else(|| EngineError::ValueNotFound(value_id.to_string()))
    }

    pub async fn value_by_code(&self, owner_id: &str, code: &str) -> ResultEngine<Value> {
        values::Entity::find()
            .filter(values::Column::OwnerId.eq(owner_id))
            .filter(values::Column::Code.eq(code))
            .one(&self.database)
            .await?
            .map(Value::try_from)
            .transpose()?
            .ok_or_else(|| EngineError::ValueNotFound(format!("code ending {}", last_four(code))))
    }

    /// Freeze a Value. Frozen Values cannot be charged or reversed into, but
    /// pending holds on them can still be voided.
    pub async fn freeze_value(&self, owner_id: &str, value_id: &str) -> ResultEngine<Value> {
        self.set_flag(owner_id, value_id, Flag::Freeze).await
    }

    pub async fn unfreeze_value(&self, owner_id: &str, value_id: &str) -> ResultEngine<Value> {
        self.set_flag(owner_id, value_id, Flag::Unfreeze).await
    }

    /// Cancel a Value permanently.
    pub async fn cancel_value(&self, owner_id: &str, value_id: &str) -> ResultEngine<Value> {
        self.set_flag(owner_id, value_id, Flag::Cancel).await
    }

    async fn set_flag(&self, owner_id: &str, value_id: &str, flag: Flag) -> ResultEngine<Value> {
        with_tx!(self, |db_tx| {
            let mut value = resolver::find_value(&db_tx, owner_id, value_id)
                .await?
                .ok_or_else(|| EngineError::ValueNotFound(value_id.to_string()))?;
            if value.canceled && matches!(flag, Flag::Unfreeze) {
                return Err(EngineError::conflict(
                    ConflictCode::ValueCanceled,
                    format!("Value '{value_id}' has been canceled."),
                ));
            }
            match flag {
                Flag::Freeze => value.frozen = true,
                Flag::Unfreeze => value.frozen = false,
                Flag::Cancel => value.canceled = true,
            }
            value.updated_date = Utc::now();

            let active = values::ActiveModel {
                owner_id: ActiveValue::Set(owner_id.to_string()),
                id: ActiveValue::Set(value.id.clone()),
                frozen: ActiveValue::Set(value.frozen),
                canceled: ActiveValue::Set(value.canceled),
                updated_date: ActiveValue::Set(value.updated_date),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            tracing::info!(value_id, ?flag, "value flags updated");
            Ok(value)
        })
    }
}

fn last_four(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}
