use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;

use crate::{
    ChainRequest, EngineError, ResultEngine, Step, Transaction, TransactionType, Value,
    chain::ChainManager, resolver, util,
};

use super::{
    super::super::Engine,
    super::{require_transaction, successor_type},
    ensure_new_transaction,
};

/// Current state of every Value `tx` moved, keyed by id.
async fn current_values<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    tx: &Transaction,
) -> ResultEngine<HashMap<String, Value>> {
    let mut current = HashMap::new();
    for value_id in tx.steps.iter().filter_map(Step::value_id) {
        if current.contains_key(value_id) {
            continue;
        }
        let value = resolver::find_value(db, owner_id, value_id)
            .await?
            .ok_or_else(|| EngineError::ValueNotFound(value_id.to_string()))?;
        current.insert(value_id.to_string(), value);
    }
    Ok(current)
}

impl Engine {
    /// Make the hold of a pending transaction permanent.
    pub async fn capture(
        &self,
        owner_id: &str,
        transaction_id: &str,
        request: ChainRequest,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;

        let pending = require_transaction(&self.database, owner_id, transaction_id).await?;
        let next = successor_type(&self.database, owner_id, &pending).await?;
        let manager = ChainManager::new(Utc::now());
        manager.ensure_pending(&pending, next)?;
        let plan = manager.capture(&request, &pending)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }

    /// Release the hold of a pending transaction.
    pub async fn void(
        &self,
        owner_id: &str,
        transaction_id: &str,
        request: ChainRequest,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;
        self.void_at(owner_id, transaction_id, request, Utc::now())
            .await
    }

    pub(super) async fn void_at(
        &self,
        owner_id: &str,
        transaction_id: &str,
        request: ChainRequest,
        now: DateTime<Utc>,
    ) -> ResultEngine<Transaction> {
        let pending = require_transaction(&self.database, owner_id, transaction_id).await?;
        let next = successor_type(&self.database, owner_id, &pending).await?;
        let manager = ChainManager::new(now);
        manager.ensure_pending(&pending, next)?;
        let current = current_values(&self.database, owner_id, &pending).await?;
        let plan = manager.void(&request, &pending, &current)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }

    /// Reverse a completed transaction. Reversing a capture undoes the
    /// pending transaction it captured.
    pub async fn reverse(
        &self,
        owner_id: &str,
        transaction_id: &str,
        request: ChainRequest,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;
        self.reverse_as(owner_id, transaction_id, request, false)
            .await
    }

    /// Reverse `transaction_id`. A `compensating` reverse also credits
    /// frozen and canceled Values.
    pub(super) async fn reverse_as(
        &self,
        owner_id: &str,
        transaction_id: &str,
        request: ChainRequest,
        compensating: bool,
    ) -> ResultEngine<Transaction> {
        let tx = require_transaction(&self.database, owner_id, transaction_id).await?;
        let next = successor_type(&self.database, owner_id, &tx).await?;
        let manager = ChainManager::new(Utc::now()).compensating(compensating);
        manager.ensure_reversible(&tx, next)?;

        let captured = match (&tx.transaction_type, &tx.previous_transaction_id) {
            (TransactionType::Capture, Some(previous)) => {
                Some(require_transaction(&self.database, owner_id, previous).await?)
            }
            _ => None,
        };
        let target = captured.as_ref().unwrap_or(&tx);
        let current = current_values(&self.database, owner_id, target).await?;
        let plan = manager.reverse(&request, &tx, target, &current)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }
}
