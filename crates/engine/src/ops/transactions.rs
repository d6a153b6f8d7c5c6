use std::collections::HashSet;

use sea_orm::{ConnectionTrait, QueryFilter, QueryOrder, prelude::*};

use crate::{
    EngineError, ResultEngine, Step, Transaction, TransactionType, steps, transaction_tags,
    transactions,
};

use super::Engine;

pub(super) mod write;

/// Load a transaction with its steps (in application order) and sorted tags.
pub(crate) async fn load_transaction<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    transaction_id: &str,
) -> ResultEngine<Option<Transaction>> {
    let Some(model) =
        transactions::Entity::find_by_id((owner_id.to_string(), transaction_id.to_string()))
            .one(db)
            .await?
    else {
        return Ok(None);
    };
    let steps = steps::Entity::find()
        .filter(steps::Column::OwnerId.eq(owner_id))
        .filter(steps::Column::TransactionId.eq(transaction_id))
        .order_by_asc(steps::Column::StepIndex)
        .all(db)
        .await?
        .into_iter()
        .map(Step::try_from)
        .collect::<ResultEngine<Vec<_>>>()?;
    let tags = transaction_tags::Entity::find()
        .filter(transaction_tags::Column::OwnerId.eq(owner_id))
        .filter(transaction_tags::Column::TransactionId.eq(transaction_id))
        .order_by_asc(transaction_tags::Column::Tag)
        .all(db)
        .await?
        .into_iter()
        .map(|model| model.tag)
        .collect();
    model.into_transaction(steps, tags).map(Some)
}

pub(crate) async fn require_transaction<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    transaction_id: &str,
) -> ResultEngine<Transaction> {
    load_transaction(db, owner_id, transaction_id)
        .await?
        .ok_or_else(|| EngineError::TransactionNotFound(transaction_id.to_string()))
}

/// Type of the transaction that succeeded `tx` in its chain, if any.
pub(crate) async fn successor_type<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    tx: &Transaction,
) -> ResultEngine<Option<TransactionType>> {
    let Some(next_id) = tx.next_transaction_id.as_ref() else {
        return Ok(None);
    };
    let model = transactions::Entity::find_by_id((owner_id.to_string(), next_id.clone()))
        .one(db)
        .await?
        .ok_or_else(|| {
            EngineError::Integrity(format!(
                "transaction '{}' points to missing successor '{next_id}'",
                tx.id
            ))
        })?;
    TransactionType::try_from(model.transaction_type.as_str()).map(Some)
}

impl Engine {
    pub async fn transaction(&self, owner_id: &str, transaction_id: &str) -> ResultEngine<Transaction> {
        require_transaction(&self.database, owner_id, transaction_id).await
    }

    /// Every transaction of the chain `transaction_id` belongs to, root first.
    pub async fn transaction_chain(
        &self,
        owner_id: &str,
        transaction_id: &str,
    ) -> ResultEngine<Vec<Transaction>> {
        let member = require_transaction(&self.database, owner_id, transaction_id).await?;
        let mut current = if member.root_transaction_id == member.id {
            member
        } else {
            require_transaction(&self.database, owner_id, &member.root_transaction_id).await?
        };

        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        loop {
            if !seen.insert(current.id.clone()) {
                return Err(EngineError::Integrity(format!(
                    "transaction chain of '{transaction_id}' has a cycle at '{}'",
                    current.id
                )));
            }
            let next = current.next_transaction_id.clone();
            chain.push(current);
            let Some(next) = next else {
                break;
            };
            current = require_transaction(&self.database, owner_id, &next)
                .await
                .map_err(|err| match err {
                    EngineError::TransactionNotFound(id) => EngineError::Integrity(format!(
                        "transaction chain of '{transaction_id}' is broken at '{id}'"
                    )),
                    other => other,
                })?;
        }
        Ok(chain)
    }
}
