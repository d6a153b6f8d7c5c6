use sea_orm::{ConnectionTrait, prelude::*};

use crate::{
    ConflictCode, EngineError, ResultEngine, Transaction, TransactionRequest, TransactionType,
    transactions, util,
};

use super::super::Engine;

mod chain;
mod checkout;
mod execute;
mod ledger;
mod maintenance;

pub use maintenance::{FraudOutcome, SweepReport};

/// Fail with `TransactionExists` when `transaction_id` is already taken.
///
/// Runs before any resolution so a replayed request is rejected without
/// touching the ledger; the insert in the executor re-checks under the
/// database's unique key.
pub(super) async fn ensure_new_transaction<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    transaction_id: &str,
) -> ResultEngine<()> {
    let existing =
        transactions::Entity::find_by_id((owner_id.to_string(), transaction_id.to_string()))
            .one(db)
            .await?;
    if existing.is_some() {
        tracing::warn!(transaction_id, "transaction id already used");
        return Err(transaction_exists());
    }
    Ok(())
}

fn transaction_exists() -> EngineError {
    EngineError::conflict(
        ConflictCode::TransactionExists,
        "A transaction with this id already exists.",
    )
}

impl Engine {
    /// Create any originating transaction from a typed request.
    pub async fn create_transaction(
        &self,
        owner_id: &str,
        request: TransactionRequest,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        match request {
            TransactionRequest::Checkout(request) => {
                self.checkout_as(owner_id, request, TransactionType::Checkout)
                    .await
            }
            TransactionRequest::Order(request) => {
                self.checkout_as(owner_id, request, TransactionType::Order)
                    .await
            }
            TransactionRequest::Debit(request) => self.debit(owner_id, request).await,
            TransactionRequest::Credit(request) => self.credit(owner_id, request).await,
            TransactionRequest::Transfer(request) => self.transfer(owner_id, request).await,
        }
    }
}
