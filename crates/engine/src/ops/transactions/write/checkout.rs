use chrono::Utc;

use crate::{
    CheckoutRequest, ResultEngine, Transaction, TransactionType, plan::PlanBuilder, resolver,
    util,
};

use super::{super::super::Engine, ensure_new_transaction};

impl Engine {
    /// Pay for line items with any mix of ledger Values, card and internal sources.
    pub async fn checkout(
        &self,
        owner_id: &str,
        request: CheckoutRequest,
    ) -> ResultEngine<Transaction> {
        self.checkout_as(owner_id, request, TransactionType::Checkout)
            .await
    }

    /// A checkout recorded as an order.
    pub async fn order(&self, owner_id: &str, request: CheckoutRequest) -> ResultEngine<Transaction> {
        self.checkout_as(owner_id, request, TransactionType::Order)
            .await
    }

    pub(super) async fn checkout_as(
        &self,
        owner_id: &str,
        request: CheckoutRequest,
        transaction_type: TransactionType,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;

        let now = Utc::now();
        let resolution = resolver::resolve_sources(
            &self.database,
            owner_id,
            &request.currency,
            &request.sources,
            Self::resolve_options(now, false),
        )
        .await?;
        let plan = PlanBuilder::new(&self.rules, now)
            .pending_void_days(self.config.pending_void_days)
            .checkout(&request, transaction_type, &resolution)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }
}
