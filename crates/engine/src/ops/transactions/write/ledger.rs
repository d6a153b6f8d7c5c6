use chrono::Utc;

use crate::{
    CreditRequest, DebitRequest, PaymentSource, ResultEngine, Transaction, TransferRequest,
    plan::{PlanBuilder, TransferSource},
    resolver::{self, ExternalParty},
    util,
};

use super::{super::super::Engine, ensure_new_transaction};

impl Engine {
    /// Draw an amount and/or uses from a single Value.
    pub async fn debit(&self, owner_id: &str, request: DebitRequest) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;

        let now = Utc::now();
        let value = resolver::resolve_single_value(
            &self.database,
            owner_id,
            &request.currency,
            &request.source,
            Self::resolve_options(now, false),
            "debit source",
        )
        .await?;
        let plan = PlanBuilder::new(&self.rules, now).debit(&request, value)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }

    /// Add an amount and/or uses to a single Value.
    pub async fn credit(&self, owner_id: &str, request: CreditRequest) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;

        let now = Utc::now();
        let value = resolver::resolve_single_value(
            &self.database,
            owner_id,
            &request.currency,
            &request.destination,
            Self::resolve_options(now, false).receiving(),
            "credit destination",
        )
        .await?;
        let plan = PlanBuilder::new(&self.rules, now).credit(&request, value)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }

    /// Move value into a ledger Value, from another Value or from a card.
    pub async fn transfer(
        &self,
        owner_id: &str,
        request: TransferRequest,
    ) -> ResultEngine<Transaction> {
        util::validate_id(owner_id, "ownerId")?;
        request.validate()?;
        ensure_new_transaction(&self.database, owner_id, &request.id).await?;

        let now = Utc::now();
        let options = Self::resolve_options(now, false);
        let source = match &request.source {
            PaymentSource::External {
                source,
                customer,
                max_amount,
            } => TransferSource::External(ExternalParty {
                source: source.clone(),
                customer: customer.clone(),
                max_amount: *max_amount,
            }),
            other => TransferSource::Lightrail(
                resolver::resolve_single_value(
                    &self.database,
                    owner_id,
                    &request.currency,
                    other,
                    options,
                    "transfer source",
                )
                .await?,
            ),
        };
        let destination = resolver::resolve_single_value(
            &self.database,
            owner_id,
            &request.currency,
            &request.destination,
            options.receiving(),
            "transfer destination",
        )
        .await?;
        let plan = PlanBuilder::new(&self.rules, now).transfer(&request, source, destination)?;
        self.execute_plan(owner_id, plan, request.simulate).await
    }
}
