//! Request structs for engine operations.
//!
//! These types group parameters for write operations (checkout, debit,
//! credit, transfer, chain operations, value provisioning), keeping call sites
//! readable. They deserialize from the camelCase JSON bodies the REST layer
//! receives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    Currency, EngineError, LineItem, PaymentSource, ResultEngine, TaxOptions, rules::Rule,
    util::validate_id,
};

/// Checkout (or order) against line items.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub id: String,
    pub currency: Currency,
    pub line_items: Vec<LineItem>,
    pub sources: Vec<PaymentSource>,
    #[serde(default)]
    pub allow_remainder: bool,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub pending_void_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tax: Option<TaxOptions>,
    #[serde(default)]
    pub metadata: Option<Json>,
}

impl CheckoutRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, currency: Currency) -> Self {
        Self {
            id: id.into(),
            currency,
            line_items: Vec::new(),
            sources: Vec::new(),
            allow_remainder: false,
            simulate: false,
            pending: false,
            pending_void_date: None,
            tax: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    #[must_use]
    pub fn source(mut self, source: PaymentSource) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn allow_remainder(mut self, allow: bool) -> Self {
        self.allow_remainder = allow;
        self
    }

    #[must_use]
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    #[must_use]
    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }

    #[must_use]
    pub fn tax(mut self, tax: TaxOptions) -> Self {
        self.tax = Some(tax);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Json) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")?;
        if self.line_items.is_empty() {
            return Err(EngineError::Validation(
                "lineItems must contain at least one item".to_string(),
            ));
        }
        let mut subtotal: i64 = 0;
        for (index, item) in self.line_items.iter().enumerate() {
            item.validate(index)?;
            subtotal = subtotal
                .checked_add(item.unit_price * item.quantity)
                .ok_or_else(|| {
                    EngineError::Validation("lineItems subtotal overflows".to_string())
                })?;
        }
        for (index, source) in self.sources.iter().enumerate() {
            source.validate(&format!("sources[{index}]"))?;
        }
        if self.pending_void_date.is_some() && !self.pending {
            return Err(EngineError::Validation(
                "pendingVoidDate requires pending".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remove value (and/or uses) from a single Value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub id: String,
    pub currency: Currency,
    pub source: PaymentSource,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub uses: Option<i64>,
    #[serde(default)]
    pub allow_remainder: bool,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub metadata: Option<Json>,
}

impl DebitRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, currency: Currency, source: PaymentSource) -> Self {
        Self {
            id: id.into(),
            currency,
            source,
            amount: None,
            uses: None,
            allow_remainder: false,
            simulate: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn uses(mut self, uses: i64) -> Self {
        self.uses = Some(uses);
        self
    }

    #[must_use]
    pub fn allow_remainder(mut self, allow: bool) -> Self {
        self.allow_remainder = allow;
        self
    }

    #[must_use]
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")?;
        validate_amount_and_uses(self.amount, self.uses)?;
        match &self.source {
            PaymentSource::Lightrail { .. } => self.source.validate("source"),
            _ => Err(EngineError::Validation(
                "source must be a lightrail source".to_string(),
            )),
        }
    }
}

/// Add value (and/or uses) to a single Value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditRequest {
    pub id: String,
    pub currency: Currency,
    pub destination: PaymentSource,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub uses: Option<i64>,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub metadata: Option<Json>,
}

impl CreditRequest {
    #[must_use]
    pub fn new(id: impl Into<String>, currency: Currency, destination: PaymentSource) -> Self {
        Self {
            id: id.into(),
            currency,
            destination,
            amount: None,
            uses: None,
            simulate: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn uses(mut self, uses: i64) -> Self {
        self.uses = Some(uses);
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")?;
        validate_amount_and_uses(self.amount, self.uses)?;
        match &self.destination {
            PaymentSource::Lightrail { .. } => self.destination.validate("destination"),
            _ => Err(EngineError::Validation(
                "destination must be a lightrail source".to_string(),
            )),
        }
    }
}

/// Move value from a ledger or card source into a ledger Value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub id: String,
    pub currency: Currency,
    pub source: PaymentSource,
    pub destination: PaymentSource,
    pub amount: i64,
    #[serde(default)]
    pub allow_remainder: bool,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub metadata: Option<Json>,
}

impl TransferRequest {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        currency: Currency,
        source: PaymentSource,
        destination: PaymentSource,
        amount: i64,
    ) -> Self {
        Self {
            id: id.into(),
            currency,
            source,
            destination,
            amount,
            allow_remainder: false,
            simulate: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn allow_remainder(mut self, allow: bool) -> Self {
        self.allow_remainder = allow;
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")?;
        if self.amount <= 0 {
            return Err(EngineError::Validation("amount must be > 0".to_string()));
        }
        match &self.source {
            PaymentSource::Internal { .. } => {
                return Err(EngineError::Validation(
                    "source must be a lightrail or external source".to_string(),
                ));
            }
            source => source.validate("source")?,
        }
        match &self.destination {
            PaymentSource::Lightrail { .. } => self.destination.validate("destination"),
            _ => Err(EngineError::Validation(
                "destination must be a lightrail source".to_string(),
            )),
        }
    }
}

/// Body of a capture, void or reverse request. `id` names the new transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest {
    pub id: String,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub metadata: Option<Json>,
}

impl ChainRequest {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            simulate: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")
    }
}

/// Any request accepted by [`Engine::create_transaction`](crate::Engine::create_transaction).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransactionRequest {
    Checkout(CheckoutRequest),
    Order(CheckoutRequest),
    Debit(DebitRequest),
    Credit(CreditRequest),
    Transfer(TransferRequest),
}

/// Provision a new Value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateValueCmd {
    pub id: String,
    pub currency: Currency,
    #[serde(default)]
    pub balance: Option<i64>,
    #[serde(default)]
    pub uses_remaining: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub is_generic_code: bool,
    #[serde(default)]
    pub redemption_rule: Option<Rule>,
    #[serde(default)]
    pub value_rule: Option<Rule>,
    #[serde(default)]
    pub discount: bool,
    #[serde(default)]
    pub discount_seller_liability: Option<f64>,
    #[serde(default)]
    pub pretax: bool,
    #[serde(default)]
    pub metadata: Option<Json>,
}

fn default_active() -> bool {
    true
}

impl CreateValueCmd {
    #[must_use]
    pub fn new(id: impl Into<String>, currency: Currency) -> Self {
        Self {
            id: id.into(),
            currency,
            balance: None,
            uses_remaining: None,
            active: true,
            start_date: None,
            end_date: None,
            contact_id: None,
            code: None,
            is_generic_code: false,
            redemption_rule: None,
            value_rule: None,
            discount: false,
            discount_seller_liability: None,
            pretax: false,
            metadata: None,
        }
    }

    #[must_use]
    pub fn balance(mut self, balance: i64) -> Self {
        self.balance = Some(balance);
        self
    }

    #[must_use]
    pub fn uses_remaining(mut self, uses: i64) -> Self {
        self.uses_remaining = Some(uses);
        self
    }

    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub fn start_date(mut self, date: DateTime<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }

    #[must_use]
    pub fn end_date(mut self, date: DateTime<Utc>) -> Self {
        self.end_date = Some(date);
        self
    }

    #[must_use]
    pub fn contact_id(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    #[must_use]
    pub fn code(mut self, code: impl Into<String>, is_generic: bool) -> Self {
        self.code = Some(code.into());
        self.is_generic_code = is_generic;
        self
    }

    #[must_use]
    pub fn redemption_rule(mut self, rule: Rule) -> Self {
        self.redemption_rule = Some(rule);
        self
    }

    #[must_use]
    pub fn value_rule(mut self, rule: Rule) -> Self {
        self.value_rule = Some(rule);
        self
    }

    #[must_use]
    pub fn discount(mut self, discount: bool) -> Self {
        self.discount = discount;
        self
    }

    #[must_use]
    pub fn discount_seller_liability(mut self, liability: f64) -> Self {
        self.discount_seller_liability = Some(liability);
        self
    }

    #[must_use]
    pub fn pretax(mut self, pretax: bool) -> Self {
        self.pretax = pretax;
        self
    }

    pub(crate) fn validate(&self) -> ResultEngine<()> {
        validate_id(&self.id, "id")?;
        if self.balance.is_some_and(|b| b < 0) {
            return Err(EngineError::Validation("balance must be >= 0".to_string()));
        }
        if self.uses_remaining.is_some_and(|u| u < 0) {
            return Err(EngineError::Validation(
                "usesRemaining must be >= 0".to_string(),
            ));
        }
        if self.balance.is_some() && self.value_rule.is_some() {
            return Err(EngineError::Validation(
                "balance and valueRule cannot both be set".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(EngineError::Validation(
                "startDate must not be after endDate".to_string(),
            ));
        }
        if self
            .discount_seller_liability
            .is_some_and(|l| !(0.0..=1.0).contains(&l))
        {
            return Err(EngineError::Validation(
                "discountSellerLiability must be between 0 and 1".to_string(),
            ));
        }
        if self.code.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(EngineError::Validation("code must not be empty".to_string()));
        }
        Ok(())
    }
}

fn validate_amount_and_uses(amount: Option<i64>, uses: Option<i64>) -> ResultEngine<()> {
    if amount.is_none() && uses.is_none() {
        return Err(EngineError::Validation(
            "amount or uses is required".to_string(),
        ));
    }
    if amount.is_some_and(|a| a <= 0) {
        return Err(EngineError::Validation("amount must be > 0".to_string()));
    }
    if uses.is_some_and(|u| u <= 0) {
        return Err(EngineError::Validation("uses must be > 0".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::try_from("USD").unwrap()
    }

    #[test]
    fn checkout_requires_line_items_and_bounded_id() {
        let empty = CheckoutRequest::new("tx-1", usd());
        assert!(matches!(empty.validate(), Err(EngineError::Validation(_))));

        let long = CheckoutRequest::new("x".repeat(65), usd()).line_item(LineItem::new(10));
        assert!(matches!(long.validate(), Err(EngineError::Validation(_))));

        let ok = CheckoutRequest::new("tx-1", usd())
            .line_item(LineItem::new(10))
            .source(PaymentSource::value_id("gc"));
        assert!(ok.validate().is_ok());

        let summed = CheckoutRequest::new("tx-1", usd())
            .line_item(LineItem::new(i64::MAX))
            .line_item(LineItem::new(1));
        assert!(matches!(summed.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn debit_needs_amount_or_uses() {
        let bare = DebitRequest::new("d-1", usd(), PaymentSource::value_id("gc"));
        assert!(bare.validate().is_err());
        assert!(bare.clone().uses(1).validate().is_ok());
        assert!(bare.amount(-5).validate().is_err());

        let card = DebitRequest::new("d-2", usd(), PaymentSource::card("tok")).amount(5);
        assert!(card.validate().is_err());
    }

    #[test]
    fn transaction_requests_are_tagged_by_type() {
        let request: TransactionRequest = serde_json::from_str(
            r#"{
                "type": "debit",
                "id": "d-1",
                "currency": "usd",
                "source": {"rail": "lightrail", "valueId": "gc"},
                "amount": 100
            }"#,
        )
        .unwrap();
        let TransactionRequest::Debit(debit) = request else {
            panic!("expected a debit request");
        };
        assert_eq!(debit.currency.code(), "USD");
        assert_eq!(debit.amount, Some(100));
    }

    #[test]
    fn value_cannot_have_balance_and_value_rule() {
        let cmd = CreateValueCmd::new("promo", usd())
            .balance(100)
            .value_rule(Rule::new("1", "one"));
        assert!(cmd.validate().is_err());
    }
}
