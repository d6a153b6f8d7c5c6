//! Transaction primitives.
//!
//! A `Transaction` is an atomic event that changes Value balances via one or
//! more [`Step`]s. Transactions form an append-only chain: capture, void and
//! reverse transactions point back at their predecessor, and the predecessor
//! records the successor in `next_transaction_id`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    Currency, EngineError, LineItem, MarketplaceTotals, PaymentSource, ResultEngine, Step, Totals,
    util::{parse_json, to_json_text},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    InitialBalance,
    Checkout,
    Order,
    Debit,
    Credit,
    Transfer,
    Capture,
    Void,
    Reverse,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialBalance => "initialBalance",
            Self::Checkout => "checkout",
            Self::Order => "order",
            Self::Debit => "debit",
            Self::Credit => "credit",
            Self::Transfer => "transfer",
            Self::Capture => "capture",
            Self::Void => "void",
            Self::Reverse => "reverse",
        }
    }
}

impl TryFrom<&str> for TransactionType {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "initialBalance" => Ok(Self::InitialBalance),
            "checkout" => Ok(Self::Checkout),
            "order" => Ok(Self::Order),
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            "transfer" => Ok(Self::Transfer),
            "capture" => Ok(Self::Capture),
            "void" => Ok(Self::Void),
            "reverse" => Ok(Self::Reverse),
            other => Err(EngineError::Integrity(format!(
                "invalid transaction type: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub currency: Currency,
    pub line_items: Option<Vec<LineItem>>,
    pub steps: Vec<Step>,
    pub payment_sources: Option<Vec<PaymentSource>>,
    pub totals: Option<Totals>,
    pub root_transaction_id: String,
    pub previous_transaction_id: Option<String>,
    pub next_transaction_id: Option<String>,
    pub pending_void_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub metadata: Option<Json>,
    pub created_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl Transaction {
    /// A transaction holding funds until it is captured or voided.
    pub fn is_pending(&self) -> bool {
        self.pending_void_date.is_some() && self.next_transaction_id.is_none()
    }

    /// Sum of every step's contribution toward the payable amount.
    pub fn contributed(&self) -> i64 {
        self.steps.iter().map(Step::contribution).sum()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub transaction_type: String,
    pub currency: String,
    pub line_items: Option<String>,
    pub payment_sources: Option<String>,
    pub totals_subtotal: Option<i64>,
    pub totals_tax: Option<i64>,
    pub totals_discount: Option<i64>,
    pub totals_payable: Option<i64>,
    pub totals_remainder: Option<i64>,
    pub totals_seller_gross: Option<i64>,
    pub totals_seller_discount: Option<i64>,
    pub totals_seller_net: Option<i64>,
    pub root_transaction_id: String,
    pub previous_transaction_id: Option<String>,
    pub next_transaction_id: Option<String>,
    pub pending_void_date: Option<DateTimeUtc>,
    pub metadata: Option<String>,
    pub created_date: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_transaction(owner_id: &str, tx: &Transaction) -> ResultEngine<Self> {
        let totals = tx.totals.as_ref();
        let marketplace = totals.and_then(|t| t.marketplace);
        Ok(Self {
            owner_id: ActiveValue::Set(owner_id.to_string()),
            id: ActiveValue::Set(tx.id.clone()),
            transaction_type: ActiveValue::Set(tx.transaction_type.as_str().to_string()),
            currency: ActiveValue::Set(tx.currency.code().to_string()),
            line_items: ActiveValue::Set(to_json_text(tx.line_items.as_ref())?),
            payment_sources: ActiveValue::Set(to_json_text(tx.payment_sources.as_ref())?),
            totals_subtotal: ActiveValue::Set(totals.map(|t| t.subtotal)),
            totals_tax: ActiveValue::Set(totals.map(|t| t.tax)),
            totals_discount: ActiveValue::Set(totals.map(|t| t.discount)),
            totals_payable: ActiveValue::Set(totals.map(|t| t.payable)),
            totals_remainder: ActiveValue::Set(totals.map(|t| t.remainder)),
            totals_seller_gross: ActiveValue::Set(marketplace.map(|m| m.seller_gross)),
            totals_seller_discount: ActiveValue::Set(marketplace.map(|m| m.seller_discount)),
            totals_seller_net: ActiveValue::Set(marketplace.map(|m| m.seller_net)),
            root_transaction_id: ActiveValue::Set(tx.root_transaction_id.clone()),
            previous_transaction_id: ActiveValue::Set(tx.previous_transaction_id.clone()),
            next_transaction_id: ActiveValue::Set(tx.next_transaction_id.clone()),
            pending_void_date: ActiveValue::Set(tx.pending_void_date),
            metadata: ActiveValue::Set(to_json_text(tx.metadata.as_ref())?),
            created_date: ActiveValue::Set(tx.created_date),
        })
    }
}

impl Model {
    fn totals(&self) -> Option<Totals> {
        let marketplace = match (
            self.totals_seller_gross,
            self.totals_seller_discount,
            self.totals_seller_net,
        ) {
            (Some(seller_gross), Some(seller_discount), Some(seller_net)) => {
                Some(MarketplaceTotals {
                    seller_gross,
                    seller_discount,
                    seller_net,
                })
            }
            _ => None,
        };
        Some(Totals {
            subtotal: self.totals_subtotal?,
            tax: self.totals_tax?,
            discount: self.totals_discount?,
            payable: self.totals_payable?,
            remainder: self.totals_remainder?,
            marketplace,
        })
    }

    /// Rebuild the domain transaction from its row, ordered steps and tags.
    pub(crate) fn into_transaction(
        self,
        steps: Vec<Step>,
        tags: Vec<String>,
    ) -> ResultEngine<Transaction> {
        let totals = self.totals();
        Ok(Transaction {
            transaction_type: TransactionType::try_from(self.transaction_type.as_str())?,
            currency: Currency::try_from(self.currency.as_str()).map_err(|_| {
                EngineError::Integrity(format!(
                    "transaction '{}' has invalid currency {:?}",
                    self.id, self.currency
                ))
            })?,
            line_items: parse_json(self.line_items.as_deref())?,
            payment_sources: parse_json(self.payment_sources.as_deref())?,
            totals,
            root_transaction_id: self.root_transaction_id,
            previous_transaction_id: self.previous_transaction_id,
            next_transaction_id: self.next_transaction_id,
            pending_void_date: self.pending_void_date,
            metadata: parse_json(self.metadata.as_deref())?,
            created_date: self.created_date,
            id: self.id,
            steps,
            tags,
            simulated: false,
        })
    }
}
