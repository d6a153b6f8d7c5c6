//! Stored-value ledger accounts.
//!
//! A [`Value`] is a gift card, account credit or promotion. Its balance (and
//! uses) only ever change through a committed transaction step. A Value whose
//! balance is rule-derived has `balance == None` and a `value_rule`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    ConflictCode, Currency, EngineError, ResultEngine,
    rules::Rule,
    util::{parse_json, to_json_text},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    pub id: String,
    pub currency: Currency,
    pub balance: Option<i64>,
    pub uses_remaining: Option<i64>,
    pub active: bool,
    pub frozen: bool,
    pub canceled: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub contact_id: Option<String>,
    #[serde(skip_serializing)]
    pub code: Option<String>,
    pub is_generic_code: bool,
    pub redemption_rule: Option<Rule>,
    pub value_rule: Option<Rule>,
    pub discount: bool,
    pub discount_seller_liability: Option<f64>,
    pub pretax: bool,
    pub metadata: Option<Json>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl Value {
    /// `true` once `end_date` has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end <= now)
    }

    /// Checks whether the Value can be transacted against at `now`.
    ///
    /// The error carries the conflict code an explicitly named Value fails with.
    /// `require_uses` is false for Values being credited, which may start at
    /// zero uses.
    pub fn check_eligible(
        &self,
        now: DateTime<Utc>,
        allow_frozen_canceled: bool,
        require_uses: bool,
    ) -> Result<(), (ConflictCode, String)> {
        if !allow_frozen_canceled {
            if self.frozen {
                return Err((
                    ConflictCode::ValueFrozen,
                    format!("Value '{}' is frozen.", self.id),
                ));
            }
            if self.canceled {
                return Err((
                    ConflictCode::ValueCanceled,
                    format!("Value '{}' has been canceled.", self.id),
                ));
            }
        }
        if !self.active {
            return Err((
                ConflictCode::ValueInactive,
                format!("Value '{}' is not active.", self.id),
            ));
        }
        if self.start_date.is_some_and(|start| start > now) {
            return Err((
                ConflictCode::ValueNotStarted,
                format!("Value '{}' cannot be transacted against yet.", self.id),
            ));
        }
        if self.is_expired(now) {
            return Err((
                ConflictCode::ValueEnded,
                format!("Value '{}' can no longer be transacted against.", self.id),
            ));
        }
        if require_uses && self.uses_remaining == Some(0) {
            return Err((
                ConflictCode::InsufficientUsesRemaining,
                format!("Value '{}' has 0 uses remaining.", self.id),
            ));
        }
        Ok(())
    }

    /// Code as recorded on a step: generic codes in full, secret codes masked
    /// to their last four characters.
    pub fn code_for_step(&self) -> Option<String> {
        let code = self.code.as_deref()?;
        if self.is_generic_code {
            return Some(code.to_string());
        }
        let chars: Vec<char> = code.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Some(format!("…{tail}"))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_values")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub owner_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub currency: String,
    pub balance: Option<i64>,
    pub uses_remaining: Option<i64>,
    pub active: bool,
    pub frozen: bool,
    pub canceled: bool,
    pub start_date: Option<DateTimeUtc>,
    pub end_date: Option<DateTimeUtc>,
    pub contact_id: Option<String>,
    pub code: Option<String>,
    pub is_generic_code: bool,
    pub redemption_rule: Option<String>,
    pub redemption_rule_explanation: Option<String>,
    pub value_rule: Option<String>,
    pub value_rule_explanation: Option<String>,
    pub discount: bool,
    pub discount_seller_liability: Option<f64>,
    pub pretax: bool,
    pub metadata: Option<String>,
    pub created_date: DateTimeUtc,
    pub updated_date: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn rule_from_columns(rule: Option<String>, explanation: Option<String>) -> Option<Rule> {
    rule.map(|rule| Rule {
        rule,
        explanation: explanation.unwrap_or_default(),
    })
}

impl ActiveModel {
    pub(crate) fn from_value(owner_id: &str, value: &Value) -> ResultEngine<Self> {
        Ok(Self {
            owner_id: ActiveValue::Set(owner_id.to_string()),
            id: ActiveValue::Set(value.id.clone()),
            currency: ActiveValue::Set(value.currency.code().to_string()),
            balance: ActiveValue::Set(value.balance),
            uses_remaining: ActiveValue::Set(value.uses_remaining),
            active: ActiveValue::Set(value.active),
            frozen: ActiveValue::Set(value.frozen),
            canceled: ActiveValue::Set(value.canceled),
            start_date: ActiveValue::Set(value.start_date),
            end_date: ActiveValue::Set(value.end_date),
            contact_id: ActiveValue::Set(value.contact_id.clone()),
            code: ActiveValue::Set(value.code.clone()),
            is_generic_code: ActiveValue::Set(value.is_generic_code),
            redemption_rule: ActiveValue::Set(value.redemption_rule.as_ref().map(|r| r.rule.clone())),
            redemption_rule_explanation: ActiveValue::Set(
                value.redemption_rule.as_ref().map(|r| r.explanation.clone()),
            ),
            value_rule: ActiveValue::Set(value.value_rule.as_ref().map(|r| r.rule.clone())),
            value_rule_explanation: ActiveValue::Set(
                value.value_rule.as_ref().map(|r| r.explanation.clone()),
            ),
            discount: ActiveValue::Set(value.discount),
            discount_seller_liability: ActiveValue::Set(value.discount_seller_liability),
            pretax: ActiveValue::Set(value.pretax),
            metadata: ActiveValue::Set(to_json_text(value.metadata.as_ref())?),
            created_date: ActiveValue::Set(value.created_date),
            updated_date: ActiveValue::Set(value.updated_date),
        })
    }
}

impl TryFrom<Model> for Value {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            currency: Currency::try_from(model.currency.as_str()).map_err(|_| {
                EngineError::Integrity(format!(
                    "value '{}' has invalid currency {:?}",
                    model.id, model.currency
                ))
            })?,
            id: model.id,
            balance: model.balance,
            uses_remaining: model.uses_remaining,
            active: model.active,
            frozen: model.frozen,
            canceled: model.canceled,
            start_date: model.start_date,
            end_date: model.end_date,
            contact_id: model.contact_id,
            code: model.code,
            is_generic_code: model.is_generic_code,
            redemption_rule: rule_from_columns(
                model.redemption_rule,
                model.redemption_rule_explanation,
            ),
            value_rule: rule_from_columns(model.value_rule, model.value_rule_explanation),
            discount: model.discount,
            discount_seller_liability: model.discount_seller_liability,
            pretax: model.pretax,
            metadata: parse_json(model.metadata.as_deref())?,
            created_date: model.created_date,
            updated_date: model.updated_date,
        })
    }
}
