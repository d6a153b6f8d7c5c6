//! Transaction steps.
//!
//! A [`Step`] is one rail-specific line of a committed
//! [`Transaction`](crate::Transaction). Amounts are signed integer minor
//! units seen from the party:
//! - negative values are drawn from the party (gift card spent, card charged)
//! - positive values are returned to it (credit, refund, reversal)
//!
//! Every change to a Value balance happens via a Lightrail step.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::{
    EngineError,
    util::{parse_json, to_json_text},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RailKind {
    Lightrail,
    External,
    Internal,
}

impl RailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lightrail => "lightrail",
            Self::External => "external",
            Self::Internal => "internal",
        }
    }
}

impl TryFrom<&str> for RailKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "lightrail" => Ok(Self::Lightrail),
            "external" => Ok(Self::External),
            "internal" => Ok(Self::Internal),
            other => Err(EngineError::Integrity(format!("invalid step rail: {other}"))),
        }
    }
}

/// Balance change on a ledger Value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightrailStep {
    pub value_id: String,
    pub contact_id: Option<String>,
    pub code: Option<String>,
    /// `None` when the Value's balance is rule-derived.
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
    pub balance_change: i64,
    pub uses_remaining_before: Option<i64>,
    pub uses_remaining_after: Option<i64>,
    pub uses_remaining_change: Option<i64>,
}

/// Charge, capture or refund on the card-network rail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStep {
    pub source: Option<String>,
    pub customer: Option<String>,
    pub charge_id: Option<String>,
    pub amount: i64,
    /// Opaque record returned by the rail. Absent on simulated transactions.
    pub charge: Option<Json>,
}

/// Movement on an untracked internal pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalStep {
    pub internal_id: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub balance_change: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "camelCase")]
pub enum Step {
    Lightrail(LightrailStep),
    External(ExternalStep),
    Internal(InternalStep),
}

impl Step {
    /// Amount this step contributed toward the payable amount.
    pub fn contribution(&self) -> i64 {
        match self {
            Step::Lightrail(step) => -step.balance_change,
            Step::External(step) => -step.amount,
            Step::Internal(step) => -step.balance_change,
        }
    }

    pub fn value_id(&self) -> Option<&str> {
        match self {
            Step::Lightrail(step) => Some(step.value_id.as_str()),
            Step::External(_) | Step::Internal(_) => None,
        }
    }

    fn rail(&self) -> RailKind {
        match self {
            Step::Lightrail(_) => RailKind::Lightrail,
            Step::External(_) => RailKind::External,
            Step::Internal(_) => RailKind::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transaction_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub transaction_id: String,
    pub step_index: i32,
    pub rail: String,
    pub value_id: Option<String>,
    pub contact_id: Option<String>,
    pub code: Option<String>,
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
    pub balance_change: i64,
    pub uses_remaining_before: Option<i64>,
    pub uses_remaining_after: Option<i64>,
    pub uses_remaining_change: Option<i64>,
    pub source: Option<String>,
    pub customer: Option<String>,
    pub charge_id: Option<String>,
    pub charge: Option<String>,
    pub internal_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_step(
        owner_id: &str,
        transaction_id: &str,
        step_index: usize,
        step: &Step,
    ) -> Result<Self, EngineError> {
        let mut model = Self {
            id: ActiveValue::Set(Uuid::new_v4().to_string()),
            owner_id: ActiveValue::Set(owner_id.to_string()),
            transaction_id: ActiveValue::Set(transaction_id.to_string()),
            step_index: ActiveValue::Set(i32::try_from(step_index).map_err(|_| {
                EngineError::Validation("too many steps in one transaction".to_string())
            })?),
            rail: ActiveValue::Set(step.rail().as_str().to_string()),
            value_id: ActiveValue::Set(None),
            contact_id: ActiveValue::Set(None),
            code: ActiveValue::Set(None),
            balance_before: ActiveValue::Set(None),
            balance_after: ActiveValue::Set(None),
            balance_change: ActiveValue::Set(0),
            uses_remaining_before: ActiveValue::Set(None),
            uses_remaining_after: ActiveValue::Set(None),
            uses_remaining_change: ActiveValue::Set(None),
            source: ActiveValue::Set(None),
            customer: ActiveValue::Set(None),
            charge_id: ActiveValue::Set(None),
            charge: ActiveValue::Set(None),
            internal_id: ActiveValue::Set(None),
        };
        match step {
            Step::Lightrail(step) => {
                model.value_id = ActiveValue::Set(Some(step.value_id.clone()));
                model.contact_id = ActiveValue::Set(step.contact_id.clone());
                model.code = ActiveValue::Set(step.code.clone());
                model.balance_before = ActiveValue::Set(step.balance_before);
                model.balance_after = ActiveValue::Set(step.balance_after);
                model.balance_change = ActiveValue::Set(step.balance_change);
                model.uses_remaining_before = ActiveValue::Set(step.uses_remaining_before);
                model.uses_remaining_after = ActiveValue::Set(step.uses_remaining_after);
                model.uses_remaining_change = ActiveValue::Set(step.uses_remaining_change);
            }
            Step::External(step) => {
                model.source = ActiveValue::Set(step.source.clone());
                model.customer = ActiveValue::Set(step.customer.clone());
                model.charge_id = ActiveValue::Set(step.charge_id.clone());
                model.balance_change = ActiveValue::Set(step.amount);
                model.charge = ActiveValue::Set(to_json_text(step.charge.as_ref())?);
            }
            Step::Internal(step) => {
                model.internal_id = ActiveValue::Set(Some(step.internal_id.clone()));
                model.balance_before = ActiveValue::Set(Some(step.balance_before));
                model.balance_after = ActiveValue::Set(Some(step.balance_after));
                model.balance_change = ActiveValue::Set(step.balance_change);
            }
        }
        Ok(model)
    }
}

fn required<T>(field: Option<T>, label: &str, step_id: &str) -> Result<T, EngineError> {
    field.ok_or_else(|| EngineError::Integrity(format!("step '{step_id}' is missing {label}")))
}

impl TryFrom<Model> for Step {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        match RailKind::try_from(model.rail.as_str())? {
            RailKind::Lightrail => Ok(Step::Lightrail(LightrailStep {
                value_id: required(model.value_id, "value_id", &model.id)?,
                contact_id: model.contact_id,
                code: model.code,
                balance_before: model.balance_before,
                balance_after: model.balance_after,
                balance_change: model.balance_change,
                uses_remaining_before: model.uses_remaining_before,
                uses_remaining_after: model.uses_remaining_after,
                uses_remaining_change: model.uses_remaining_change,
            })),
            RailKind::External => Ok(Step::External(ExternalStep {
                source: model.source,
                customer: model.customer,
                charge_id: model.charge_id,
                amount: model.balance_change,
                charge: parse_json(model.charge.as_deref())?,
            })),
            RailKind::Internal => Ok(Step::Internal(InternalStep {
                balance_before: required(model.balance_before, "balance_before", &model.id)?,
                balance_after: required(model.balance_after, "balance_after", &model.id)?,
                internal_id: required(model.internal_id, "internal_id", &model.id)?,
                balance_change: model.balance_change,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contribution_is_sign_normalized() {
        let ledger = Step::Lightrail(LightrailStep {
            value_id: "gc".to_string(),
            contact_id: None,
            code: None,
            balance_before: Some(1000),
            balance_after: Some(950),
            balance_change: -50,
            uses_remaining_before: None,
            uses_remaining_after: None,
            uses_remaining_change: None,
        });
        let card = Step::External(ExternalStep {
            source: Some("tok_visa".to_string()),
            customer: None,
            charge_id: Some("ch_1".to_string()),
            amount: -25,
            charge: None,
        });
        assert_eq!(ledger.contribution() + card.contribution(), 75);
        assert_eq!(ledger.value_id(), Some("gc"));
        assert_eq!(card.value_id(), None);
    }

    #[test]
    fn steps_serialize_tagged_by_rail() {
        let step = Step::Internal(InternalStep {
            internal_id: "points".to_string(),
            balance_before: 10,
            balance_after: 0,
            balance_change: -10,
        });
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["rail"], "internal");
        assert_eq!(json["internalId"], "points");
    }
}
