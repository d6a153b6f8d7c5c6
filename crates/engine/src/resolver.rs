//! Payment source resolution.
//!
//! Turns the abstract [`PaymentSource`] descriptors of a request into
//! concrete parties carrying a [`Value`] snapshot. Snapshots are read before
//! the executor opens its database transaction; every ledger update is
//! conditioned on the snapshot, so a Value changed in between fails the
//! commit with `ValueConcurrentlyModified`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::{ConflictCode, Currency, EngineError, ResultEngine, Value, values};

/// Where value for a transaction comes from (or goes to).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rail", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PaymentSource {
    /// A ledger Value named by exactly one of id, code or owning contact.
    Lightrail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contact_id: Option<String>,
    },
    /// Card-network charge.
    External {
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        customer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_amount: Option<i64>,
    },
    /// Untracked pool with a declared balance.
    Internal {
        internal_id: String,
        balance: i64,
        #[serde(default)]
        pretax: bool,
        #[serde(default)]
        before_lightrail: bool,
    },
}

impl PaymentSource {
    pub fn value_id(id: impl Into<String>) -> Self {
        PaymentSource::Lightrail {
            value_id: Some(id.into()),
            code: None,
            contact_id: None,
        }
    }

    pub fn code(code: impl Into<String>) -> Self {
        PaymentSource::Lightrail {
            value_id: None,
            code: Some(code.into()),
            contact_id: None,
        }
    }

    pub fn contact(contact_id: impl Into<String>) -> Self {
        PaymentSource::Lightrail {
            value_id: None,
            code: None,
            contact_id: Some(contact_id.into()),
        }
    }

    pub fn card(source: impl Into<String>) -> Self {
        PaymentSource::External {
            source: Some(source.into()),
            customer: None,
            max_amount: None,
        }
    }

    pub(crate) fn validate(&self, label: &str) -> ResultEngine<()> {
        match self {
            PaymentSource::Lightrail {
                value_id,
                code,
                contact_id,
            } => {
                let named = [value_id, code, contact_id]
                    .iter()
                    .filter(|field| field.is_some())
                    .count();
                if named != 1 {
                    return Err(EngineError::Validation(format!(
                        "{label} must name exactly one of valueId, code or contactId"
                    )));
                }
                Ok(())
            }
            PaymentSource::External {
                source,
                customer,
                max_amount,
            } => {
                if source.is_none() && customer.is_none() {
                    return Err(EngineError::Validation(format!(
                        "{label} must name a source or a customer"
                    )));
                }
                if max_amount.is_some_and(|max| max < 0) {
                    return Err(EngineError::Validation(format!(
                        "{label}.maxAmount must be >= 0"
                    )));
                }
                Ok(())
            }
            PaymentSource::Internal {
                internal_id,
                balance,
                ..
            } => {
                if internal_id.trim().is_empty() {
                    return Err(EngineError::Validation(format!(
                        "{label}.internalId must not be empty"
                    )));
                }
                if *balance < 0 {
                    return Err(EngineError::Validation(format!(
                        "{label}.balance must be >= 0"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A ledger Value found for the request.
#[derive(Clone, Debug, PartialEq)]
pub struct LightrailParty {
    pub value: Value,
    /// Named by id or code rather than found through a contact.
    pub explicit: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalParty {
    pub source: Option<String>,
    pub customer: Option<String>,
    pub max_amount: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalParty {
    pub internal_id: String,
    pub balance: i64,
    pub pretax: bool,
    pub before_lightrail: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedParty {
    Lightrail(LightrailParty),
    External(ExternalParty),
    Internal(InternalParty),
}

/// Output of [`resolve_sources`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub parties: Vec<ResolvedParty>,
    /// Contacts named directly as sources, whether or not they exist.
    pub contact_ids: BTreeSet<String>,
}

impl Resolution {
    pub fn lightrail(&self) -> impl Iterator<Item = &LightrailParty> {
        self.parties.iter().filter_map(|party| match party {
            ResolvedParty::Lightrail(party) => Some(party),
            _ => None,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolveOptions {
    pub now: DateTime<Utc>,
    pub allow_frozen_canceled: bool,
    /// Reject Values with no uses left. Off for credit and transfer destinations.
    pub require_uses: bool,
}

impl ResolveOptions {
    /// Options for resolving a Value that receives value rather than drawing it.
    pub(crate) fn receiving(self) -> Self {
        Self {
            require_uses: false,
            ..self
        }
    }
}

pub(crate) async fn find_value<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    value_id: &str,
) -> ResultEngine<Option<Value>> {
    values::Entity::find_by_id((owner_id.to_string(), value_id.to_string()))
        .one(db)
        .await?
        .map(Value::try_from)
        .transpose()
}

async fn find_value_by_code<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    code: &str,
) -> ResultEngine<Option<Value>> {
    values::Entity::find()
        .filter(values::Column::OwnerId.eq(owner_id))
        .filter(values::Column::Code.eq(code))
        .one(db)
        .await?
        .map(Value::try_from)
        .transpose()
}

async fn find_contact_values<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    contact_id: &str,
    currency: &Currency,
) -> ResultEngine<Vec<Value>> {
    values::Entity::find()
        .filter(values::Column::OwnerId.eq(owner_id))
        .filter(values::Column::ContactId.eq(contact_id))
        .filter(values::Column::Currency.eq(currency.code()))
        .order_by_asc(values::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(Value::try_from)
        .collect()
}

/// Check an explicitly named Value and turn its ineligibility into a conflict.
pub(crate) fn require_eligible(
    value: &Value,
    currency: &Currency,
    options: ResolveOptions,
) -> ResultEngine<()> {
    if &value.currency != currency {
        return Err(EngineError::conflict(
            ConflictCode::WrongCurrency,
            format!(
                "Value '{}' is in currency {} which does not match the transaction currency {}.",
                value.id, value.currency, currency
            ),
        ));
    }
    value
        .check_eligible(
            options.now,
            options.allow_frozen_canceled,
            options.require_uses,
        )
        .map_err(|(code, message)| EngineError::conflict(code, message))
}

/// Resolve every source in request order.
///
/// Explicit parties (by id or code) fail hard when missing or ineligible.
/// Contact parties contribute whichever of the contact's Values are eligible,
/// and nothing at all when the contact has none.
pub(crate) async fn resolve_sources<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    currency: &Currency,
    sources: &[PaymentSource],
    options: ResolveOptions,
) -> ResultEngine<Resolution> {
    let mut resolution = Resolution::default();
    let mut seen = BTreeSet::new();

    for source in sources {
        match source {
            PaymentSource::Lightrail {
                value_id: Some(value_id),
                ..
            } => {
                let value = find_value(db, owner_id, value_id)
                    .await?
                    .ok_or_else(|| EngineError::ValueNotFound(value_id.clone()))?;
                require_eligible(&value, currency, options)?;
                if seen.insert(value.id.clone()) {
                    resolution.parties.push(ResolvedParty::Lightrail(LightrailParty {
                        value,
                        explicit: true,
                    }));
                }
            }
            PaymentSource::Lightrail {
                code: Some(code), ..
            } => {
                let value = find_value_by_code(db, owner_id, code).await?.ok_or_else(|| {
                    EngineError::conflict(
                        ConflictCode::InvalidParty,
                        "No Value found for the given code.",
                    )
                })?;
                require_eligible(&value, currency, options)?;
                if seen.insert(value.id.clone()) {
                    resolution.parties.push(ResolvedParty::Lightrail(LightrailParty {
                        value,
                        explicit: true,
                    }));
                }
            }
            PaymentSource::Lightrail {
                contact_id: Some(contact_id),
                ..
            } => {
                resolution.contact_ids.insert(contact_id.clone());
                for value in find_contact_values(db, owner_id, contact_id, currency).await? {
                    if value
                        .check_eligible(
                            options.now,
                            options.allow_frozen_canceled,
                            options.require_uses,
                        )
                        .is_err()
                    {
                        continue;
                    }
                    if seen.insert(value.id.clone()) {
                        resolution.parties.push(ResolvedParty::Lightrail(LightrailParty {
                            value,
                            explicit: false,
                        }));
                    }
                }
            }
            PaymentSource::Lightrail { .. } => {
                return Err(EngineError::Validation(
                    "lightrail source must name a valueId, code or contactId".to_string(),
                ));
            }
            PaymentSource::External {
                source,
                customer,
                max_amount,
            } => resolution
                .parties
                .push(ResolvedParty::External(ExternalParty {
                    source: source.clone(),
                    customer: customer.clone(),
                    max_amount: *max_amount,
                })),
            PaymentSource::Internal {
                internal_id,
                balance,
                pretax,
                before_lightrail,
            } => resolution
                .parties
                .push(ResolvedParty::Internal(InternalParty {
                    internal_id: internal_id.clone(),
                    balance: *balance,
                    pretax: *pretax,
                    before_lightrail: *before_lightrail,
                })),
        }
    }

    Ok(resolution)
}

/// Resolve the single ledger party of a debit, credit or transfer.
pub(crate) async fn resolve_single_value<C: ConnectionTrait>(
    db: &C,
    owner_id: &str,
    currency: &Currency,
    source: &PaymentSource,
    options: ResolveOptions,
    label: &str,
) -> ResultEngine<Value> {
    let resolution =
        resolve_sources(db, owner_id, currency, std::slice::from_ref(source), options).await?;
    let mut values = resolution.lightrail().map(|party| party.value.clone());
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(EngineError::conflict(
            ConflictCode::InvalidParty,
            format!("The {label} could not be resolved to a single Value."),
        )),
    }
}
