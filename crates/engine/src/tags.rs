//! Contact identity tags.
//!
//! A transaction is tagged with every contact it implicates: owners of the
//! Values it actually moved, plus contacts named directly as sources (even
//! one that does not exist). Derived transactions copy their predecessor's
//! tags verbatim.

use std::collections::BTreeSet;

use sea_orm::{ConnectionTrait, EntityTrait};

use crate::{ConflictCode, EngineError, ResultEngine, plan::PlanStep, transaction_tags};

const CONTACT_TAG_PREFIX: &str = "contact:";

pub fn contact_tag(contact_id: &str) -> String {
    format!("{CONTACT_TAG_PREFIX}{contact_id}")
}

pub struct TagCoordinator;

impl TagCoordinator {
    pub fn derive<'a>(
        steps: impl IntoIterator<Item = &'a PlanStep>,
        contact_ids: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        steps
            .into_iter()
            .filter_map(|step| match step {
                PlanStep::Lightrail(step) => step.value.contact_id.as_deref(),
                PlanStep::External(_) | PlanStep::Internal(_) => None,
            })
            .chain(contact_ids.iter().map(String::as_str))
            .map(contact_tag)
            .collect()
    }

    /// Persist `tags` in the caller's database transaction.
    pub(crate) async fn persist<C: ConnectionTrait>(
        db: &C,
        owner_id: &str,
        transaction_id: &str,
        tags: &BTreeSet<String>,
    ) -> ResultEngine<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let models = tags
            .iter()
            .map(|tag| transaction_tags::ActiveModel::new(owner_id, transaction_id, tag));
        transaction_tags::Entity::insert_many(models)
            .exec_without_returning(db)
            .await
            .map_err(|err| {
                tracing::warn!(transaction_id, "tag persistence failed: {err}");
                EngineError::conflict(
                    ConflictCode::TagPersistenceFailed,
                    "An error occurred processing tags.",
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{Currency, Value, plan::LightrailPlanStep};

    fn step(id: &str, contact: Option<&str>) -> PlanStep {
        let now = Utc::now();
        PlanStep::Lightrail(LightrailPlanStep {
            value: Value {
                id: id.to_string(),
                currency: Currency::try_from("USD").unwrap(),
                balance: Some(100),
                uses_remaining: None,
                active: true,
                frozen: false,
                canceled: false,
                start_date: None,
                end_date: None,
                contact_id: contact.map(str::to_string),
                code: None,
                is_generic_code: false,
                redemption_rule: None,
                value_rule: None,
                discount: false,
                discount_seller_liability: None,
                pretax: false,
                metadata: None,
                created_date: now,
                updated_date: now,
            },
            amount: -10,
            uses: None,
        })
    }

    #[test]
    fn tags_cover_charged_values_and_named_contacts() {
        let steps = [
            step("a", Some("alice")),
            step("b", Some("alice")),
            step("c", None),
        ];
        let named = BTreeSet::from(["ghost".to_string()]);
        let tags = TagCoordinator::derive(&steps, &named);
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["contact:alice".to_string(), "contact:ghost".to_string()]
        );
    }
}
