//! Per line item tax and discount allocation.
//!
//! Parties are applied in a fixed stage order:
//!
//! 1. pretax parties: internal pools flagged `beforeLightrail`, ledger
//!    discounts, other ledger Values, remaining internal pools
//! 2. tax, assessed per line item on what is left after the pretax stage
//! 3. posttax parties, in the same four groups
//! 4. external (card) sources, in request order
//!
//! Within a ledger group Values are ordered by soonest `endDate`, then
//! smallest balance (rule-derived balances last), then id.
//!
//! Line totals stay current between stages, so rules read the `payable`
//! left after every discount and tax applied so far.

use std::cmp::Ordering;

use serde_json::Value as Json;

use crate::{
    EngineError, LineItem, LineTotal, MarketplaceTotals, ResultEngine, TaxOptions, Totals, Value,
    plan::checked_change,
    resolver::ResolvedParty,
    rules::{RuleContext, RuleEngine, RuleValueContext},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Party(usize),
    Tax,
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
    nulls_last(a.end_date, b.end_date)
        .then_with(|| nulls_last(a.balance, b.balance))
        .then_with(|| a.id.cmp(&b.id))
}

fn internal_group(parties: &[ResolvedParty], pretax: bool, before_lightrail: bool) -> Vec<Stage> {
    parties
        .iter()
        .enumerate()
        .filter(|(_, party)| {
            matches!(party, ResolvedParty::Internal(internal)
                if internal.pretax == pretax && internal.before_lightrail == before_lightrail)
        })
        .map(|(index, _)| Stage::Party(index))
        .collect()
}

fn ledger_group(parties: &[ResolvedParty], pretax: bool, discount: bool) -> Vec<Stage> {
    let mut group: Vec<(usize, &Value)> = parties
        .iter()
        .enumerate()
        .filter_map(|(index, party)| match party {
            ResolvedParty::Lightrail(party)
                if party.value.pretax == pretax && party.value.discount == discount =>
            {
                Some((index, &party.value))
            }
            _ => None,
        })
        .collect();
    group.sort_by(|(_, a), (_, b)| compare_values(a, b));
    group
        .into_iter()
        .map(|(index, _)| Stage::Party(index))
        .collect()
}

fn stages(parties: &[ResolvedParty]) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(parties.len() + 1);
    for pretax in [true, false] {
        stages.extend(internal_group(parties, pretax, true));
        stages.extend(ledger_group(parties, pretax, true));
        stages.extend(ledger_group(parties, pretax, false));
        stages.extend(internal_group(parties, pretax, false));
        if pretax {
            stages.push(Stage::Tax);
        }
    }
    stages.extend(
        parties
            .iter()
            .enumerate()
            .filter(|(_, party)| matches!(party, ResolvedParty::External(_)))
            .map(|(index, _)| Stage::Party(index)),
    );
    stages
}

/// Result of [`LineItemAllocator::allocate`].
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    /// The request's line items with `line_total` filled in.
    pub line_items: Vec<LineItem>,
    pub totals: Totals,
    /// Amount drawn from each party, indexed like the input parties.
    pub consumed: Vec<i64>,
    /// Order in which parties were applied.
    pub order: Vec<usize>,
}

/// Computes line totals and per party amounts for a checkout.
pub struct LineItemAllocator<'r> {
    rules: &'r RuleEngine,
    tax: TaxOptions,
    metadata: Option<&'r Json>,
}

impl<'r> LineItemAllocator<'r> {
    pub fn new(rules: &'r RuleEngine) -> Self {
        Self {
            rules,
            tax: TaxOptions::default(),
            metadata: None,
        }
    }

    #[must_use]
    pub fn tax(mut self, tax: TaxOptions) -> Self {
        self.tax = tax;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Option<&'r Json>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn allocate(
        &self,
        line_items: &[LineItem],
        parties: &[ResolvedParty],
    ) -> ResultEngine<Allocation> {
        let mut items: Vec<LineItem> = line_items
            .iter()
            .map(|item| {
                let subtotal = item.unit_price.checked_mul(item.quantity).ok_or_else(|| {
                    EngineError::Validation("line item subtotal would overflow".to_string())
                })?;
                let mut item = item.clone();
                item.line_total = Some(LineTotal {
                    subtotal,
                    payable: subtotal,
                    remainder: subtotal,
                    ..LineTotal::default()
                });
                Ok(item)
            })
            .collect::<ResultEngine<_>>()?;
        let mut consumed = vec![0_i64; parties.len()];
        let mut order = Vec::with_capacity(parties.len());

        for stage in stages(parties) {
            match stage {
                Stage::Tax => self.apply_tax(&mut items)?,
                Stage::Party(index) => {
                    order.push(index);
                    consumed[index] = match &parties[index] {
                        ResolvedParty::Lightrail(party) => {
                            self.apply_value(&mut items, &party.value)?
                        }
                        ResolvedParty::Internal(internal) => {
                            apply_capped(&mut items, Some(internal.balance))
                        }
                        ResolvedParty::External(external) => {
                            apply_capped(&mut items, external.max_amount)
                        }
                    };
                }
            }
        }

        let totals = totals_of(&items)?;
        Ok(Allocation {
            line_items: items,
            totals,
            consumed,
            order,
        })
    }

    fn apply_tax(&self, items: &mut [LineItem]) -> ResultEngine<()> {
        for item in items {
            let rate = item.tax_rate;
            if let Some(total) = item.line_total.as_mut() {
                total.taxable = total.remainder;
                total.tax = self.tax.rounding_mode.round(total.taxable as f64 * rate);
                total.remainder = checked_change(total.remainder, total.tax, "line item total")?;
                total.payable = checked_change(total.payable, total.tax, "line item payable")?;
            }
        }
        Ok(())
    }

    fn context(&self, items: &[LineItem], index: usize, value: &Value) -> ResultEngine<Json> {
        let context = RuleContext {
            current_line_item: items.get(index),
            line_items: items,
            totals: totals_of(items)?,
            total: items.iter().try_fold(0_i64, |sum, item| {
                checked_change(sum, item.total().subtotal, "subtotal")
            })?,
            value: Some(RuleValueContext {
                id: &value.id,
                balance: value.balance,
                uses_remaining: value.uses_remaining,
                discount: value.discount,
                pretax: value.pretax,
                contact_id: value.contact_id.as_deref(),
                metadata: value.metadata.as_ref(),
            }),
            metadata: self.metadata,
        };
        Ok(context.to_json()?)
    }

    /// Apply one ledger Value across the line items; returns the amount drawn.
    fn apply_value(&self, items: &mut [LineItem], value: &Value) -> ResultEngine<i64> {
        let mut balance_left = value.balance;
        let mut drawn = 0;
        for index in 0..items.len() {
            let remainder = items[index].total().remainder;
            if remainder <= 0 {
                continue;
            }
            if balance_left == Some(0) {
                break;
            }
            if value.redemption_rule.is_none() && value.value_rule.is_none() && balance_left.is_none()
            {
                break;
            }

            let needs_context = value.redemption_rule.is_some() || value.value_rule.is_some();
            let context = if needs_context {
                Some(self.context(items, index, value)?)
            } else {
                None
            };
            if let (Some(rule), Some(context)) = (&value.redemption_rule, &context)
                && !self.rules.check(&rule.rule, context)?
            {
                continue;
            }
            let candidate = match (&value.value_rule, &context) {
                (Some(rule), Some(context)) => {
                    let computed = (self.rules.amount(&rule.rule, context)?.trunc() as i64).max(0);
                    balance_left.map_or(computed, |left| computed.min(left))
                }
                _ => balance_left.unwrap_or(0),
            };
            let amount = candidate.min(remainder);
            if amount <= 0 {
                continue;
            }

            let total = items[index].line_total.as_mut().ok_or_else(|| {
                EngineError::Integrity("line item has no line total".to_string())
            })?;
            total.remainder -= amount;
            if value.discount {
                total.discount += amount;
                total.payable -= amount;
                let liability = value.discount_seller_liability.unwrap_or(0.0);
                total.seller_discount += (amount as f64 * liability).trunc() as i64;
            }
            drawn += amount;
            if let Some(left) = balance_left.as_mut() {
                *left -= amount;
            }
        }
        Ok(drawn)
    }
}

/// Apply a party with an optional cap (`None` is unbounded); returns the amount drawn.
fn apply_capped(items: &mut [LineItem], cap: Option<i64>) -> i64 {
    let mut left = cap;
    let mut drawn = 0;
    for item in items {
        if left == Some(0) {
            break;
        }
        if let Some(total) = item.line_total.as_mut() {
            let amount = left.map_or(total.remainder, |left| left.min(total.remainder));
            if amount <= 0 {
                continue;
            }
            total.remainder -= amount;
            drawn += amount;
            if let Some(left) = left.as_mut() {
                *left -= amount;
            }
        }
    }
    drawn
}

fn totals_of(items: &[LineItem]) -> ResultEngine<Totals> {
    let mut totals = Totals::default();
    let mut marketplace: Option<MarketplaceTotals> = None;
    let has_marketplace = items.iter().any(|item| item.marketplace_rate.is_some());
    for item in items {
        let line = item.total();
        totals.subtotal = checked_change(totals.subtotal, line.subtotal, "subtotal")?;
        totals.tax = checked_change(totals.tax, line.tax, "tax")?;
        totals.discount = checked_change(totals.discount, line.discount, "discount")?;
        totals.payable = checked_change(totals.payable, line.payable, "payable")?;
        totals.remainder = checked_change(totals.remainder, line.remainder, "remainder")?;
        if has_marketplace {
            let rate = item.marketplace_rate.unwrap_or(0.0);
            let market = marketplace.get_or_insert_with(MarketplaceTotals::default);
            let gross = line.subtotal - (line.subtotal as f64 * rate).trunc() as i64;
            market.seller_gross = checked_change(market.seller_gross, gross, "sellerGross")?;
            market.seller_discount =
                checked_change(market.seller_discount, line.seller_discount, "sellerDiscount")?;
        }
    }
    if let Some(market) = marketplace.as_mut() {
        market.seller_net = market.seller_gross - market.seller_discount;
    }
    totals.marketplace = marketplace;
    Ok(totals)
}
