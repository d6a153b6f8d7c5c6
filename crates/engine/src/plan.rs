//! Transaction plans.
//!
//! A [`TransactionPlan`] is the computed, not yet committed set of steps and
//! totals for a request. Building a plan never writes: every planning
//! conflict (insufficient value, wrong party, ...) is raised here, before the
//! executor touches the ledger or the external rail.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as Json;

use crate::{
    CheckoutRequest, ConflictCode, CreditRequest, Currency, DebitRequest, EngineError, LineItem,
    PaymentSource, ResultEngine, Step, Totals, TransactionType, TransferRequest, Value,
    allocator::LineItemAllocator,
    resolver::{ExternalParty, ResolvedParty, Resolution},
    rules::RuleEngine,
    steps::{ExternalStep, InternalStep, LightrailStep},
    tags::TagCoordinator,
};

/// Planned balance change on a ledger Value. `value` is the snapshot the
/// optimistic update is conditioned on.
#[derive(Clone, Debug, PartialEq)]
pub struct LightrailPlanStep {
    pub value: Value,
    pub amount: i64,
    pub uses: Option<i64>,
}

/// `before + change`, or a validation error naming `what` when it does not fit.
pub(crate) fn checked_change(before: i64, change: i64, what: &str) -> ResultEngine<i64> {
    before
        .checked_add(change)
        .ok_or_else(|| EngineError::Validation(format!("{what} would overflow")))
}

impl LightrailPlanStep {
    pub fn balance_after(&self) -> ResultEngine<Option<i64>> {
        self.value
            .balance
            .map(|balance| {
                checked_change(
                    balance,
                    self.amount,
                    &format!("balance of Value '{}'", self.value.id),
                )
            })
            .transpose()
    }

    pub fn uses_after(&self) -> ResultEngine<Option<i64>> {
        self.value
            .uses_remaining
            .map(|uses| {
                checked_change(
                    uses,
                    self.uses.unwrap_or(0),
                    &format!("usesRemaining of Value '{}'", self.value.id),
                )
            })
            .transpose()
    }

    pub(crate) fn to_step(&self) -> ResultEngine<Step> {
        Ok(Step::Lightrail(LightrailStep {
            value_id: self.value.id.clone(),
            contact_id: self.value.contact_id.clone(),
            code: self.value.code_for_step(),
            balance_before: self.value.balance,
            balance_after: self.balance_after()?,
            balance_change: self.amount,
            uses_remaining_before: self.value.uses_remaining,
            uses_remaining_after: self.uses_after()?,
            uses_remaining_change: self.value.uses_remaining.map(|_| self.uses.unwrap_or(0)),
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalAction {
    /// `capture: false` places an authorization only.
    Charge { capture: bool },
    Capture { charge_id: String },
    Refund { charge_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalPlanStep {
    pub source: Option<String>,
    pub customer: Option<String>,
    pub amount: i64,
    pub action: ExternalAction,
}

impl ExternalPlanStep {
    pub(crate) fn preview(&self) -> Step {
        let charge_id = match &self.action {
            ExternalAction::Charge { .. } => None,
            ExternalAction::Capture { charge_id } | ExternalAction::Refund { charge_id } => {
                Some(charge_id.clone())
            }
        };
        Step::External(ExternalStep {
            source: self.source.clone(),
            customer: self.customer.clone(),
            charge_id,
            amount: self.amount,
            charge: None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalPlanStep {
    pub internal_id: String,
    pub balance_before: i64,
    pub amount: i64,
}

impl InternalPlanStep {
    pub(crate) fn to_step(&self) -> ResultEngine<Step> {
        Ok(Step::Internal(InternalStep {
            internal_id: self.internal_id.clone(),
            balance_before: self.balance_before,
            balance_after: checked_change(
                self.balance_before,
                self.amount,
                &format!("balance of internal source '{}'", self.internal_id),
            )?,
            balance_change: self.amount,
        }))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlanStep {
    Lightrail(LightrailPlanStep),
    External(ExternalPlanStep),
    Internal(InternalPlanStep),
}

impl PlanStep {
    /// The step as it would be recorded, without rail records. Fails when a
    /// balance or use count would overflow.
    pub fn preview(&self) -> ResultEngine<Step> {
        match self {
            PlanStep::Lightrail(step) => step.to_step(),
            PlanStep::External(step) => Ok(step.preview()),
            PlanStep::Internal(step) => step.to_step(),
        }
    }

    /// Sign-normalized amount this step contributes toward the payable amount.
    pub fn contribution(&self) -> i64 {
        match self {
            PlanStep::Lightrail(step) => -step.amount,
            PlanStep::External(step) => -step.amount,
            PlanStep::Internal(step) => -step.amount,
        }
    }
}

/// Links a derived transaction to its chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainLink {
    pub root_transaction_id: String,
    pub previous_transaction_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionPlan {
    pub id: String,
    pub transaction_type: TransactionType,
    pub currency: Currency,
    pub line_items: Option<Vec<LineItem>>,
    pub payment_sources: Option<Vec<PaymentSource>>,
    pub steps: Vec<PlanStep>,
    pub totals: Option<Totals>,
    pub pending_void_date: Option<DateTime<Utc>>,
    pub chain: Option<ChainLink>,
    pub tags: BTreeSet<String>,
    pub metadata: Option<Json>,
    pub created_date: DateTime<Utc>,
}

impl TransactionPlan {
    pub(crate) fn new(
        id: &str,
        transaction_type: TransactionType,
        currency: Currency,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            transaction_type,
            currency,
            line_items: None,
            payment_sources: None,
            steps: Vec::new(),
            totals: None,
            pending_void_date: None,
            chain: None,
            tags: BTreeSet::new(),
            metadata: None,
            created_date,
        }
    }

    /// Sum of every planned step's contribution toward the payable amount.
    pub fn contributed(&self) -> i64 {
        self.steps.iter().map(PlanStep::contribution).sum()
    }
}

/// Source side of a transfer.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferSource {
    Lightrail(Value),
    External(ExternalParty),
}

fn insufficient(code: ConflictCode, needed: i64, available: i64) -> EngineError {
    tracing::warn!(
        code = code.as_str(),
        needed,
        available,
        "planning conflict: insufficient value"
    );
    let message = match code {
        ConflictCode::InsufficientValue => format!(
            "Insufficient value for the transaction by {}.",
            needed - available
        ),
        _ => format!(
            "Insufficient balance for the transaction by {}.",
            needed - available
        ),
    };
    EngineError::conflict(code, message)
}

fn invalid_party(message: impl Into<String>) -> EngineError {
    let message = message.into();
    tracing::warn!("planning conflict: {message}");
    EngineError::conflict(ConflictCode::InvalidParty, message)
}

/// Builds plans for the transaction types that originate a chain.
pub struct PlanBuilder<'r> {
    rules: &'r RuleEngine,
    now: DateTime<Utc>,
    pending_void_days: i64,
}

impl<'r> PlanBuilder<'r> {
    pub fn new(rules: &'r RuleEngine, now: DateTime<Utc>) -> Self {
        Self {
            rules,
            now,
            pending_void_days: crate::ops::DEFAULT_PENDING_VOID_DAYS,
        }
    }

    #[must_use]
    pub fn pending_void_days(mut self, days: i64) -> Self {
        self.pending_void_days = days;
        self
    }

    /// Plan a checkout (or order): allocate line items, then draw the
    /// remaining payable from the parties in stage order.
    pub fn checkout(
        &self,
        request: &CheckoutRequest,
        transaction_type: TransactionType,
        resolution: &Resolution,
    ) -> ResultEngine<TransactionPlan> {
        let allocation = LineItemAllocator::new(self.rules)
            .tax(request.tax.unwrap_or_default())
            .metadata(request.metadata.as_ref())
            .allocate(&request.line_items, &resolution.parties)?;

        if allocation.totals.remainder > 0 && !request.allow_remainder {
            return Err(insufficient(
                ConflictCode::InsufficientValue,
                allocation.totals.payable,
                allocation.totals.payable - allocation.totals.remainder,
            ));
        }

        let mut steps = Vec::new();
        for &index in &allocation.order {
            let amount = allocation.consumed[index];
            if amount == 0 {
                continue;
            }
            steps.push(match &resolution.parties[index] {
                ResolvedParty::Lightrail(party) => PlanStep::Lightrail(LightrailPlanStep {
                    value: party.value.clone(),
                    amount: -amount,
                    uses: party.value.uses_remaining.map(|_| -1),
                }),
                ResolvedParty::External(external) => PlanStep::External(ExternalPlanStep {
                    source: external.source.clone(),
                    customer: external.customer.clone(),
                    amount: -amount,
                    action: ExternalAction::Charge {
                        capture: !request.pending,
                    },
                }),
                ResolvedParty::Internal(internal) => PlanStep::Internal(InternalPlanStep {
                    internal_id: internal.internal_id.clone(),
                    balance_before: internal.balance,
                    amount: -amount,
                }),
            });
        }

        let mut plan =
            TransactionPlan::new(&request.id, transaction_type, request.currency.clone(), self.now);
        plan.tags = TagCoordinator::derive(&steps, &resolution.contact_ids);
        plan.line_items = Some(allocation.line_items);
        plan.payment_sources = Some(request.sources.clone());
        plan.totals = Some(allocation.totals);
        plan.steps = steps;
        plan.pending_void_date = self.pending_void_date(request);
        plan.metadata = request.metadata.clone();
        Ok(plan)
    }

    fn pending_void_date(&self, request: &CheckoutRequest) -> Option<DateTime<Utc>> {
        if !request.pending {
            return None;
        }
        Some(
            request
                .pending_void_date
                .unwrap_or_else(|| self.now + Duration::days(self.pending_void_days)),
        )
    }

    pub fn debit(&self, request: &DebitRequest, value: Value) -> ResultEngine<TransactionPlan> {
        let mut taken = 0;
        let mut remainder = 0;
        if let Some(amount) = request.amount {
            let Some(balance) = value.balance else {
                return Err(invalid_party(format!(
                    "Value '{}' has a rule-derived balance and cannot be debited by amount.",
                    value.id
                )));
            };
            if balance < amount {
                if !request.allow_remainder {
                    return Err(insufficient(
                        ConflictCode::InsufficientBalance,
                        amount,
                        balance,
                    ));
                }
                taken = balance;
                remainder = amount - balance;
            } else {
                taken = amount;
            }
        }
        let uses = match request.uses {
            Some(uses) => match value.uses_remaining {
                None => {
                    return Err(invalid_party(format!(
                        "Value '{}' does not track uses.",
                        value.id
                    )));
                }
                Some(remaining) if remaining < uses => {
                    return Err(EngineError::conflict(
                        ConflictCode::InsufficientUsesRemaining,
                        format!(
                            "Value '{}' has {remaining} uses remaining, {uses} requested.",
                            value.id
                        ),
                    ));
                }
                Some(_) => Some(-uses),
            },
            None => None,
        };

        let mut plan = TransactionPlan::new(
            &request.id,
            TransactionType::Debit,
            request.currency.clone(),
            self.now,
        );
        if taken != 0 || uses.is_some() {
            plan.steps.push(PlanStep::Lightrail(LightrailPlanStep {
                value,
                amount: -taken,
                uses,
            }));
        }
        plan.tags = TagCoordinator::derive(&plan.steps, &BTreeSet::new());
        plan.payment_sources = Some(vec![request.source.clone()]);
        plan.totals = Some(Totals::for_amount(request.amount.unwrap_or(0), remainder));
        plan.metadata = request.metadata.clone();
        Ok(plan)
    }

    pub fn credit(&self, request: &CreditRequest, value: Value) -> ResultEngine<TransactionPlan> {
        if request.amount.is_some() && value.balance.is_none() {
            return Err(invalid_party(format!(
                "Value '{}' has a rule-derived balance and cannot be credited by amount.",
                value.id
            )));
        }
        if request.uses.is_some() && value.uses_remaining.is_none() {
            return Err(invalid_party(format!(
                "Value '{}' does not track uses.",
                value.id
            )));
        }

        let mut plan = TransactionPlan::new(
            &request.id,
            TransactionType::Credit,
            request.currency.clone(),
            self.now,
        );
        let step = LightrailPlanStep {
            value,
            amount: request.amount.unwrap_or(0),
            uses: request.uses,
        };
        step.to_step()?;
        plan.steps.push(PlanStep::Lightrail(step));
        plan.tags = TagCoordinator::derive(&plan.steps, &BTreeSet::new());
        plan.payment_sources = Some(vec![request.destination.clone()]);
        plan.metadata = request.metadata.clone();
        Ok(plan)
    }

    pub fn transfer(
        &self,
        request: &TransferRequest,
        source: TransferSource,
        destination: Value,
    ) -> ResultEngine<TransactionPlan> {
        if destination.balance.is_none() {
            return Err(invalid_party(format!(
                "Value '{}' has a rule-derived balance and cannot receive a transfer.",
                destination.id
            )));
        }
        let available = match &source {
            TransferSource::Lightrail(value) => {
                if value.id == destination.id {
                    return Err(invalid_party(
                        "The transfer source and destination must differ.",
                    ));
                }
                value.balance.ok_or_else(|| {
                    invalid_party(format!(
                        "Value '{}' has a rule-derived balance and cannot be a transfer source.",
                        value.id
                    ))
                })?
            }
            TransferSource::External(external) => external.max_amount.unwrap_or(request.amount),
        };
        let taken = available.min(request.amount);
        if taken < request.amount && !request.allow_remainder {
            return Err(insufficient(
                ConflictCode::InsufficientBalance,
                request.amount,
                available,
            ));
        }

        let mut plan = TransactionPlan::new(
            &request.id,
            TransactionType::Transfer,
            request.currency.clone(),
            self.now,
        );
        if taken > 0 {
            plan.steps.push(match source {
                TransferSource::Lightrail(value) => PlanStep::Lightrail(LightrailPlanStep {
                    value,
                    amount: -taken,
                    uses: None,
                }),
                TransferSource::External(external) => PlanStep::External(ExternalPlanStep {
                    source: external.source,
                    customer: external.customer,
                    amount: -taken,
                    action: ExternalAction::Charge { capture: true },
                }),
            });
            let credit = LightrailPlanStep {
                value: destination,
                amount: taken,
                uses: None,
            };
            credit.to_step()?;
            plan.steps.push(PlanStep::Lightrail(credit));
        }
        plan.tags = TagCoordinator::derive(&plan.steps, &BTreeSet::new());
        plan.payment_sources = Some(vec![request.source.clone(), request.destination.clone()]);
        // The two steps net to zero, so only the shortfall is left payable.
        let shortfall = request.amount - taken;
        plan.totals = Some(Totals::for_amount(shortfall, shortfall));
        plan.metadata = request.metadata.clone();
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LightrailParty;

    fn usd() -> Currency {
        Currency::try_from("USD").unwrap()
    }

    fn value(id: &str, balance: Option<i64>) -> Value {
        let now = Utc::now();
        Value {
            id: id.to_string(),
            currency: usd(),
            balance,
            uses_remaining: None,
            active: true,
            frozen: false,
            canceled: false,
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
            created_date: now,
            updated_date: now,
        }
    }

    fn resolution(values: Vec<Value>) -> Resolution {
        Resolution {
            parties: values
                .into_iter()
                .map(|value| {
                    ResolvedParty::Lightrail(LightrailParty {
                        value,
                        explicit: true,
                    })
                })
                .collect(),
            contact_ids: BTreeSet::new(),
        }
    }

    #[test]
    fn checkout_plan_conserves_value() {
        let rules = RuleEngine::default();
        let request = CheckoutRequest::new("tx", usd())
            .line_item(LineItem::new(50))
            .source(PaymentSource::value_id("gc"));
        let plan = PlanBuilder::new(&rules, Utc::now())
            .checkout(
                &request,
                TransactionType::Checkout,
                &resolution(vec![value("gc", Some(1000))]),
            )
            .unwrap();
        let totals = plan.totals.unwrap();
        assert_eq!(plan.contributed(), totals.payable - totals.remainder);
        let Step::Lightrail(step) = plan.steps[0].preview().unwrap() else {
            panic!("expected a lightrail step");
        };
        assert_eq!(step.balance_before, Some(1000));
        assert_eq!(step.balance_after, Some(950));
        assert_eq!(step.balance_change, -50);
    }

    #[test]
    fn checkout_remainder_requires_opt_in() {
        let rules = RuleEngine::default();
        let request = CheckoutRequest::new("tx", usd())
            .line_item(LineItem::new(500))
            .source(PaymentSource::value_id("gc"));
        let parties = resolution(vec![value("gc", Some(200))]);
        let builder = PlanBuilder::new(&rules, Utc::now());

        let err = builder
            .checkout(&request, TransactionType::Checkout, &parties)
            .unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::InsufficientValue));

        let plan = builder
            .checkout(
                &request.allow_remainder(true),
                TransactionType::Checkout,
                &parties,
            )
            .unwrap();
        assert_eq!(plan.totals.unwrap().remainder, 300);
        assert_eq!(plan.contributed(), 200);
    }

    #[test]
    fn pending_checkout_authorizes_cards_and_sets_void_date() {
        let rules = RuleEngine::default();
        let now = Utc::now();
        let request = CheckoutRequest::new("tx", usd())
            .line_item(LineItem::new(100))
            .source(PaymentSource::card("tok"))
            .pending(true);
        let parties = Resolution {
            parties: vec![ResolvedParty::External(ExternalParty {
                source: Some("tok".to_string()),
                customer: None,
                max_amount: None,
            })],
            contact_ids: BTreeSet::new(),
        };
        let plan = PlanBuilder::new(&rules, now)
            .pending_void_days(7)
            .checkout(&request, TransactionType::Checkout, &parties)
            .unwrap();
        assert_eq!(plan.pending_void_date, Some(now + Duration::days(7)));
        assert!(matches!(
            &plan.steps[0],
            PlanStep::External(ExternalPlanStep {
                action: ExternalAction::Charge { capture: false },
                amount: -100,
                ..
            })
        ));
    }

    #[test]
    fn debit_rejects_rule_derived_balances_and_overdraws() {
        let rules = RuleEngine::default();
        let builder = PlanBuilder::new(&rules, Utc::now());
        let request = DebitRequest::new("d", usd(), PaymentSource::value_id("gc")).amount(100);

        let err = builder.debit(&request, value("gc", None)).unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::InvalidParty));

        let err = builder.debit(&request, value("gc", Some(40))).unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::InsufficientBalance));

        let plan = builder
            .debit(&request.allow_remainder(true), value("gc", Some(40)))
            .unwrap();
        assert_eq!(plan.totals, Some(Totals::for_amount(100, 60)));
        assert_eq!(plan.contributed(), 40);
    }

    #[test]
    fn debit_uses_are_checked() {
        let rules = RuleEngine::default();
        let builder = PlanBuilder::new(&rules, Utc::now());
        let mut punch_card = value("punch", None);
        punch_card.uses_remaining = Some(2);
        let request = DebitRequest::new("d", usd(), PaymentSource::value_id("punch")).uses(3);
        let err = builder.debit(&request, punch_card.clone()).unwrap_err();
        assert_eq!(
            err.conflict_code(),
            Some(ConflictCode::InsufficientUsesRemaining)
        );

        let plan = builder
            .debit(
                &DebitRequest::new("d", usd(), PaymentSource::value_id("punch")).uses(2),
                punch_card,
            )
            .unwrap();
        let Step::Lightrail(step) = plan.steps[0].preview().unwrap() else {
            panic!("expected a lightrail step");
        };
        assert_eq!(step.uses_remaining_after, Some(0));
        assert_eq!(step.uses_remaining_change, Some(-2));
    }

    #[test]
    fn transfer_mirrors_source_into_destination() {
        let rules = RuleEngine::default();
        let request = TransferRequest::new(
            "t",
            usd(),
            PaymentSource::value_id("a"),
            PaymentSource::value_id("b"),
            70,
        );
        let plan = PlanBuilder::new(&rules, Utc::now())
            .transfer(
                &request,
                TransferSource::Lightrail(value("a", Some(100))),
                value("b", Some(0)),
            )
            .unwrap();
        let changes: Vec<i64> = plan
            .steps
            .iter()
            .map(|step| -step.contribution())
            .collect();
        assert_eq!(changes, vec![-70, 70]);
        assert_eq!(plan.totals, Some(Totals::for_amount(0, 0)));
        assert_eq!(plan.contributed(), 0);

        let same = TransferRequest::new(
            "t",
            usd(),
            PaymentSource::value_id("a"),
            PaymentSource::value_id("a"),
            70,
        );
        let err = PlanBuilder::new(&rules, Utc::now())
            .transfer(
                &same,
                TransferSource::Lightrail(value("a", Some(100))),
                value("a", Some(100)),
            )
            .unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::InvalidParty));
    }

    #[test]
    fn partial_transfer_carries_the_shortfall() {
        let rules = RuleEngine::default();
        let request = TransferRequest::new(
            "t",
            usd(),
            PaymentSource::value_id("a"),
            PaymentSource::value_id("b"),
            70,
        )
        .allow_remainder(true);
        let plan = PlanBuilder::new(&rules, Utc::now())
            .transfer(
                &request,
                TransferSource::Lightrail(value("a", Some(40))),
                value("b", Some(0)),
            )
            .unwrap();
        let totals = plan.totals.unwrap();
        assert_eq!(totals.remainder, 30);
        assert_eq!(plan.contributed(), totals.payable - totals.remainder);
    }

    #[test]
    fn credit_that_overflows_the_balance_is_rejected() {
        let rules = RuleEngine::default();
        let request = CreditRequest::new("c", usd(), PaymentSource::value_id("gc")).amount(i64::MAX);
        let err = PlanBuilder::new(&rules, Utc::now())
            .credit(&request, value("gc", Some(100)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
