//! Stored-value ledger and multi-rail payment transaction engine.
//!
//! The [`Engine`] resolves payment sources into ledger Values, prices line
//! items with a small rule language, builds a balanced [`TransactionPlan`]
//! over the ledger, card and internal rails, and commits it atomically.
//! Committed transactions form append-only chains through capture, void and
//! reverse.

pub use allocator::{Allocation, LineItemAllocator};
pub use chain::ChainManager;
pub use commands::{
    ChainRequest, CheckoutRequest, CreateValueCmd, CreditRequest, DebitRequest,
    TransactionRequest, TransferRequest,
};
pub use currency::Currency;
pub use error::{ConflictCode, EngineError};
pub use line_items::{
    LineItem, LineItemType, LineTotal, MarketplaceTotals, TaxOptions, TaxRoundingMode, Totals,
};
pub use ops::{
    DEFAULT_PENDING_VOID_DAYS, DEFAULT_REFUND_ATTEMPTS, Engine, EngineBuilder, EngineConfig,
    FraudOutcome, SweepReport,
};
pub use plan::{
    ChainLink, ExternalAction, ExternalPlanStep, InternalPlanStep, LightrailPlanStep, PlanBuilder,
    PlanStep, TransactionPlan, TransferSource,
};
pub use publisher::{
    Backoff, EventPublisher, EventSink, SinkError, TRANSACTION_CREATED, TransactionEvent,
};
pub use rail::{Charge, ChargeRequest, ExternalRail, RailError, Refund, UnconfiguredRail};
pub use resolver::{
    ExternalParty, InternalParty, LightrailParty, PaymentSource, Resolution, ResolvedParty,
};
pub use rules::{DEFAULT_RULE_CACHE_SIZE, Rule, RuleEngine, RuleError};
pub use steps::{ExternalStep, InternalStep, LightrailStep, Step};
pub use tags::{TagCoordinator, contact_tag};
pub use transactions::{Transaction, TransactionType};
pub use values::Value;

mod allocator;
mod chain;
mod commands;
mod currency;
mod error;
mod line_items;
mod ops;
mod plan;
mod publisher;
mod rail;
mod resolver;
mod rules;
mod steps;
mod tags;
mod transaction_tags;
mod transactions;
mod util;
mod values;

pub type ResultEngine<T> = Result<T, EngineError>;
