use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;

use crate::{
    EventPublisher, ResultEngine, Transaction, TransactionEvent,
    rail::{ExternalRail, UnconfiguredRail},
    resolver::ResolveOptions,
    rules::{DEFAULT_RULE_CACHE_SIZE, RuleEngine},
};

mod transactions;
mod values;

pub use transactions::write::{FraudOutcome, SweepReport};

/// Days a pending transaction stays open when no explicit void date is given.
pub const DEFAULT_PENDING_VOID_DAYS: i64 = 14;
pub const DEFAULT_REFUND_ATTEMPTS: u32 = 3;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub rule_cache_size: usize,
    pub pending_void_days: i64,
    /// Attempts per compensating refund before giving up on a charge.
    pub refund_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_cache_size: DEFAULT_RULE_CACHE_SIZE,
            pending_void_days: DEFAULT_PENDING_VOID_DAYS,
            refund_attempts: DEFAULT_REFUND_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    rules: Arc<RuleEngine>,
    rail: Arc<dyn ExternalRail>,
    publisher: Option<EventPublisher>,
    config: EngineConfig,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// The rule engine shared by every request.
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Hand a committed transaction to the publisher, if one is configured.
    fn announce(&self, owner_id: &str, tx: &Transaction) {
        if let Some(publisher) = &self.publisher {
            let _delivery = publisher.spawn(TransactionEvent::created(owner_id, tx.clone()));
        }
    }

    fn resolve_options(now: DateTime<Utc>, allow_frozen_canceled: bool) -> ResolveOptions {
        ResolveOptions {
            now,
            allow_frozen_canceled,
            require_uses: true,
        }
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    config: EngineConfig,
    rules: Option<Arc<RuleEngine>>,
    rail: Option<Arc<dyn ExternalRail>>,
    publisher: Option<EventPublisher>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> EngineBuilder {
        self.config = config;
        self
    }

    /// Share an existing rule engine instead of building one from the config.
    pub fn rules(mut self, rules: Arc<RuleEngine>) -> EngineBuilder {
        self.rules = Some(rules);
        self
    }

    /// Card-network rail. Without one every external step fails.
    pub fn rail(mut self, rail: Arc<dyn ExternalRail>) -> EngineBuilder {
        self.rail = Some(rail);
        self
    }

    pub fn publisher(mut self, publisher: EventPublisher) -> EngineBuilder {
        self.publisher = Some(publisher);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let rules = self
            .rules
            .unwrap_or_else(|| Arc::new(RuleEngine::new(self.config.rule_cache_size)));
        Ok(Engine {
            database: self.database,
            rules,
            rail: self.rail.unwrap_or_else(|| Arc::new(UnconfiguredRail)),
            publisher: self.publisher,
            config: self.config,
        })
    }
}
