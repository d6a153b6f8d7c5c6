//! Redemption and value rules.
//!
//! A [`Rule`] is a small expression (`currentLineItem.lineTotal.subtotal * 0.5`,
//! `currentLineItem.productId == "p1"`, ...) evaluated against a closed
//! [`RuleContext`]. Expressions are parsed into an AST by this module; there is
//! no host `eval`.
//!
//! Compiled rules are cached by expression text in a bounded LRU owned by a
//! [`RuleEngine`] instance. The engine is constructed explicitly and shared
//! (`Arc`) by the components that evaluate rules.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::line_items::{LineItem, Totals};

mod cache;
mod eval;
mod lexer;
mod parser;

use cache::LruCache;

pub const DEFAULT_RULE_CACHE_SIZE: usize = 100;

/// A rule expression plus a human readable explanation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub rule: String,
    #[serde(default)]
    pub explanation: String,
}

impl Rule {
    pub fn new(rule: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            explanation: explanation.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("type error: {0}")]
    Type(String),
    #[error("expected a {expected} result, got {found}")]
    ReturnType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("result is not a finite number")]
    NotFinite,
    #[error("rule {expression:?} failed: {source}")]
    Rule {
        expression: String,
        source: Box<RuleError>,
    },
}

impl RuleError {
    fn in_rule(self, expression: &str) -> Self {
        match self {
            already @ RuleError::Rule { .. } => already,
            other => RuleError::Rule {
                expression: expression.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Parsed form of a rule. Never persisted.
#[derive(Debug)]
pub struct CompiledRule {
    expression: String,
    ast: parser::Expr,
}

impl CompiledRule {
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

/// The Value being applied, as seen by its own rules.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleValueContext<'a> {
    pub id: &'a str,
    pub balance: Option<i64>,
    pub uses_remaining: Option<i64>,
    pub discount: bool,
    pub pretax: bool,
    pub contact_id: Option<&'a str>,
    pub metadata: Option<&'a Json>,
}

/// Everything an expression can read.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleContext<'a> {
    pub current_line_item: Option<&'a LineItem>,
    pub line_items: &'a [LineItem],
    pub totals: Totals,
    /// Sum of the line-item subtotals.
    pub total: i64,
    pub value: Option<RuleValueContext<'a>>,
    pub metadata: Option<&'a Json>,
}

impl RuleContext<'_> {
    pub fn to_json(&self) -> Result<Json, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Compiles and evaluates rules, caching compiled forms.
#[derive(Debug)]
pub struct RuleEngine {
    cache: Mutex<LruCache<String, Arc<CompiledRule>>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_RULE_CACHE_SIZE)
    }
}

impl RuleEngine {
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Parses `expression`, returning the cached form when present.
    pub fn compile(&self, expression: &str) -> Result<Arc<CompiledRule>, RuleError> {
        let key = expression.to_string();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(compiled) = cache.get(&key) {
                return Ok(compiled);
            }
        }

        let ast = parser::parse(expression).map_err(|e| e.in_rule(expression))?;
        let compiled = Arc::new(CompiledRule {
            expression: key.clone(),
            ast,
        });
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn evaluate_boolean(&self, rule: &CompiledRule, context: &Json) -> Result<bool, RuleError> {
        match eval::evaluate(&rule.ast, context).map_err(|e| e.in_rule(&rule.expression))? {
            eval::Val::Bool(b) => Ok(b),
            other => Err(RuleError::ReturnType {
                expected: "boolean",
                found: other.type_name(),
            }
            .in_rule(&rule.expression)),
        }
    }

    pub fn evaluate_number(&self, rule: &CompiledRule, context: &Json) -> Result<f64, RuleError> {
        match eval::evaluate(&rule.ast, context).map_err(|e| e.in_rule(&rule.expression))? {
            eval::Val::Num(n) if n.is_finite() => Ok(n),
            eval::Val::Num(_) => Err(RuleError::NotFinite.in_rule(&rule.expression)),
            other => Err(RuleError::ReturnType {
                expected: "number",
                found: other.type_name(),
            }
            .in_rule(&rule.expression)),
        }
    }

    /// Compiles (or fetches) and evaluates a boolean rule in one step.
    pub fn check(&self, expression: &str, context: &Json) -> Result<bool, RuleError> {
        let compiled = self.compile(expression)?;
        self.evaluate_boolean(&compiled, context)
    }

    /// Compiles (or fetches) and evaluates a numeric rule in one step.
    pub fn amount(&self, expression: &str, context: &Json) -> Result<f64, RuleError> {
        let compiled = self.compile(expression)?;
        self.evaluate_number(&compiled, context)
    }

    pub fn cached_rules(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
