//! The module contains the errors the engine can return.
//!
//! Every failure is classified so the REST layer can map it without
//! inspecting messages:
//!
//! - [`Validation`] malformed requests, detected before any resolution work.
//! - [`ValueNotFound`] / [`TransactionNotFound`] missing rows.
//! - [`Conflict`] planning, idempotency and chain-state conflicts, tagged with a
//!   [`ConflictCode`].
//! - [`ExternalRail`] errors surfaced by the card-network rail.
//! - [`Rule`], [`Integrity`], [`Database`] and [`Serialization`] are fatal.
//!
//!  [`Validation`]: EngineError::Validation
//!  [`ValueNotFound`]: EngineError::ValueNotFound
//!  [`TransactionNotFound`]: EngineError::TransactionNotFound
//!  [`Conflict`]: EngineError::Conflict
//!  [`ExternalRail`]: EngineError::ExternalRail
//!  [`Rule`]: EngineError::Rule
//!  [`Integrity`]: EngineError::Integrity
//!  [`Database`]: EngineError::Database
//!  [`Serialization`]: EngineError::Serialization
use sea_orm::DbErr;
use thiserror::Error;

use crate::rules::RuleError;

/// Machine-readable codes carried by [`EngineError::Conflict`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictCode {
    InsufficientValue,
    InsufficientBalance,
    InsufficientUsesRemaining,
    WrongCurrency,
    InvalidParty,
    ValueFrozen,
    ValueCanceled,
    ValueInactive,
    ValueNotStarted,
    ValueEnded,
    ValueConcurrentlyModified,
    ValueExists,
    TransactionExists,
    TransactionNotPending,
    TransactionPending,
    TransactionCaptured,
    TransactionVoided,
    TransactionReversed,
    TransactionNotReversible,
    TagPersistenceFailed,
}

impl ConflictCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientValue => "InsufficientValue",
            Self::InsufficientBalance => "InsufficientBalance",
            Self::InsufficientUsesRemaining => "InsufficientUsesRemaining",
            Self::WrongCurrency => "WrongCurrency",
            Self::InvalidParty => "InvalidParty",
            Self::ValueFrozen => "ValueFrozen",
            Self::ValueCanceled => "ValueCanceled",
            Self::ValueInactive => "ValueInactive",
            Self::ValueNotStarted => "ValueNotStarted",
            Self::ValueEnded => "ValueEnded",
            Self::ValueConcurrentlyModified => "ValueConcurrentlyModified",
            Self::ValueExists => "ValueExists",
            Self::TransactionExists => "TransactionExists",
            Self::TransactionNotPending => "TransactionNotPending",
            Self::TransactionPending => "TransactionPending",
            Self::TransactionCaptured => "TransactionCaptured",
            Self::TransactionVoided => "TransactionVoided",
            Self::TransactionReversed => "TransactionReversed",
            Self::TransactionNotReversible => "TransactionNotReversible",
            Self::TagPersistenceFailed => "TagPersistenceFailed",
        }
    }
}

impl core::fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Value \"{0}\" not found")]
    ValueNotFound(String),
    #[error("Transaction \"{0}\" not found")]
    TransactionNotFound(String),
    #[error("{1}")]
    Conflict(ConflictCode, String),
    #[error("External rail error ({code}): {message}")]
    ExternalRail { code: String, message: String },
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("Data integrity violation: {0}")]
    Integrity(String),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        Self::Conflict(code, message.into())
    }

    /// HTTP-shaped status for the REST layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 422,
            Self::ValueNotFound(_) | Self::TransactionNotFound(_) => 404,
            Self::Conflict(..) | Self::ExternalRail { .. } => 409,
            Self::Rule(_) | Self::Integrity(_) | Self::Database(_) | Self::Serialization(_) => 500,
        }
    }

    /// Machine-readable code, when the error has one.
    pub fn message_code(&self) -> Option<&str> {
        match self {
            Self::Conflict(code, _) => Some(code.as_str()),
            Self::ExternalRail { code, .. } => Some(code.as_str()),
            Self::ValueNotFound(_) => Some("ValueNotFound"),
            Self::TransactionNotFound(_) => Some("TransactionNotFound"),
            _ => None,
        }
    }

    /// Returns the conflict code if this is a [`EngineError::Conflict`].
    pub fn conflict_code(&self) -> Option<ConflictCode> {
        match self {
            Self::Conflict(code, _) => Some(*code),
            _ => None,
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::ValueNotFound(a), Self::ValueNotFound(b)) => a == b,
            (Self::TransactionNotFound(a), Self::TransactionNotFound(b)) => a == b,
            (Self::Conflict(a, _), Self::Conflict(b, _)) => a == b,
            (
                Self::ExternalRail { code: a, .. },
                Self::ExternalRail { code: b, .. },
            ) => a == b,
            (Self::Rule(a), Self::Rule(b)) => a == b,
            (Self::Integrity(a), Self::Integrity(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            (Self::Serialization(a), Self::Serialization(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
