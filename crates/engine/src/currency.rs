use serde::{Deserialize, Serialize};

use crate::EngineError;

/// ISO-like currency code of a Value or a Transaction.
///
/// The engine never converts between currencies: every resolved party of a
/// transaction must carry exactly the transaction currency. Codes are stored
/// upper-case and compared byte-for-byte.
///
/// ## Minor units
///
/// Monetary values are `i64` numbers of **minor units** (e.g. cents for
/// `USD`). The currency itself does not know how many digits it uses; that is
/// a formatting concern of the callers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Canonical currency code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<&str> for Currency {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let code = value.trim().to_ascii_uppercase();
        let valid_len = (1..=16).contains(&code.len());
        if !valid_len || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::Validation(format!(
                "invalid currency code: {value:?}"
            )));
        }
        Ok(Currency(code))
    }
}

impl TryFrom<String> for Currency {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::try_from(value.as_str())
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalized_to_upper_case() {
        let currency = Currency::try_from(" usd ").unwrap();
        assert_eq!(currency.code(), "USD");
        assert_eq!(currency, Currency::try_from("USD").unwrap());
    }

    #[test]
    fn rejects_empty_and_symbols() {
        assert!(Currency::try_from("").is_err());
        assert!(Currency::try_from("US$").is_err());
    }

    #[test]
    fn deserializes_through_validation() {
        let currency: Currency = serde_json::from_str("\"cad\"").unwrap();
        assert_eq!(currency.code(), "CAD");
        assert!(serde_json::from_str::<Currency>("\"\"").is_err());
    }
}
