//! Checkout line items and transaction totals.
//!
//! Amounts are signed integer minor units. Rates (tax, marketplace
//! commission) are fractions in `[0, 1]`.

use std::ops::Neg;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemType {
    #[default]
    Product,
    Shipping,
    Fee,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default, rename = "type")]
    pub item_type: LineItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub unit_price: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_total: Option<LineTotal>,
}

fn default_quantity() -> i64 {
    1
}

impl LineItem {
    pub fn new(unit_price: i64) -> Self {
        Self {
            item_type: LineItemType::Product,
            product_id: None,
            variant_id: None,
            unit_price,
            quantity: 1,
            tax_rate: 0.0,
            marketplace_rate: None,
            tags: Vec::new(),
            metadata: None,
            line_total: None,
        }
    }

    #[must_use]
    pub fn product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    #[must_use]
    pub fn quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    #[must_use]
    pub fn tax_rate(mut self, tax_rate: f64) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    #[must_use]
    pub fn marketplace_rate(mut self, rate: f64) -> Self {
        self.marketplace_rate = Some(rate);
        self
    }

    pub(crate) fn validate(&self, index: usize) -> ResultEngine<()> {
        if self.unit_price < 0 {
            return Err(EngineError::Validation(format!(
                "lineItems[{index}].unitPrice must be >= 0"
            )));
        }
        if self.quantity < 1 {
            return Err(EngineError::Validation(format!(
                "lineItems[{index}].quantity must be >= 1"
            )));
        }
        if !(0.0..=1.0).contains(&self.tax_rate) {
            return Err(EngineError::Validation(format!(
                "lineItems[{index}].taxRate must be between 0 and 1"
            )));
        }
        if let Some(rate) = self.marketplace_rate
            && !(0.0..=1.0).contains(&rate)
        {
            return Err(EngineError::Validation(format!(
                "lineItems[{index}].marketplaceRate must be between 0 and 1"
            )));
        }
        if self.unit_price.checked_mul(self.quantity).is_none() {
            return Err(EngineError::Validation(format!(
                "lineItems[{index}] subtotal overflows"
            )));
        }
        Ok(())
    }

    /// Line total, zeroed when the allocator has not run yet.
    pub(crate) fn total(&self) -> LineTotal {
        self.line_total.clone().unwrap_or_default()
    }
}

/// Per line item amounts computed by the allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineTotal {
    pub subtotal: i64,
    pub taxable: i64,
    pub tax: i64,
    pub discount: i64,
    #[serde(default)]
    pub seller_discount: i64,
    pub payable: i64,
    pub remainder: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceTotals {
    pub seller_gross: i64,
    pub seller_discount: i64,
    pub seller_net: i64,
}

impl Neg for MarketplaceTotals {
    type Output = MarketplaceTotals;

    fn neg(self) -> Self::Output {
        MarketplaceTotals {
            seller_gross: -self.seller_gross,
            seller_discount: -self.seller_discount,
            seller_net: -self.seller_net,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: i64,
    pub tax: i64,
    pub discount: i64,
    pub payable: i64,
    pub remainder: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<MarketplaceTotals>,
}

impl Neg for Totals {
    type Output = Totals;

    /// Field-wise negation, nested marketplace totals included.
    fn neg(self) -> Self::Output {
        Totals {
            subtotal: -self.subtotal,
            tax: -self.tax,
            discount: -self.discount,
            payable: -self.payable,
            remainder: -self.remainder,
            marketplace: self.marketplace.map(Neg::neg),
        }
    }
}

impl Totals {
    /// Totals of a single-amount transaction (debit, transfer).
    pub(crate) fn for_amount(payable: i64, remainder: i64) -> Self {
        Totals {
            payable,
            remainder,
            ..Default::default()
        }
    }
}

/// How fractional tax amounts are rounded to minor units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxRoundingMode {
    /// Truncation toward zero.
    #[default]
    Floor,
    HalfUp,
    HalfEven,
}

impl TaxRoundingMode {
    pub fn round(self, amount: f64) -> i64 {
        // Rates are decimal fractions, so `666 * 0.08` lands on 53.28000000000001;
        // snap to 1e-9 before rounding.
        let snapped = (amount * 1e9).round() / 1e9;
        match self {
            TaxRoundingMode::Floor => snapped.trunc() as i64,
            TaxRoundingMode::HalfUp => snapped.round() as i64,
            TaxRoundingMode::HalfEven => {
                let floor = snapped.floor();
                let diff = snapped - floor;
                let rounded = if diff > 0.5 {
                    floor + 1.0
                } else if diff < 0.5 {
                    floor
                } else if (floor as i64) % 2 == 0 {
                    floor
                } else {
                    floor + 1.0
                };
                rounded as i64
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxOptions {
    #[serde(default)]
    pub rounding_mode: TaxRoundingMode,
}
