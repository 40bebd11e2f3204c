//! Value objects shared across the engine

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point monetary amount. All arithmetic stays in `rust_decimal`;
/// rounding to 2 decimal places (half-up) happens at computation boundaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn from_major(units: i64) -> Self { Self(Decimal::new(units, 0)) }
    pub fn from_minor(cents: i64) -> Self { Self(Decimal::new(cents, 2)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }

    pub fn add(self, other: Money) -> Money { Money(self.0 + other.0) }

    /// Subtraction floored at zero. Monetary fields in this engine are
    /// never negative (final amounts, refunds, remaining-to-threshold).
    pub fn sub_floor(self, other: Money) -> Money {
        let result = self.0 - other.0;
        if result.is_sign_negative() { Money::ZERO } else { Money(result) }
    }

    pub fn mul_qty(self, quantity: u32) -> Money { Money(self.0 * Decimal::from(quantity)) }

    /// Round to 2 decimal places, half-up.
    pub fn round2(self) -> Money {
        Money(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> crate::error::Result<Self> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() {
            return Err(crate::error::CommerceError::ValidationFailed("SKU empty".into()));
        }
        if value.len() > 50 {
            return Err(crate::error::CommerceError::ValidationFailed("SKU too long".into()));
        }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
