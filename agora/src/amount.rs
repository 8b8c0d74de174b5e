//! Money types for payment-gated resources.
//!
//! Amounts travel in two denominations. Humans (and pricing policies) speak
//! in whole currency units as exact decimals (`"0.10"`). The wire and every
//! comparison inside the protocol speak in [`MicroAmount`]: integer
//! millionths of a whole unit. The conversion between the two is pure
//! integer arithmetic on the decimal mantissa; no floating point is involved
//! at any step, so `0.10` is always exactly `100000` micro-units.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Number of micro-units in one whole currency unit.
pub const MICROS_PER_UNIT: u64 = 1_000_000;

/// Decimal digits carried by a micro-unit amount.
const MICRO_DECIMALS: u32 = 6;

/// An amount in integer micro-units (millionths of a whole currency unit).
///
/// # Serialization
///
/// Serialized as a stringified integer (`"100000"`) to avoid loss of
/// precision in JSON, since `JavaScript`'s `Number` type cannot safely
/// represent all 64-bit integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MicroAmount(u64);

impl MicroAmount {
    /// Wraps a raw micro-unit count.
    #[must_use]
    pub const fn from_raw(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the raw micro-unit count.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns `true` for a zero amount.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the given percentage of this amount, rounded down.
    ///
    /// The intermediate product is computed in 128 bits, so any `u64`
    /// amount with any percentage up to `u64::MAX` is safe; a result that
    /// would not fit saturates.
    #[must_use]
    pub fn percent(self, percent: u64) -> Self {
        let scaled = u128::from(self.0) * u128::from(percent) / 100;
        Self(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

impl From<u64> for MicroAmount {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}

impl From<MicroAmount> for u64 {
    fn from(amount: MicroAmount) -> Self {
        amount.0
    }
}

impl FromStr for MicroAmount {
    type Err = <u64 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl Display for MicroAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MicroAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for MicroAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map(Self).map_err(serde::de::Error::custom)
    }
}

/// A validated human-denominated price.
///
/// Invariants, enforced at construction and on deserialization:
///
/// - never negative (zero is a valid degenerate price: the resource is free)
/// - representable as a whole number of micro-units, so conversion to
///   [`MicroAmount`] can never lose precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Price {
    amount: Decimal,
    micros: MicroAmount,
}

impl Price {
    /// Validates a decimal amount as a price.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Negative`] for negative amounts,
    /// [`PriceError::SubMicro`] for amounts finer than one micro-unit, and
    /// [`PriceError::Overflow`] for amounts past `u64::MAX` micro-units.
    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative);
        }
        let micros = micros_from_decimal(amount)?;
        Ok(Self { amount, micros })
    }

    /// Builds a price from an exact micro-unit count.
    #[must_use]
    pub fn from_micros(micros: MicroAmount) -> Self {
        let amount = Decimal::from_i128_with_scale(i128::from(micros.as_u64()), MICRO_DECIMALS)
            .normalize();
        Self { amount, micros }
    }

    /// The price in integer micro-units.
    #[must_use]
    pub const fn micros(&self) -> MicroAmount {
        self.micros
    }

    /// The price as an exact decimal in whole currency units.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns `true` if the resource is free.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.micros.is_zero()
    }
}

/// Converts a non-negative decimal into micro-units with integer-only math.
///
/// Works on the decimal's integer mantissa and scale: `0.10` is mantissa 10
/// at scale 2, so the micro count is `10 * 10^(6-2) = 100000`.
fn micros_from_decimal(amount: Decimal) -> Result<MicroAmount, PriceError> {
    let mantissa = amount.mantissa().unsigned_abs();
    let scale = amount.scale();
    let scaled = if scale <= MICRO_DECIMALS {
        let factor = 10u128.pow(MICRO_DECIMALS - scale);
        mantissa.checked_mul(factor).ok_or(PriceError::Overflow)?
    } else {
        let divisor = 10u128.pow(scale - MICRO_DECIMALS);
        if mantissa % divisor != 0 {
            return Err(PriceError::SubMicro);
        }
        mantissa / divisor
    };
    let micros = u64::try_from(scaled).map_err(|_| PriceError::Overflow)?;
    Ok(MicroAmount(micros))
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount =
            Decimal::from_str(s).map_err(|_| PriceError::Unparsable(s.to_owned()))?;
        Self::new(amount)
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.amount)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.amount.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Self>().map_err(serde::de::Error::custom)
    }
}

/// Reasons a decimal amount is not usable as a price.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    /// The input is not a decimal number at all.
    #[error("price `{0}` is not a valid decimal amount")]
    Unparsable(String),
    /// Negative prices are never valid.
    #[error("price must not be negative")]
    Negative,
    /// Zero where a chargeable price is required.
    #[error("price must be greater than zero")]
    NotPositive,
    /// The amount is finer than one micro-unit and would lose precision.
    #[error("price is finer than one micro-unit")]
    SubMicro,
    /// The amount does not fit in 64-bit micro-units.
    #[error("price does not fit in 64-bit micro-units")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_human_price_to_micros() {
        let price: Price = "0.10".parse().unwrap();
        assert_eq!(price.micros(), MicroAmount::from_raw(100_000));

        let price: Price = "1".parse().unwrap();
        assert_eq!(price.micros().as_u64(), MICROS_PER_UNIT);

        let price: Price = "0.000001".parse().unwrap();
        assert_eq!(price.micros().as_u64(), 1);
    }

    #[test]
    fn trailing_zeros_do_not_change_the_amount() {
        let short: Price = "0.1".parse().unwrap();
        let long: Price = "0.100000".parse().unwrap();
        assert_eq!(short.micros(), long.micros());
    }

    #[test]
    fn rejects_sub_micro_precision() {
        let err = "0.0000001".parse::<Price>().unwrap_err();
        assert_eq!(err, PriceError::SubMicro);
    }

    #[test]
    fn rejects_negative_prices() {
        let err = "-0.10".parse::<Price>().unwrap_err();
        assert_eq!(err, PriceError::Negative);
    }

    #[test]
    fn zero_is_a_valid_free_price() {
        let price: Price = "0".parse().unwrap();
        assert!(price.is_zero());
    }

    #[test]
    fn micro_amount_serializes_as_string() {
        let json = serde_json::to_string(&MicroAmount::from_raw(100_000)).unwrap();
        assert_eq!(json, "\"100000\"");

        let back: MicroAmount = serde_json::from_str("\"100000\"").unwrap();
        assert_eq!(back.as_u64(), 100_000);
    }

    #[test]
    fn price_round_trips_through_serde() {
        let price: Price = "0.10".parse().unwrap();
        let json = serde_json::to_string(&price).unwrap();
        assert_eq!(json, "\"0.10\"");

        let back: Price = serde_json::from_str(&json).unwrap();
        assert_eq!(back, price);
    }

    #[test]
    fn percent_uses_integer_arithmetic() {
        let budget = MicroAmount::from_raw(100_000);
        assert_eq!(budget.percent(90).as_u64(), 90_000);

        let odd = MicroAmount::from_raw(333_333);
        assert_eq!(odd.percent(90).as_u64(), 299_999);
    }

    #[test]
    fn from_micros_renders_normalized() {
        let price = Price::from_micros(MicroAmount::from_raw(90_000));
        assert_eq!(price.to_string(), "0.09");
    }
}
