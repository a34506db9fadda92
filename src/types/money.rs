//! Fixed-point currency amounts.
//!
//! Balances, bets and payouts are stored as whole minor units (cents) so the
//! ledger never accumulates floating point drift. Conversion to `f64` only
//! happens at the edges (JSON, logging).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minor units per major currency unit.
pub const MINOR_UNITS: i64 = 100;

/// A currency amount in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create from a raw minor-unit count.
    pub const fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    /// Create from a whole number of major units.
    pub const fn from_major(major: i64) -> Self {
        Amount(major * MINOR_UNITS)
    }

    /// Convert a decimal value, rounding half away from zero to the nearest minor unit.
    pub fn from_f64(value: f64) -> Self {
        Amount((value * MINOR_UNITS as f64).round() as i64)
    }

    /// Like [`Amount::from_f64`], but `None` for non-finite values or values
    /// outside the `i64` minor-unit range.
    pub fn try_from_f64(value: f64) -> Option<Self> {
        let minor = (value * MINOR_UNITS as f64).round();
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range
        if minor.is_finite() && minor >= i64::MIN as f64 && minor < i64::MAX as f64 {
            Some(Amount(minor as i64))
        } else {
            None
        }
    }

    /// Raw minor-unit count.
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Value in major units (for display and JSON).
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / MINOR_UNITS as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Multiply by a payout multiplier, rounding half away from zero.
    pub fn scale(self, multiplier: f64) -> Amount {
        Amount((self.0 as f64 * multiplier).round() as i64)
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_UNITS as u64;
        write!(f, "{}{}.{:02}", sign, abs / unit, abs % unit)
    }
}

/// Error returned when an amount string is not a plain decimal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount: {0}")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Parse `"12"`, `"12.5"` or `"12.50"`. More than two fractional digits is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAmountError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let whole: i64 = whole.parse().map_err(|_| err())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| err())? * 10,
            _ => frac.parse().map_err(|_| err())?,
        };
        let minor = whole
            .checked_mul(MINOR_UNITS)
            .and_then(|m| m.checked_add(frac))
            .ok_or_else(err)?;
        Ok(Amount(if negative { -minor } else { minor }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::try_from_f64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("amount {} out of range", value)))
    }
}
