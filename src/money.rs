//! Integer minor-unit money.
//!
//! Every amount in the billing core is an `i64` count of the currency's
//! minor unit (cents for USD/EUR). Nothing here touches floating point.
//!
//! Percentages are applied with **round half up** (half away from zero):
//! 33% of 1050 cents is 346.5, which becomes 347.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

use crate::errors::ServiceError;

/// Basis points in 100%.
pub const BASIS_POINTS_PER_UNIT: i64 = 10_000;

/// Amount in minor currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Unit price times quantity.
    pub fn checked_mul_quantity(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// Clamps negative amounts to zero.
    pub fn non_negative(self) -> Money {
        Money(self.0.max(0))
    }

    /// `self * percent / 100`, rounded half up.
    pub fn percent(self, percent: i64) -> Option<Money> {
        self.basis_points(percent.checked_mul(100)?)
    }

    /// `self * bp / 10_000`, rounded half up.
    pub fn basis_points(self, basis_points: i64) -> Option<Money> {
        let product = (self.0 as i128).checked_mul(basis_points as i128)?;
        let rounded = div_round_half_up(product, BASIS_POINTS_PER_UNIT as i128);
        i64::try_from(rounded).ok().map(Money)
    }

    /// Like [`Money::checked_add`] but reports overflow as a validation failure.
    pub fn try_add(self, other: Money) -> Result<Money, ServiceError> {
        self.checked_add(other)
            .ok_or_else(|| ServiceError::ValidationError("amount overflow".to_string()))
    }
}

fn div_round_half_up(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        if (numerator < 0) != (denominator < 0) {
            quotient - 1
        } else {
            quotient + 1
        }
    } else {
        quotient
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Money(cents)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(1050, 33, 347)] // 346.5 rounds up
    #[case(1000, 30, 300)]
    #[case(999, 50, 500)] // 499.5 rounds up
    #[case(1, 50, 1)] // 0.5 rounds up
    #[case(1, 49, 0)]
    #[case(10_000, 0, 0)]
    #[case(10_000, 100, 10_000)]
    fn percent_rounds_half_up(#[case] cents: i64, #[case] pct: i64, #[case] expected: i64) {
        assert_eq!(
            Money::from_cents(cents).percent(pct),
            Some(Money::from_cents(expected))
        );
    }

    #[rstest]
    #[case(1999, 1250, 250)] // 249.875
    #[case(1000, 125, 13)] // 12.5 rounds up
    #[case(1000, 124, 12)] // 12.4
    fn basis_points_round_half_up(#[case] cents: i64, #[case] bp: i64, #[case] expected: i64) {
        assert_eq!(
            Money::from_cents(cents).basis_points(bp),
            Some(Money::from_cents(expected))
        );
    }

    #[test]
    fn negative_amounts_round_away_from_zero() {
        assert_eq!(
            Money::from_cents(-1).percent(50),
            Some(Money::from_cents(-1))
        );
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(Money::from_cents(i64::MAX).checked_mul_quantity(2), None);
        assert!(Money::from_cents(i64::MAX)
            .try_add(Money::from_cents(1))
            .is_err());
    }

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money::from_cents(10_000).to_string(), "100.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    proptest! {
        #[test]
        fn percent_never_exceeds_whole(cents in 0i64..1_000_000_000, pct in 0i64..=100) {
            let part = Money::from_cents(cents).percent(pct).unwrap();
            prop_assert!(part.cents() >= 0);
            prop_assert!(part.cents() <= cents);
        }

        #[test]
        fn percent_and_complement_cover_total_within_one_cent(cents in 0i64..1_000_000_000, pct in 0i64..=100) {
            let total = Money::from_cents(cents);
            let part = total.percent(pct).unwrap();
            let rest = total.percent(100 - pct).unwrap();
            prop_assert!(((part + rest).cents() - cents).abs() <= 1);
        }
    }
}
