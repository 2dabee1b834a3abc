//! # Money Module
//!
//! Provides the `Money` and `TaxRate` types used by every document.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  An invoice of 1150.00 paid as 500.00 + 650.00 must leave EXACTLY      │
//! │  0.00 due, or the invoice never reaches PAID.                           │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    115000 - 50000 - 65000 = 0                                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use keystone_core::money::{Money, TaxRate};
//!
//! let unit_price: Money = "100.00".parse().unwrap();
//! let subtotal = unit_price * 10_i64;
//! let vat = subtotal.calculate_tax(TaxRate::STANDARD_VAT);
//!
//! assert_eq!(subtotal.cents(), 100_000);
//! assert_eq!(vat.cents(), 15_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 1500 bps = 15% (the VAT rate applied to every document subtotal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Standard VAT rate (15%).
    pub const STANDARD_VAT: TaxRate = TaxRate(1500);

    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::STANDARD_VAT
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: differences such as `total - amount_paid` stay representable
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **No float constructor**: values come from cents or decimal strings only
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  LineItem.unit_price × quantity ──► line_total ──► Totals.subtotal      │
/// │                                                                         │
/// │  Totals.subtotal ──► VAT (15%) ──► Totals.total ──► Invoice.amount_due  │
/// │                                                                         │
/// │  Payment.amount ──► Invoice.amount_paid                                 │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::money::Money;
    ///
    /// let price = Money::from_cents(1099); // Represents 10.99
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::money::Money;
    ///
    /// assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
    /// assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    /// ```
    ///
    /// ## Note
    /// For negative amounts, only the major unit should be negative.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Parses a decimal string such as `"1150.00"`, `"12.5"` or `"-3"`.
    ///
    /// ## Rules
    /// - Optional leading `-`
    /// - At most two fractional digits (no silent rounding)
    /// - Digits only otherwise; no thousands separators
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::money::Money;
    ///
    /// assert_eq!(Money::parse("1150.00").unwrap().cents(), 115_000);
    /// assert_eq!(Money::parse("12.5").unwrap().cents(), 1250);
    /// assert!(Money::parse("1.005").is_err());
    /// assert!(Money::parse("abc").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Money, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (major_str, minor_str) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major_str.is_empty() && minor_str.is_empty() {
            return Err(invalid("must be a decimal number"));
        }
        if minor_str.len() > 2 {
            return Err(invalid("must have at most two decimal places"));
        }
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(major_str) || !all_digits(minor_str) {
            return Err(invalid("must be a decimal number"));
        }

        let major: i64 = if major_str.is_empty() {
            0
        } else {
            major_str.parse().map_err(|_| invalid("is too large"))?
        };
        let minor: i64 = match minor_str.len() {
            0 => 0,
            1 => minor_str.parse::<i64>().map_err(|_| invalid("must be a decimal number"))? * 10,
            _ => minor_str.parse().map_err(|_| invalid("must be a decimal number"))?,
        };

        let cents = major
            .checked_mul(100)
            .and_then(|c| c.checked_add(minor))
            .ok_or_else(|| invalid("is too large"))?;

        Ok(Money(if negative { -cents } else { cents }))
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Calculates tax, rounding half up at the cent.
    ///
    /// ## Implementation
    /// Integer math: `(amount * rate + 5000) / 10000`.
    /// The +5000 provides rounding (5000/10000 = 0.5).
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::money::{Money, TaxRate};
    ///
    /// let subtotal = Money::from_cents(333); // 3.33
    /// let vat = subtotal.calculate_tax(TaxRate::STANDARD_VAT);
    /// // 3.33 × 15% = 0.4995 → 0.50
    /// assert_eq!(vat.cents(), 50);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        // i128 prevents overflow on large document totals
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use keystone_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`1150.00`, `-5.50`).
///
/// ## Note
/// Currency symbols and localisation belong to the presentation layer.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor_part(), 99);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(115_000).to_string(), "1150.00");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_parse() {
        assert_eq!(Money::parse("650.00").unwrap().cents(), 65_000);
        assert_eq!(Money::parse(" 1 ").unwrap().cents(), 100);
        assert_eq!(Money::parse(".5").unwrap().cents(), 50);
        assert_eq!(Money::parse("-0.01").unwrap().cents(), -1);

        assert!(Money::parse("").is_err());
        assert!(Money::parse(".").is_err());
        assert!(Money::parse("1,000.00").is_err());
        assert!(Money::parse("10.999").is_err());
        assert!(Money::parse("99999999999999999999").is_err());
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3_i64).cents(), 3000);

        let total: Money = [a, b, b].iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_vat_on_round_amounts() {
        let subtotal = Money::from_cents(100_000); // 1000.00
        assert_eq!(subtotal.calculate_tax(TaxRate::STANDARD_VAT).cents(), 15_000);
    }

    #[test]
    fn test_vat_rounds_half_up() {
        // 0.10 × 15% = 0.015 → 0.02
        assert_eq!(Money::from_cents(10).calculate_tax(TaxRate::STANDARD_VAT).cents(), 2);
        // 0.03 × 15% = 0.0045 → 0.00
        assert_eq!(Money::from_cents(3).calculate_tax(TaxRate::STANDARD_VAT).cents(), 0);
    }

    #[test]
    fn test_zero_and_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }

    #[test]
    fn test_tax_rate_default_is_vat() {
        assert_eq!(TaxRate::default().bps(), 1500);
        assert!((TaxRate::STANDARD_VAT.percentage() - 15.0).abs() < f64::EPSILON);
    }
}
