use crate::utils::error::{PlatformError, Result};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul};
use std::str::FromStr;

/// Time units understood by the engine. Picoseconds are the base unit and
/// the only one ever written into a platform document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Ps,
    Ns,
    Us,
    Ms,
}

impl TimeUnit {
    pub const fn multiplier(self) -> i64 {
        match self {
            TimeUnit::Ps => 1,
            TimeUnit::Ns => 1_000,
            TimeUnit::Us => 1_000_000,
            TimeUnit::Ms => 1_000_000_000,
        }
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeQuantity {
    value: i64,
    unit: TimeUnit,
}

impl TimeQuantity {
    pub const fn new(value: i64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub const fn ps(value: i64) -> Self {
        Self::new(value, TimeUnit::Ps)
    }

    pub const fn ns(value: i64) -> Self {
        Self::new(value, TimeUnit::Ns)
    }

    pub const fn us(value: i64) -> Self {
        Self::new(value, TimeUnit::Us)
    }

    pub const fn ms(value: i64) -> Self {
        Self::new(value, TimeUnit::Ms)
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Base-unit integer. Saturates instead of wrapping.
    pub fn as_picos(&self) -> i64 {
        self.value.saturating_mul(self.unit.multiplier())
    }

    pub fn checked_picos(&self) -> Option<i64> {
        self.value.checked_mul(self.unit.multiplier())
    }

    pub fn checked_add(self, other: TimeQuantity) -> Option<TimeQuantity> {
        let sum = self.checked_picos()?.checked_add(other.checked_picos()?)?;
        Some(TimeQuantity::ps(sum))
    }

    pub fn checked_mul(self, factor: i64) -> Option<TimeQuantity> {
        Some(TimeQuantity::new(self.value.checked_mul(factor)?, self.unit))
    }
}

impl Mul<i64> for TimeQuantity {
    type Output = TimeQuantity;

    fn mul(self, factor: i64) -> TimeQuantity {
        TimeQuantity::new(self.value.saturating_mul(factor), self.unit)
    }
}

impl Mul<TimeQuantity> for i64 {
    type Output = TimeQuantity;

    fn mul(self, quantity: TimeQuantity) -> TimeQuantity {
        quantity * self
    }
}

impl Add for TimeQuantity {
    type Output = TimeQuantity;

    fn add(self, other: TimeQuantity) -> TimeQuantity {
        TimeQuantity::ps(self.as_picos().saturating_add(other.as_picos()))
    }
}

impl PartialEq for TimeQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.as_picos() == other.as_picos()
    }
}

impl Eq for TimeQuantity {}

impl PartialOrd for TimeQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_picos().cmp(&other.as_picos())
    }
}

impl fmt::Display for TimeQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for TimeQuantity {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, suffix) = trimmed.split_at(split);

        let invalid = |reason: &str| PlatformError::InvalidTime {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if digits.is_empty() {
            return Err(invalid("missing integer value"));
        }
        let value: i64 = digits.parse().map_err(|_| invalid("value out of range"))?;
        let unit = match suffix.trim() {
            "ps" => TimeUnit::Ps,
            "ns" => TimeUnit::Ns,
            "us" => TimeUnit::Us,
            "ms" => TimeUnit::Ms,
            "" => return Err(invalid("missing unit (ps, ns, us or ms)")),
            _ => return Err(invalid("unknown unit")),
        };
        Ok(TimeQuantity::new(value, unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_scale_to_picoseconds() {
        assert_eq!(TimeQuantity::ps(7).as_picos(), 7);
        assert_eq!(TimeQuantity::ns(2).as_picos(), 2_000);
        assert_eq!(TimeQuantity::us(3).as_picos(), 3_000_000);
        assert_eq!(TimeQuantity::ms(1).as_picos(), 1_000_000_000);
    }

    #[test]
    fn test_multiplication_keeps_unit() {
        let q = 5 * TimeQuantity::ns(1);
        assert_eq!(q.unit(), TimeUnit::Ns);
        assert_eq!(q.value(), 5);
        assert_eq!((TimeQuantity::us(2) * 3).as_picos(), 6_000_000);
    }

    #[test]
    fn test_addition_normalizes_to_base_unit() {
        let sum = TimeQuantity::ns(1) + TimeQuantity::ps(250);
        assert_eq!(sum.unit(), TimeUnit::Ps);
        assert_eq!(sum.as_picos(), 1_250);
        assert_eq!(sum, TimeQuantity::ps(1_250));
    }

    #[test]
    fn test_equality_across_units() {
        assert_eq!(TimeQuantity::ns(1), TimeQuantity::ps(1_000));
        assert!(TimeQuantity::us(1) > TimeQuantity::ns(999));
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        assert!(TimeQuantity::ms(i64::MAX).checked_picos().is_none());
        assert!(TimeQuantity::ps(i64::MAX).checked_add(TimeQuantity::ps(1)).is_none());
        assert_eq!(TimeQuantity::ms(i64::MAX).as_picos(), i64::MAX);
    }

    #[test]
    fn test_parse() {
        assert_eq!("5ns".parse::<TimeQuantity>().unwrap(), TimeQuantity::ns(5));
        assert_eq!(" 10 us ".parse::<TimeQuantity>().unwrap().as_picos(), 10_000_000);
        assert!("5".parse::<TimeQuantity>().is_err());
        assert!("ns".parse::<TimeQuantity>().is_err());
        assert!("5fortnights".parse::<TimeQuantity>().is_err());
    }
}
