use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const THB_CURRENCY_CODE: &str = "THB";

const SATANG_PER_BAHT: i64 = 100;

//--------------------------------------       Satang        ---------------------------------------------------------
/// An exact amount of Thai baht, held as an integer number of satang (1/100 baht).
///
/// All ledger arithmetic in the engine happens on this type. Floating point values are only ever accepted at the
/// deserialization boundary, where they are converted via their two-decimal string representation.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Satang(i64);

op!(binary Satang, Add, add);
op!(binary Satang, Sub, sub);
op!(inplace Satang, AddAssign, add_assign);
op!(inplace Satang, SubAssign, sub_assign);
op!(unary Satang, Neg, neg);

impl Mul<i64> for Satang {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Satang {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a Satang> for Satang {
    fn sum<I: Iterator<Item = &'a Satang>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in satang: {0}")]
pub struct SatangConversionError(String);

impl From<i64> for Satang {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Satang {
    pub const ZERO: Satang = Satang(0);

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub const fn from_baht(baht: i64) -> Self {
        Self(baht * SATANG_PER_BAHT)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn abs_diff(&self, other: Satang) -> Satang {
        Self::saturating((i128::from(self.0) - i128::from(other.0)).abs())
    }

    /// `pct` percent of this amount, truncated towards zero. Saturates instead of overflowing.
    pub fn percent(&self, pct: i64) -> Satang {
        Self::saturating(i128::from(self.0) * i128::from(pct) / 100)
    }

    /// Applies a rate given in basis points (1/100 of a percent), rounding half away from zero to the nearest satang.
    /// Saturates instead of overflowing.
    pub fn basis_points(&self, bps: i64) -> Satang {
        let scaled = i128::from(self.0) * i128::from(bps);
        let rounded = if scaled >= 0 { (scaled + 5_000) / 10_000 } else { (scaled - 5_000) / 10_000 };
        Self::saturating(rounded)
    }

    fn saturating(value: i128) -> Satang {
        Self(i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX }))
    }

    /// The amount in baht with exactly two decimal places and no currency symbol, e.g. `1500.50`.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per_baht = SATANG_PER_BAHT.unsigned_abs();
        format!("{sign}{}.{:02}", abs / per_baht, abs % per_baht)
    }
}

impl Display for Satang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-฿{}", (-*self).to_decimal_string())
        } else {
            write!(f, "฿{}", self.to_decimal_string())
        }
    }
}

impl FromStr for Satang {
    type Err = SatangConversionError;

    /// Parses a baht amount as it appears on a transfer slip: an optional sign, an optional `฿` prefix or `THB`
    /// suffix, thousands separators, and up to two significant decimal places.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SatangConversionError(s.to_string());
        let cleaned = s
            .trim()
            .trim_end_matches(THB_CURRENCY_CODE)
            .trim()
            .chars()
            .filter(|c| *c != ',' && !c.is_whitespace())
            .collect::<String>();
        let (negative, unsigned) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };
        let unsigned = unsigned.trim_start_matches('฿');
        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        // Digits beyond the second decimal place must be zero; anything else is sub-satang precision
        if fraction.len() > 2 && fraction[2..].chars().any(|c| c != '0') {
            return Err(err());
        }
        let whole = if whole.is_empty() { 0 } else { whole.parse::<i64>().map_err(|_| err())? };
        let fraction = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| err())? * 10,
            _ => fraction[..2].parse::<i64>().map_err(|_| err())?,
        };
        let value = whole.checked_mul(SATANG_PER_BAHT).and_then(|w| w.checked_add(fraction)).ok_or_else(err)?;
        Ok(Self(if negative { -value } else { value }))
    }
}

/// Serde adapter that writes a [`Satang`] value as a decimal baht string (`"1500.50"`) and reads either a decimal
/// string or a JSON number.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Slip {
///     #[serde(with = "spe_common::decimal")]
///     amount: Satang,
/// }
/// ```
pub mod decimal {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    use super::Satang;

    pub fn serialize<S>(value: &Satang, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&value.to_decimal_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Satang, D::Error>
    where D: Deserializer<'de> {
        deserializer.deserialize_any(DecimalVisitor)
    }

    struct DecimalVisitor;

    impl<'de> de::Visitor<'de> for DecimalVisitor {
        type Value = Satang;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a baht amount as a decimal string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Satang, E> {
            v.parse().map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Satang, E> {
            v.checked_mul(100).map(Satang::from).ok_or_else(|| E::custom(format!("{v} baht is out of range")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Satang, E> {
            let v = i64::try_from(v).map_err(E::custom)?;
            self.visit_i64(v)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Satang, E> {
            if !v.is_finite() {
                return Err(E::custom(format!("{v} is not a valid amount")));
            }
            self.visit_str(&format!("{v:.2}"))
        }
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[test]
    fn rates_on_huge_amounts_saturate() {
        let huge = Satang::from_baht(90_000_000_000_000_000);
        assert_eq!(huge.percent(5), Satang::from(450_000_000_000_000_000));
        assert_eq!(Satang::from(i64::MAX).percent(200), Satang::from(i64::MAX));
        assert_eq!(Satang::from(i64::MAX).basis_points(200), Satang::from(i64::MAX));
        assert_eq!(Satang::from(i64::MIN).abs_diff(Satang::from(1)), Satang::from(i64::MAX));
        assert_eq!(Satang::from_baht(10_000).basis_points(200), Satang::from_baht(200));
    }

    #[test]
    fn parse_slip_amounts() {
        assert_eq!("1500".parse::<Satang>().unwrap(), Satang::from(150_000));
        assert_eq!("1,500.50".parse::<Satang>().unwrap(), Satang::from(150_050));
        assert_eq!("฿ 1,500.5".parse::<Satang>().unwrap(), Satang::from(150_050));
        assert_eq!("2500.00 THB".parse::<Satang>().unwrap(), Satang::from(250_000));
        assert_eq!(".75".parse::<Satang>().unwrap(), Satang::from(75));
        assert_eq!("-12.30".parse::<Satang>().unwrap(), Satang::from(-1230));
        assert_eq!("10.500".parse::<Satang>().unwrap(), Satang::from(1050));
    }

    #[test]
    fn reject_malformed_amounts() {
        assert!("".parse::<Satang>().is_err());
        assert!("12a".parse::<Satang>().is_err());
        assert!("1.005".parse::<Satang>().is_err());
        assert!("1.2.3".parse::<Satang>().is_err());
        assert!("99999999999999999999".parse::<Satang>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Satang::from(150_050).to_string(), "฿1500.50");
        assert_eq!(Satang::from(-5).to_string(), "-฿0.05");
        assert_eq!(Satang::from_baht(3).to_decimal_string(), "3.00");
    }

    #[test]
    fn rates_and_tolerances() {
        let principal = Satang::from_baht(10_000);
        assert_eq!(principal.basis_points(200), Satang::from_baht(200));
        assert_eq!(Satang::from(333).basis_points(5_000), Satang::from(167));
        assert_eq!(Satang::from_baht(1000).percent(5), Satang::from_baht(50));
        assert_eq!(Satang::from(100).abs_diff(Satang::from(250)), Satang::from(150));
    }

    #[derive(Serialize, Deserialize)]
    struct Slip {
        #[serde(with = "decimal")]
        amount: Satang,
    }

    #[test]
    fn decimal_serde() {
        let slip: Slip = serde_json::from_str(r#"{"amount": 1500.5}"#).unwrap();
        assert_eq!(slip.amount, Satang::from(150_050));
        let slip: Slip = serde_json::from_str(r#"{"amount": "1,200"}"#).unwrap();
        assert_eq!(slip.amount, Satang::from_baht(1200));
        let slip: Slip = serde_json::from_str(r#"{"amount": 42}"#).unwrap();
        assert_eq!(slip.amount, Satang::from_baht(42));
        assert_eq!(serde_json::to_string(&slip).unwrap(), r#"{"amount":"42.00"}"#);
    }
}
