//! Decimal amounts and base-unit conversion.
//!
//! On-chain amounts are integers scaled by the token's decimal count; people
//! type and read them as decimals. Everything here is arbitrary precision
//! (`num-bigint`), never `f64`:
//! - `Decimal`: non-negative fixed-point value `mantissa / 10^scale`, kept normalized
//!   (no trailing fractional zeros) so derived equality is value equality.
//! - `to_base_units` / `to_display_units`: string-facing helpers for the two directions.
//! - `u256_to_biguint` / `biguint_to_u256`: bridge to the EVM word type.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use ethers::types::U256;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Upper bound for token decimals accepted by the helpers.
pub const MAX_DECIMALS: u32 = 36;

/// Fractional digits kept by `Decimal::checked_div` (floor).
pub const DIVISION_SCALE: u32 = 36;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("not a number: `{0}`")]
    InvalidNumber(String),
    #[error("negative amount: `{0}`")]
    Negative(String),
    #[error("decimals {0} out of range 0..={MAX_DECIMALS}")]
    DecimalsOutOfRange(u32),
    #[error("`{value}` has more than {decimals} fractional digits")]
    ExcessPrecision { value: String, decimals: u32 },
    #[error("value does not fit into 256 bits")]
    Overflow,
}

fn pow10(exp: u32) -> BigUint {
    BigUint::from(10u32).pow(exp)
}

fn check_decimals(decimals: u32) -> Result<(), UnitsError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitsError::DecimalsOutOfRange(decimals));
    }
    Ok(())
}

/// Non-negative arbitrary-precision decimal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: BigUint,
    scale: u32,
}

impl Decimal {
    pub fn zero() -> Self {
        Self {
            mantissa: BigUint::zero(),
            scale: 0,
        }
    }

    fn new(mantissa: BigUint, scale: u32) -> Self {
        Self { mantissa, scale }.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.mantissa.is_zero() {
            self.scale = 0;
            return self;
        }
        let ten = BigUint::from(10u32);
        while self.scale > 0 && (&self.mantissa % &ten).is_zero() {
            self.mantissa /= &ten;
            self.scale -= 1;
        }
        self
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Number of fractional digits after normalization.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn from_integer(v: u64) -> Self {
        Self::new(BigUint::from(v), 0)
    }

    /// `units / 10^decimals`.
    pub fn from_base_units(units: BigUint, decimals: u32) -> Self {
        Self::new(units, decimals)
    }

    pub fn from_u256(units: U256, decimals: u32) -> Self {
        Self::from_base_units(u256_to_biguint(units), decimals)
    }

    /// `self * 10^decimals`; fails when the value has more fractional digits than `decimals`.
    pub fn to_base_units(&self, decimals: u32) -> Result<BigUint, UnitsError> {
        if self.scale > decimals {
            return Err(UnitsError::ExcessPrecision {
                value: self.to_string(),
                decimals,
            });
        }
        Ok(&self.mantissa * pow10(decimals - self.scale))
    }

    /// Drops fractional digits beyond `decimals` (rounds toward zero).
    pub fn trunc(&self, decimals: u32) -> Self {
        if self.scale <= decimals {
            return self.clone();
        }
        Self::new(&self.mantissa / pow10(self.scale - decimals), decimals)
    }

    /// Exact product.
    pub fn mul(&self, rhs: &Decimal) -> Decimal {
        Self::new(&self.mantissa * &rhs.mantissa, self.scale + rhs.scale)
    }

    /// Quotient floored at `DIVISION_SCALE` fractional digits; `None` for a zero divisor.
    pub fn checked_div(&self, rhs: &Decimal) -> Option<Decimal> {
        if rhs.is_zero() {
            return None;
        }
        let num = &self.mantissa * pow10(rhs.scale + DIVISION_SCALE);
        let den = &rhs.mantissa * pow10(self.scale);
        Some(Self::new(num / den, DIVISION_SCALE))
    }
}

impl Default for Decimal {
    fn default() -> Self {
        Self::zero()
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.scale.cmp(&other.scale) {
            Ordering::Equal => self.mantissa.cmp(&other.mantissa),
            Ordering::Less => {
                (&self.mantissa * pow10(other.scale - self.scale)).cmp(&other.mantissa)
            }
            Ordering::Greater => self
                .mantissa
                .cmp(&(&other.mantissa * pow10(self.scale - other.scale))),
        }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Decimal {
    type Err = UnitsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        if s.starts_with('-') {
            return Err(UnitsError::Negative(raw.to_string()));
        }
        let s = s.strip_prefix('+').unwrap_or(s);
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        let is_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (int.is_empty() && frac.is_empty()) || !is_digits(int) || !is_digits(frac) {
            return Err(UnitsError::InvalidNumber(raw.to_string()));
        }
        let digits = format!("{int}{frac}");
        let mantissa = BigUint::parse_bytes(digits.as_bytes(), 10)
            .ok_or_else(|| UnitsError::InvalidNumber(raw.to_string()))?;
        let scale =
            u32::try_from(frac.len()).map_err(|_| UnitsError::InvalidNumber(raw.to_string()))?;
        Ok(Self::new(mantissa, scale))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.to_str_radix(10);
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() <= scale {
            write!(f, "0.{}{}", "0".repeat(scale - digits.len()), digits)
        } else {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{int}.{frac}")
        }
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Decimal string → integer string in base units (`amount * 10^decimals`).
pub fn to_base_units(amount: &str, decimals: u32) -> Result<String, UnitsError> {
    check_decimals(decimals)?;
    let value: Decimal = amount.parse()?;
    Ok(value.to_base_units(decimals)?.to_str_radix(10))
}

/// Integer string in base units → decimal string (`amount / 10^decimals`).
/// Zero short-circuits to exactly `"0"`.
pub fn to_display_units(amount: &str, decimals: u32) -> Result<String, UnitsError> {
    check_decimals(decimals)?;
    let trimmed = amount.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitsError::InvalidNumber(amount.to_string()));
    }
    let units = BigUint::parse_bytes(trimmed.as_bytes(), 10)
        .ok_or_else(|| UnitsError::InvalidNumber(amount.to_string()))?;
    if units.is_zero() {
        return Ok("0".to_string());
    }
    Ok(Decimal::from_base_units(units, decimals).to_string())
}

pub fn u256_to_biguint(v: U256) -> BigUint {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    BigUint::from_bytes_be(&buf)
}

pub fn biguint_to_u256(v: &BigUint) -> Result<U256, UnitsError> {
    let bytes = v.to_bytes_be();
    if bytes.len() > 32 {
        return Err(UnitsError::Overflow);
    }
    Ok(U256::from_big_endian(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display_are_canonical() {
        assert_eq!(d("12.500").to_string(), "12.5");
        assert_eq!(d("0.000").to_string(), "0");
        assert_eq!(d(".25").to_string(), "0.25");
        assert_eq!(d("7.").to_string(), "7");
        assert_eq!(d("0.0001").to_string(), "0.0001");
        assert_eq!(d("+3").to_string(), "3");
    }

    #[test]
    fn parse_rejects_garbage_and_negatives() {
        assert!(matches!("".parse::<Decimal>(), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!(".".parse::<Decimal>(), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!("1e5".parse::<Decimal>(), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!("1.2.3".parse::<Decimal>(), Err(UnitsError::InvalidNumber(_))));
        assert!(matches!("-4".parse::<Decimal>(), Err(UnitsError::Negative(_))));
    }

    #[test]
    fn ordering_aligns_scales() {
        assert!(d("1.5") > d("1.25"));
        assert!(d("2") > d("1.999999999999"));
        assert_eq!(d("3.10"), d("3.1"));
        assert_eq!(d("3").cmp(&d("3.000")), Ordering::Equal);
    }

    #[test]
    fn arithmetic_is_exact() {
        assert_eq!(d("500").mul(&d("2000")), d("1000000"));
        assert_eq!(d("0.002").mul(&d("300")), d("0.6"));
        assert_eq!(d("1000000").checked_div(&d("2000")).unwrap(), d("500"));
        assert_eq!(d("1").checked_div(&d("0.002")).unwrap(), d("500"));
        assert!(d("1").checked_div(&Decimal::zero()).is_none());
        // 1/3 floors at DIVISION_SCALE digits
        let third = d("1").checked_div(&d("3")).unwrap();
        assert_eq!(third.scale(), DIVISION_SCALE);
        assert!(third < d("0.34"));
    }

    #[test]
    fn trunc_rounds_toward_zero() {
        assert_eq!(d("1.23456").trunc(2), d("1.23"));
        assert_eq!(d("1.2").trunc(9), d("1.2"));
        assert_eq!(d("0.009").trunc(2), Decimal::zero());
    }

    #[test]
    fn base_units_helpers() {
        assert_eq!(to_base_units("1.5", 18).unwrap(), "1500000000000000000");
        assert_eq!(to_base_units("42", 0).unwrap(), "42");
        assert_eq!(to_display_units("1500000000", 9).unwrap(), "1.5");
        assert_eq!(to_display_units("0", 18).unwrap(), "0");
        assert_eq!(to_display_units("000", 9).unwrap(), "0");
        assert!(matches!(
            to_base_units("0.0000000001", 9),
            Err(UnitsError::ExcessPrecision { decimals: 9, .. })
        ));
        assert!(matches!(to_base_units("1", 37), Err(UnitsError::DecimalsOutOfRange(37))));
        assert!(matches!(to_display_units("1.5", 9), Err(UnitsError::InvalidNumber(_))));
    }

    #[test]
    fn u256_bridge() {
        let v = U256::from_dec_str("115792089237316195423570985008687907853269984665640564039457584007913129639935").unwrap();
        let big = u256_to_biguint(v);
        assert_eq!(biguint_to_u256(&big).unwrap(), v);
        let too_big = big + BigUint::from(1u32);
        assert_eq!(biguint_to_u256(&too_big), Err(UnitsError::Overflow));
        assert_eq!(Decimal::from_u256(U256::from(2_500_000_000u64), 9), d("2.5"));
    }

    proptest! {
        #[test]
        fn display_of_base_units_round_trips(
            int in 0u64..1_000_000_000_000,
            frac in proptest::collection::vec(0u8..10, 0..12),
            extra in 0u32..12,
        ) {
            let mut frac: String = frac.iter().map(|b| char::from(b'0' + b)).collect();
            while frac.ends_with('0') {
                frac.pop();
            }
            let x = if frac.is_empty() { int.to_string() } else { format!("{int}.{frac}") };
            let decimals = frac.len() as u32 + extra;
            let base = to_base_units(&x, decimals).unwrap();
            prop_assert_eq!(to_display_units(&base, decimals).unwrap(), x);
        }
    }
}
