//! Kubernetes resource quantities.
//!
//! Parses the quantity grammar used by `resources.limits` / `ResourceQuota.spec.hard`
//! (`"2"`, `"500m"`, `"200Mi"`, `"1e3"`) into a value that compares numerically,
//! and renders it back in canonical form:
//!
//! ```text
//! "1024Mi" -> "1Gi"
//! "0.5"    -> "500m"
//! "1000m"  -> "1"
//! ```
//!
//! Values are held with nano precision. Fractions below one nano are rounded
//! up, matching how the API server stores quantities.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use regex::Regex;
use thiserror::Error;

/// Nanos per unit.
const NANO: i128 = 1_000_000_000;

/// Binary SI suffixes, ordered by exponent of 1024.
const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

/// Decimal SI suffixes with their exponent of ten.
const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

static QUANTITY_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^([+-]?)([0-9]+\.?[0-9]*|\.[0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei|[eE][+-]?[0-9]+|[numkMGTPE])?$",
    )
});

/// Error returned when a string is not a valid quantity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// The input was empty.
    #[error("quantity must not be empty")]
    Empty,

    /// The input does not follow the quantity grammar.
    #[error(
        "invalid quantity {0:?}: expected a number with an optional suffix (Ki, Mi, Gi, Ti, Pi, Ei, n, u, m, k, M, G, T, P, E or an exponent)"
    )]
    Invalid(String),

    /// The value cannot be represented with nano precision.
    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),

    /// The quantity grammar failed to compile.
    #[error("failed to compile quantity regex: {0}")]
    RegexCompilation(String),
}

/// The notation a quantity was written in. Canonical rendering keeps it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Powers of 1024 (`Ki`, `Mi`, ...).
    BinarySI,
    /// Powers of 1000 (`m`, `k`, `M`, ...).
    DecimalSI,
    /// Scientific notation (`1e3`).
    DecimalExponent,
}

/// A parsed quantity.
///
/// Equality, ordering and hashing only look at the numeric value, so
/// `"1000m"` equals `"1"` and `"1Gi"` equals `"1024Mi"`.
#[derive(Clone, Copy, Debug)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

impl Quantity {
    /// Parse a quantity string.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }
        let re = QUANTITY_RE
            .as_ref()
            .map_err(|e| QuantityError::RegexCompilation(e.to_string()))?;
        let caps = re
            .captures(input)
            .ok_or_else(|| QuantityError::Invalid(input.to_string()))?;

        let negative = caps.get(1).is_some_and(|m| m.as_str() == "-");
        let number = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let suffix = caps.get(3).map(|m| m.as_str()).unwrap_or_default();

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| QuantityError::OutOfRange(input.to_string()))?
        };
        let scale = i32::try_from(frac_part.len())
            .map_err(|_| QuantityError::OutOfRange(input.to_string()))?;

        let (format, exp10, binary_pow) = classify_suffix(suffix)
            .ok_or_else(|| QuantityError::Invalid(input.to_string()))?;

        let out_of_range = || QuantityError::OutOfRange(input.to_string());
        let binary = 1024i128.checked_pow(binary_pow).ok_or_else(out_of_range)?;
        let numerator = mantissa.checked_mul(binary).ok_or_else(out_of_range)?;

        // value = numerator * 10^(exp10 + 9 - scale) nanos
        let shift = exp10
            .checked_add(9)
            .and_then(|e| e.checked_sub(scale))
            .ok_or_else(out_of_range)?;
        let magnitude = if shift >= 0 {
            let factor = pow10(shift.unsigned_abs()).ok_or_else(out_of_range)?;
            numerator.checked_mul(factor).ok_or_else(out_of_range)?
        } else {
            match pow10(shift.unsigned_abs()) {
                Some(divisor) => ceil_div(numerator, divisor),
                // Anything this small rounds to a single nano.
                None => i128::from(numerator > 0),
            }
        };

        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format,
        })
    }

    /// Build a quantity from a whole number of units in decimal notation.
    pub fn from_units(units: i64) -> Self {
        Self {
            nanos: i128::from(units) * NANO,
            format: Format::DecimalSI,
        }
    }

    /// The notation this quantity renders in.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Value in nano units.
    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Canonical string wrapped in the k8s-openapi type.
    pub fn to_k8s(&self) -> K8sQuantity {
        K8sQuantity(self.to_string())
    }

    fn fmt_binary(&self, f: &mut fmt::Formatter<'_>) -> Option<fmt::Result> {
        if self.nanos % NANO != 0 {
            return None;
        }
        let units = self.nanos / NANO;
        if units.abs() < 1024 {
            return None;
        }
        let mut mantissa = units;
        let mut suffix = "";
        for (name, _) in BINARY_SUFFIXES {
            if mantissa % 1024 != 0 {
                break;
            }
            mantissa /= 1024;
            suffix = name;
        }
        Some(write!(f, "{mantissa}{suffix}"))
    }

    fn fmt_decimal(&self, f: &mut fmt::Formatter<'_>, exponent_form: bool) -> fmt::Result {
        // Largest power of 1000 that keeps the mantissa integral, from nano to exa.
        let mut exp = -9i32;
        let mut mantissa = self.nanos;
        while exp < 18 && mantissa % 1000 == 0 {
            mantissa /= 1000;
            exp += 3;
        }
        if exponent_form && exp >= 0 {
            if exp == 0 {
                return write!(f, "{mantissa}");
            }
            return write!(f, "{mantissa}e{exp}");
        }
        let suffix = DECIMAL_SUFFIXES
            .iter()
            .find(|(_, e)| *e == exp)
            .map(|(s, _)| *s)
            .unwrap_or_default();
        write!(f, "{mantissa}{suffix}")
    }
}

/// Returns (format, decimal exponent, binary power of 1024).
fn classify_suffix(suffix: &str) -> Option<(Format, i32, u32)> {
    if let Some((_, pow)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((Format::BinarySI, 0, *pow));
    }
    if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((Format::DecimalSI, *exp, 0));
    }
    let exponent = suffix.strip_prefix(['e', 'E'])?;
    let exp = exponent.parse::<i32>().ok()?;
    Some((Format::DecimalExponent, exp, 0))
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn ceil_div(numerator: i128, divisor: i128) -> i128 {
    let quotient = numerator / divisor;
    if numerator % divisor == 0 {
        quotient
    } else {
        quotient + 1
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return write!(f, "0");
        }
        match self.format {
            Format::BinarySI => match self.fmt_binary(f) {
                Some(result) => result,
                None => self.fmt_decimal(f, false),
            },
            Format::DecimalSI => self.fmt_decimal(f, false),
            Format::DecimalExponent => self.fmt_decimal(f, true),
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&K8sQuantity> for Quantity {
    type Error = QuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::parse(&value.0)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}
