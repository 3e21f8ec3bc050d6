/*
 * Unit conversion, formatting and time helpers
 */

use chrono::Utc;
use ethers::types::{Address, U256};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use crate::models::{AqyntError, Result, ValidationError};

/// Fractional digits kept when a raw amount is turned into a `Decimal`.
const DECIMAL_PRECISION: u8 = 10;

pub fn pow10(exponent: u8) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(exponent))
}

/// Parses a human decimal string into the token's raw integer units.
///
/// Digits past the token's precision are truncated, never rounded up.
pub fn parse_units(amount: &str, decimals: u8) -> std::result::Result<U256, ValidationError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(ValidationError::MissingAmount);
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }

    let scale = pow10(decimals)
        .ok_or_else(|| ValidationError::InvalidAmount(format!("unsupported precision {decimals}")))?;

    let whole = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part).map_err(|_| ValidationError::InvalidAmount(amount.to_string()))?
    };

    let mut frac_digits: String = frac_part.chars().take(usize::from(decimals)).collect();
    while frac_digits.len() < usize::from(decimals) {
        frac_digits.push('0');
    }
    let fraction = if frac_digits.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(&frac_digits).map_err(|_| ValidationError::InvalidAmount(amount.to_string()))?
    };

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| ValidationError::InvalidAmount(format!("{amount} is too large")))
}

/// True when `amount` parses and is strictly positive at the given precision.
#[must_use]
pub fn is_positive_amount(amount: &str, decimals: u8) -> bool {
    parse_units(amount, decimals).map(|v| !v.is_zero()).unwrap_or(false)
}

/// Full-precision rendering with trailing fractional zeros removed.
#[must_use]
pub fn format_units(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let split = padded.len() - decimals;
    let (int_part, frac_part) = padded.split_at(split);
    let frac_part = frac_part.trim_end_matches('0');

    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Rendering with exactly `places` fractional digits, rounded half up.
#[must_use]
pub fn format_fixed(raw: U256, decimals: u8, places: u8) -> String {
    let scaled = if decimals > places {
        match pow10(decimals - places) {
            Some(divisor) => raw.saturating_add(divisor / 2) / divisor,
            None => U256::zero(),
        }
    } else {
        match pow10(places - decimals) {
            Some(factor) => raw.saturating_mul(factor),
            None => U256::zero(),
        }
    };

    let digits = scaled.to_string();
    let places = usize::from(places);
    if places == 0 {
        return digits;
    }
    let padded = if digits.len() <= places {
        format!("{}{}", "0".repeat(places - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - places);
    format!("{int_part}.{frac_part}")
}

/// Converts raw token units into a human-unit `Decimal`, keeping up to ten
/// fractional digits.
pub fn units_to_decimal(raw: U256, decimals: u8) -> Result<Decimal> {
    let mut bytes = [0u8; 32];
    raw.to_big_endian(&mut bytes);
    let value = BigUint::from_bytes_be(&bytes);

    let keep = decimals.min(DECIMAL_PRECISION);
    let divisor = BigUint::from(10u32).pow(u32::from(decimals - keep));
    let mantissa = (value / divisor)
        .to_i128()
        .ok_or_else(|| AqyntError::CalculationError("Amount does not fit in i128".to_string()))?;

    Decimal::try_from_i128_with_scale(mantissa, u32::from(keep))
        .map_err(|e| AqyntError::CalculationError(format!("Amount out of decimal range: {e}")))
}

#[must_use]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Absolute expiry for a state-changing call.
#[must_use]
pub fn deadline_from(now_unix: i64, deadline_minutes: u32) -> U256 {
    let now = u64::try_from(now_unix).unwrap_or(0);
    U256::from(now) + U256::from(u64::from(deadline_minutes) * 60)
}

/// Strict `0x`-prefixed, 40 hex digit address parse. Letter case is ignored.
#[must_use]
pub fn parse_address(address: &str) -> Option<Address> {
    let address = address.trim();
    if !address.starts_with("0x") || address.len() != 42 {
        return None;
    }
    Address::from_str(address).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_truncates_to_precision() {
        assert_eq!(parse_units("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25u64));
        assert_eq!(parse_units("0.1234567", 6).unwrap(), U256::from(123_456u64));
        assert_eq!(parse_units("42", 0).unwrap(), U256::from(42u64));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_units("", 18), Err(ValidationError::MissingAmount));
        assert!(matches!(parse_units("-1", 18), Err(ValidationError::InvalidAmount(_))));
        assert!(matches!(parse_units("1.2.3", 18), Err(ValidationError::InvalidAmount(_))));
        assert!(matches!(parse_units(".", 18), Err(ValidationError::InvalidAmount(_))));
        assert!(matches!(parse_units("abc", 18), Err(ValidationError::InvalidAmount(_))));
        assert!(!is_positive_amount("0.0000001", 6));
        assert!(is_positive_amount("0.000001", 6));
    }

    #[test]
    fn formats_like_wallet_libraries() {
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(5u64), 3), "0.005");
        assert_eq!(format_units(U256::from(2_000_000u64), 6), "2");
        assert_eq!(format_units(U256::zero(), 18), "0");
    }

    #[test]
    fn fixed_formatting_rounds_half_up() {
        assert_eq!(format_fixed(U256::from(1_234_550u64), 6, 4), "1.2346");
        assert_eq!(format_fixed(U256::from(1_234_549u64), 6, 4), "1.2345");
        assert_eq!(format_fixed(U256::zero(), 18, 4), "0.0000");
        assert_eq!(format_fixed(U256::from(7u64), 0, 4), "7.0000");
    }

    #[test]
    fn converts_wide_amounts_to_decimal() {
        let raw = U256::from_dec_str("1234500000000000000000").unwrap();
        assert_eq!(units_to_decimal(raw, 18).unwrap(), Decimal::from_str("1234.5").unwrap());
        assert_eq!(units_to_decimal(U256::from(250_000u64), 6).unwrap(), Decimal::from_str("0.25").unwrap());
    }

    #[test]
    fn deadline_adds_minutes() {
        assert_eq!(deadline_from(1_700_000_000, 20), U256::from(1_700_001_200u64));
    }

    #[test]
    fn address_parse_ignores_case() {
        let lower = parse_address("0x833a00575f39037403006a822c3fd7ad9abff32c").unwrap();
        let mixed = parse_address("0x833A00575F39037403006A822C3fd7AD9abFF32C").unwrap();
        assert_eq!(lower, mixed);
        assert!(parse_address("833a00575f39037403006a822c3fd7ad9abff32c").is_none());
    }
}
