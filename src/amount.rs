//! Native coin amounts, denominated in nano units.

use std::str::FromStr;

use cosmwasm_std::Uint256;

use crate::error::CodecError;

pub type Amount = Uint256;

pub const NANO_DIGITS: usize = 9;
pub const NANO_PER_COIN: u128 = 1_000_000_000;

/// Execution overhead that funding must cover on top of the committed sums (0.05 coins).
pub fn funding_reserve() -> Amount {
    Uint256::from(50_000_000u128)
}

/// Rejects negative values; everything else is representable.
pub fn from_signed(value: i128) -> Result<Amount, CodecError> {
    u128::try_from(value)
        .map(Uint256::from)
        .map_err(|_| CodecError::InvalidAmount(format!("{value} is negative")))
}

/// Parses a decimal coin amount such as `"1.5"` into nano units.
pub fn parse_coins(input: &str) -> Result<Amount, CodecError> {
    let invalid = || CodecError::InvalidAmount(format!("`{input}` is not a coin amount"));
    let input = input.trim();
    if input.starts_with('-') {
        return Err(CodecError::InvalidAmount(format!("{input} is negative")));
    }
    let (whole, frac) = input.split_once('.').unwrap_or((input, ""));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !all_digits(whole) || !all_digits(frac) || frac.len() > NANO_DIGITS {
        return Err(invalid());
    }
    let whole = Uint256::from_str(whole).map_err(|_| invalid())?;
    let frac = format!("{frac:0<width$}", width = NANO_DIGITS);
    let frac = Uint256::from_str(&frac).map_err(|_| invalid())?;
    whole
        .checked_mul(Uint256::from(NANO_PER_COIN))
        .and_then(|nano| nano.checked_add(frac))
        .map_err(|_| invalid())
}

/// Formats nano units as a decimal coin amount, dropping trailing zeros.
pub fn format_coins(amount: Amount) -> String {
    let unit = Uint256::from(NANO_PER_COIN);
    let whole = amount / unit;
    let frac = (amount % unit).to_string();
    let frac = format!("{frac:0>width$}", width = NANO_DIGITS);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_coins() {
        assert_eq!(parse_coins("1").unwrap(), Uint256::from(1_000_000_000u128));
        assert_eq!(parse_coins("0.05").unwrap(), funding_reserve());
        assert_eq!(parse_coins("0.000000001").unwrap(), Uint256::from(1u128));
        assert_eq!(parse_coins(" 12.5 ").unwrap(), Uint256::from(12_500_000_000u128));
    }

    #[test]
    fn rejects_negative_and_garbage() {
        for input in ["-1", "-0.5", "", ".5", "1.2.3", "abc", "1.0000000001", "1e9"] {
            assert!(
                matches!(parse_coins(input), Err(CodecError::InvalidAmount(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn signed_input_must_be_non_negative() {
        assert_eq!(from_signed(42).unwrap(), Uint256::from(42u128));
        assert!(matches!(from_signed(-1), Err(CodecError::InvalidAmount(_))));
    }

    #[test]
    fn formats_without_trailing_zeros() {
        assert_eq!(format_coins(Uint256::from(1_100_000_000u128)), "1.1");
        assert_eq!(format_coins(Uint256::from(3_000_000_000u128)), "3");
        assert_eq!(format_coins(Uint256::from(1u128)), "0.000000001");
        assert_eq!(format_coins(Uint256::zero()), "0");
    }
}
