use crate::error::{
    EscrowError,
    Result,
};

/// Fractional digits of the base asset on both supported ledgers.
pub const DEFAULT_DECIMALS: u32 = 9;

// 10^19 is the largest power of ten a u64 holds
const MAX_DECIMALS: u32 = 19;

/// Converts between human decimal amounts and atomic ledger units.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CurrencyCodec {
    decimals: u32,
}

impl CurrencyCodec {
    pub fn new(decimals: u32) -> Self {
        Self {
            decimals: decimals.min(MAX_DECIMALS),
        }
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    fn one_unit(&self) -> u64 {
        10u64.pow(self.decimals)
    }

    /// Parses a non-negative decimal string such as `"12.5"` into atomic
    /// units. Significant digits below the ledger scale are an error rather
    /// than a silent truncation; trailing zeros are accepted.
    pub fn parse_amount(&self, raw: &str) -> Result<u64> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EscrowError::InvalidAmount("amount is empty".into()));
        }
        if trimmed.starts_with('-') {
            return Err(EscrowError::InvalidAmount(format!(
                "'{trimmed}' is negative"
            )));
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty())
            || !all_digits(whole)
            || !all_digits(fraction)
        {
            return Err(EscrowError::InvalidAmount(format!(
                "'{trimmed}' is not a decimal number"
            )));
        }
        let scale = self.decimals as usize;
        let fraction = if fraction.len() > scale {
            let (kept, excess) = fraction.split_at(scale);
            if excess.bytes().any(|b| b != b'0') {
                return Err(EscrowError::InvalidAmount(format!(
                    "'{trimmed}' has more than {} fractional digits",
                    self.decimals
                )));
            }
            kept
        } else {
            fraction
        };

        let overflow =
            || EscrowError::InvalidAmount(format!("'{trimmed}' is too large"));
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| overflow())?
        };
        let fraction_units = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{fraction:0<scale$}");
            padded.parse::<u64>().map_err(|_| overflow())?
        };

        whole_units
            .checked_mul(self.one_unit())
            .and_then(|atomic| atomic.checked_add(fraction_units))
            .ok_or_else(overflow)
    }

    /// Renders `atomic` with exactly `precision` fractional digits,
    /// truncating anything finer. Display only.
    pub fn format_amount(&self, atomic: u64, precision: u32) -> String {
        let one_unit = self.one_unit();
        let whole = atomic / one_unit;
        if precision == 0 {
            return whole.to_string();
        }
        let fractional = atomic % one_unit;
        let mut digits = if self.decimals == 0 {
            String::new()
        } else {
            format!("{:0width$}", fractional, width = self.decimals as usize)
        };
        digits.truncate(precision as usize);
        while digits.len() < precision as usize {
            digits.push('0');
        }
        format!("{whole}.{digits}")
    }
}

impl Default for CurrencyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DECIMALS)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_amount__whole_and_fractional_units() {
        let codec = CurrencyCodec::default();
        assert_eq!(codec.parse_amount("100").unwrap(), 100_000_000_000);
        assert_eq!(codec.parse_amount("1.5").unwrap(), 1_500_000_000);
        assert_eq!(codec.parse_amount(".25").unwrap(), 250_000_000);
        assert_eq!(codec.parse_amount("0.000000001").unwrap(), 1);
        assert_eq!(codec.parse_amount(" 7 ").unwrap(), 7_000_000_000);
        assert_eq!(codec.parse_amount("1.500000000000").unwrap(), 1_500_000_000);
    }

    #[test]
    fn parse_amount__rejects_negative_and_non_numeric() {
        let codec = CurrencyCodec::default();
        for raw in ["", "-1", "abc", "1.2.3", "1e5", ".", "0x10"] {
            assert!(
                matches!(codec.parse_amount(raw), Err(EscrowError::InvalidAmount(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_amount__rejects_digits_beyond_the_scale() {
        let codec = CurrencyCodec::new(2);
        assert!(matches!(
            codec.parse_amount("1.234"),
            Err(EscrowError::InvalidAmount(_))
        ));
    }

    #[test]
    fn parse_amount__rejects_overflow() {
        let codec = CurrencyCodec::default();
        assert!(matches!(
            codec.parse_amount("18446744073709551615"),
            Err(EscrowError::InvalidAmount(_))
        ));
    }

    #[test]
    fn format_amount__fixed_precision_truncates() {
        let codec = CurrencyCodec::default();
        assert_eq!(codec.format_amount(1_234_567_890, 4), "1.2345");
        assert_eq!(codec.format_amount(100_000_000_000, 4), "100.0000");
        assert_eq!(codec.format_amount(999, 0), "0");
        assert_eq!(codec.format_amount(1, 12), "0.000000001000");
    }

    #[test]
    fn format_amount__zero_decimal_ledger() {
        let codec = CurrencyCodec::new(0);
        assert_eq!(codec.format_amount(42, 2), "42.00");
        assert_eq!(codec.parse_amount("42").unwrap(), 42);
    }

    #[test]
    fn new__clamps_decimals_to_what_a_u64_can_scale() {
        let codec = CurrencyCodec::new(25);
        assert_eq!(codec.decimals(), 19);
        assert_eq!(codec.parse_amount("1").unwrap(), 10_000_000_000_000_000_000);
        assert!(matches!(
            codec.parse_amount("2"),
            Err(EscrowError::InvalidAmount(_))
        ));
    }

    proptest! {
        #[test]
        fn format_then_parse__stays_within_one_display_unit(
            atomic in 0u64..=u64::MAX / 2,
            precision in 0u32..=12,
        ) {
            let codec = CurrencyCodec::default();
            let shown = codec.format_amount(atomic, precision);
            let parsed = codec.parse_amount(&shown).unwrap();
            let unit = 10u64.pow(DEFAULT_DECIMALS.saturating_sub(precision));
            prop_assert!(parsed <= atomic);
            prop_assert!(atomic - parsed < unit);
        }

        #[test]
        fn parse_then_format__reproduces_the_input(
            whole in 0u64..1_000_000_000,
            fraction in 0u64..10_000,
        ) {
            let codec = CurrencyCodec::default();
            let raw = format!("{whole}.{fraction:04}");
            let atomic = codec.parse_amount(&raw).unwrap();
            prop_assert_eq!(codec.format_amount(atomic, 4), raw);
        }
    }
}
