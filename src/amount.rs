// 💶 Amount Layer - Exact fixed-point money
// Parses the two decimal conventions found in the exports, renders report values

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// DECIMAL CONVENTION
// ============================================================================

/// Which characters separate thousands and decimals in a source export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalConvention {
    /// "1,234.56" - comma thousands, dot decimal.
    /// A single fractional digit means tenths: "9.8" is 9 units 80 minor units.
    DotDecimal,
    /// "1.234,56" - dot thousands, comma decimal. Fraction taken literally.
    CommaDecimal,
}

impl DecimalConvention {
    fn separators(&self) -> (char, char) {
        match self {
            DecimalConvention::DotDecimal => (',', '.'),
            DecimalConvention::CommaDecimal => ('.', ','),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("malformed amount `{raw}`: {reason}")]
    MalformedAmount { raw: String, reason: String },
}

impl AmountError {
    fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        AmountError::MalformedAmount {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// AMOUNT
// ============================================================================

/// Fixed-point money value: whole units plus minor units (0-99).
///
/// `Amount::ABSENT` (0,00) means "not set" and renders as an empty cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount {
    units: u64,
    minor_units: u8,
}

impl Amount {
    pub const ABSENT: Amount = Amount { units: 0, minor_units: 0 };

    /// Returns `None` when `minor_units` is 100 or more
    pub fn new(units: u64, minor_units: u8) -> Option<Self> {
        if minor_units < 100 {
            Some(Amount { units, minor_units })
        } else {
            None
        }
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn minor_units(&self) -> u8 {
        self.minor_units
    }

    pub fn is_absent(&self) -> bool {
        self.units == 0 && self.minor_units == 0
    }

    pub fn total_minor(&self) -> u128 {
        self.units as u128 * 100 + self.minor_units as u128
    }

    /// Parse a raw export value using the given convention
    ///
    /// # Examples:
    /// ```
    /// use payout_recon::{Amount, DecimalConvention};
    ///
    /// let a = Amount::parse("1,234.5", DecimalConvention::DotDecimal).unwrap();
    /// assert_eq!((a.units(), a.minor_units()), (1234, 50));
    /// ```
    pub fn parse(raw: &str, convention: DecimalConvention) -> Result<Amount, AmountError> {
        let (thousands, decimal) = convention.separators();
        let stripped: String = raw.trim().chars().filter(|c| *c != thousands).collect();

        let parts: Vec<&str> = stripped.split(decimal).collect();
        if parts.len() > 2 {
            return Err(AmountError::malformed(raw, "more than one decimal separator"));
        }

        let units = parts[0]
            .parse::<u64>()
            .map_err(|e| AmountError::malformed(raw, format!("units: {}", e)))?;

        let minor_units = match parts.get(1) {
            None => 0,
            Some(fraction) => {
                let value = fraction
                    .parse::<u64>()
                    .map_err(|e| AmountError::malformed(raw, format!("fraction: {}", e)))?;
                // Tenths only apply to the dot-decimal exports, which round to ten cents
                let value = if convention == DecimalConvention::DotDecimal && fraction.len() == 1 {
                    value * 10
                } else {
                    value
                };
                if value > 99 {
                    return Err(AmountError::malformed(raw, "fraction exceeds 99 minor units"));
                }
                value as u8
            }
        };

        Ok(Amount { units, minor_units })
    }

    /// Comma-decimal report rendering; empty for the absent sentinel
    pub fn to_report_string(&self) -> String {
        if self.is_absent() {
            return String::new();
        }
        format!("{},{:02}", self.units, self.minor_units)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:02}", self.units, self.minor_units)
    }
}

// ============================================================================
// VAT PERCENT
// ============================================================================

/// VAT rate implied by a tax amount inside a VAT-inclusive gross amount.
///
/// `tax / (gross - tax) * 100`, rounded half-up. Empty when the rounded rate
/// is zero or the net base is not positive.
pub fn vat_percent_of(tax: Amount, gross: Amount) -> String {
    let tax_minor = tax.total_minor();
    let gross_minor = gross.total_minor();
    if gross_minor <= tax_minor {
        return String::new();
    }
    let net_minor = gross_minor - tax_minor;

    // floor(tax * 100 / net + 1/2) in integers
    let percent = (tax_minor * 200 + net_minor) / (net_minor * 2);
    if percent == 0 {
        return String::new();
    }
    format!("{}%", percent)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(units: u64, minor: u8) -> Amount {
        Amount::new(units, minor).unwrap()
    }

    #[test]
    fn test_dot_decimal_single_digit_is_tenths() {
        let parsed = Amount::parse("9.8", DecimalConvention::DotDecimal).unwrap();
        assert_eq!(parsed, amount(9, 80));
    }

    #[test]
    fn test_dot_decimal_two_digits() {
        assert_eq!(
            Amount::parse("9.80", DecimalConvention::DotDecimal).unwrap(),
            amount(9, 80)
        );
        assert_eq!(
            Amount::parse("9.08", DecimalConvention::DotDecimal).unwrap(),
            amount(9, 8)
        );
    }

    #[test]
    fn test_dot_decimal_thousands() {
        assert_eq!(
            Amount::parse("1,234.56", DecimalConvention::DotDecimal).unwrap(),
            amount(1234, 56)
        );
        assert_eq!(
            Amount::parse("49", DecimalConvention::DotDecimal).unwrap(),
            amount(49, 0)
        );
    }

    #[test]
    fn test_comma_decimal_thousands() {
        assert_eq!(
            Amount::parse("1.234,56", DecimalConvention::CommaDecimal).unwrap(),
            amount(1234, 56)
        );
    }

    #[test]
    fn test_comma_decimal_does_not_scale_tenths() {
        // Only the dot-decimal exports get the tenths correction
        assert_eq!(
            Amount::parse("9,8", DecimalConvention::CommaDecimal).unwrap(),
            amount(9, 8)
        );
    }

    #[test]
    fn test_malformed_amounts() {
        let cases = [
            ("1.2.3", DecimalConvention::DotDecimal),
            ("abc", DecimalConvention::DotDecimal),
            ("", DecimalConvention::DotDecimal),
            ("12.", DecimalConvention::DotDecimal),
            ("12.345", DecimalConvention::DotDecimal),
            ("1,2,3", DecimalConvention::CommaDecimal),
            ("-5,00", DecimalConvention::CommaDecimal),
        ];

        for (raw, convention) in cases {
            let result = Amount::parse(raw, convention);
            assert!(
                matches!(result, Err(AmountError::MalformedAmount { .. })),
                "expected `{}` to be malformed, got {:?}",
                raw,
                result
            );
        }
    }

    #[test]
    fn test_report_string_round_trip() {
        for raw in ["0.01", "9.80", "1,234.56", "100.00"] {
            let parsed = Amount::parse(raw, DecimalConvention::DotDecimal).unwrap();
            let canonical = raw.replace(',', "").replace('.', ",");
            assert_eq!(parsed.to_report_string(), canonical);
        }
    }

    #[test]
    fn test_absent_renders_empty() {
        assert_eq!(Amount::ABSENT.to_report_string(), "");
        assert!(Amount::ABSENT.is_absent());
        assert_eq!(Amount::ABSENT.to_string(), "0,00");
        assert_eq!(amount(0, 5).to_report_string(), "0,05");
    }

    #[test]
    fn test_new_rejects_hundred_minor_units() {
        assert!(Amount::new(1, 100).is_none());
        assert!(Amount::new(1, 99).is_some());
    }

    #[test]
    fn test_vat_percent_standard_rate() {
        assert_eq!(vat_percent_of(amount(19, 0), amount(119, 0)), "19%");
        assert_eq!(vat_percent_of(amount(7, 0), amount(107, 0)), "7%");
    }

    #[test]
    fn test_vat_percent_rounds_half_up() {
        // 2,50 / 10,00 = 25%, 1,05 / 10,00 = 10.5% -> 11%
        assert_eq!(vat_percent_of(amount(2, 50), amount(12, 50)), "25%");
        assert_eq!(vat_percent_of(amount(1, 5), amount(11, 5)), "11%");
    }

    #[test]
    fn test_vat_percent_empty_cases() {
        // gross == tax has no net base
        assert_eq!(vat_percent_of(amount(5, 0), amount(5, 0)), "");
        assert_eq!(vat_percent_of(Amount::ABSENT, amount(49, 0)), "");
        assert_eq!(vat_percent_of(Amount::ABSENT, Amount::ABSENT), "");
        // 0,01 on 1000,00 rounds to zero
        assert_eq!(vat_percent_of(amount(0, 1), amount(1000, 1)), "");
    }
}
