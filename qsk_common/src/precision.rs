//! Module to handle the formattings of amount of assets given its precision.

use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    #[error("The maximum precision is 8, given {0}")]
    TooPrecise(u32),
}

/// Parse a decimal string, treating anything unparsable (including the empty
/// string) as zero.
pub fn parse_or_zero(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or_default()
}

/// Helper to convert on-wire integer base-unit values of an asset to the
/// decimal-string value with the given precision and viceversa.
///
/// For example 1000000 base units with precision 8 is "0.01"
#[derive(Debug, Clone, Copy)]
pub struct Precision(u32);

impl Precision {
    /// Create a new Precision, erroring if the given precision is greater than the allowed maximum (8)
    pub fn new(precision: u32) -> Result<Precision, Error> {
        if precision > 8 {
            Err(Error::TooPrecise(precision))
        } else {
            Ok(Precision(precision))
        }
    }

    /// Convert the given base units to the normalized decimal value according
    /// to our precision, without trailing zeros.
    ///
    /// ```
    /// # use qsk_common::precision::Precision;
    /// let p = Precision::new(8).unwrap();
    /// assert_eq!(p.units_to_string(1_000_000), "0.01");
    /// ```
    pub fn units_to_string(&self, units: i64) -> String {
        Decimal::new(units, self.0).normalize().to_string()
    }

    /// Shift a decimal string down by our precision, e.g. a satoshi-valued
    /// `"1000000"` becomes `"0.01"` at precision 8. Unparsable input shifts
    /// as zero.
    pub fn shift_str(&self, value: &str) -> String {
        self.shift(parse_or_zero(value)).normalize().to_string()
    }

    /// Shift a decimal down by our precision.
    pub fn shift(&self, value: Decimal) -> Decimal {
        value * Decimal::new(1, self.0)
    }

    /// Format a value with exactly our precision's decimal places, e.g. a
    /// fee of `0.5` at precision 8 renders `"0.50000000"`.
    pub fn fixed_string(&self, value: Decimal) -> String {
        format!("{:.*}", self.0 as usize, value.round_dp(self.0))
    }
}
