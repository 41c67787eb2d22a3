use serde::{Deserialize, Serialize};

use crate::code::{Sscc, SsccError};
use crate::BASE_LEN;

/// How new codes are assembled for one company prefix:
/// `extension digit + company prefix + zero-padded serial + check digit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsccLayout {
    pub extension_digit: String,
    pub company_prefix: String,
    pub serial_length: usize,
}

impl SsccLayout {
    /// Build and validate a layout.
    pub fn new(
        extension_digit: impl Into<String>,
        company_prefix: impl Into<String>,
        serial_length: usize,
    ) -> Result<Self, SsccError> {
        let layout = Self {
            extension_digit: extension_digit.into(),
            company_prefix: company_prefix.into(),
            serial_length,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// The three parts must be numeric and cover exactly the 17 base digits.
    pub fn validate(&self) -> Result<(), SsccError> {
        let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        if self.extension_digit.len() != 1 || !numeric(&self.extension_digit) {
            return Err(SsccError::Layout(format!(
                "extension digit must be a single digit, got {:?}",
                self.extension_digit
            )));
        }
        if !numeric(&self.company_prefix) {
            return Err(SsccError::Layout(format!(
                "company prefix must be numeric, got {:?}",
                self.company_prefix
            )));
        }
        if self.serial_length == 0 {
            return Err(SsccError::Layout("serial length must be positive".to_string()));
        }

        let total = 1 + self.company_prefix.len() + self.serial_length;
        if total != BASE_LEN {
            return Err(SsccError::Layout(format!(
                "extension digit + prefix ({}) + serial ({}) = {} digits, expected {}",
                self.company_prefix.len(),
                self.serial_length,
                total,
                BASE_LEN
            )));
        }
        Ok(())
    }

    /// Largest serial that still fits the configured width.
    pub fn max_serial(&self) -> u64 {
        // serial_length is at most 15 after validation.
        10u64.saturating_pow(self.serial_length as u32) - 1
    }

    /// Assemble the code for one serial. Overflow is an error, never a wrap.
    pub fn compose(&self, serial: u64) -> Result<Sscc, SsccError> {
        self.validate()?;
        if serial > self.max_serial() {
            return Err(SsccError::SerialOverflow {
                serial,
                width: self.serial_length,
            });
        }
        let base = format!(
            "{}{}{:0width$}",
            self.extension_digit,
            self.company_prefix,
            serial,
            width = self.serial_length
        );
        Sscc::from_base(&base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_layout() -> SsccLayout {
        SsccLayout::new("0", "460704615", 7).unwrap()
    }

    #[test]
    fn compose_pads_serial_and_appends_check_digit() {
        let sscc = default_layout().compose(1).unwrap();
        assert_eq!(sscc.as_str(), "046070461500000018");
        assert_eq!(default_layout().compose(2).unwrap().as_str(), "046070461500000025");
    }

    #[test]
    fn overflow_is_rejected_not_wrapped() {
        let layout = default_layout();
        assert!(layout.compose(9_999_999).is_ok());
        assert_eq!(
            layout.compose(10_000_000),
            Err(SsccError::SerialOverflow { serial: 10_000_000, width: 7 })
        );
    }

    #[test]
    fn layout_must_cover_seventeen_digits() {
        assert!(matches!(SsccLayout::new("0", "460704615", 6), Err(SsccError::Layout(_))));
        assert!(matches!(SsccLayout::new("0", "4607046151234567", 1), Err(SsccError::Layout(_))));
        assert!(matches!(SsccLayout::new("", "460704615", 7), Err(SsccError::Layout(_))));
        assert!(matches!(SsccLayout::new("0", "46070A615", 7), Err(SsccError::Layout(_))));
        assert!(matches!(SsccLayout::new("10", "46070461", 7), Err(SsccError::Layout(_))));
    }
}
