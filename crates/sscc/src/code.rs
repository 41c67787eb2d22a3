use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockroom_core::EngineError;

use crate::{APPLICATION_IDENTIFIER, BASE_LEN, SSCC_LEN};

/// Errors raised while parsing or minting codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsccError {
    /// The scan is not 18 digits (or 20 digits with the `00` identifier).
    #[error("malformed SSCC: {0}")]
    Malformed(String),

    #[error("invalid SSCC check digit: expected {expected}, found {found}")]
    CheckDigit { expected: u8, found: u8 },

    /// Prefix / extension digit / serial width do not add up to a valid code.
    #[error("invalid SSCC layout: {0}")]
    Layout(String),

    /// The persisted counter no longer fits in the configured serial width.
    #[error("SSCC serial {serial} exceeds {width} digits")]
    SerialOverflow { serial: u64, width: usize },
}

impl From<SsccError> for EngineError {
    fn from(err: SsccError) -> Self {
        match err {
            SsccError::Malformed(_) | SsccError::CheckDigit { .. } => {
                EngineError::invalid(err.to_string())
            }
            SsccError::Layout(_) | SsccError::SerialOverflow { .. } => {
                EngineError::misconfigured(err.to_string())
            }
        }
    }
}

/// Whether the trailing check digit is verified when parsing scans.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CheckDigitMode {
    #[default]
    Verify,
    Skip,
}

impl CheckDigitMode {
    pub fn from_flag(validate: bool) -> Self {
        if validate { Self::Verify } else { Self::Skip }
    }
}

/// A validated 18-digit SSCC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sscc(String);

impl Sscc {
    /// Build a code from 17 base digits by appending the computed check digit.
    pub fn from_base(base: &str) -> Result<Self, SsccError> {
        let check = compute_check_digit(base)?;
        Ok(Self(format!("{base}{check}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 17 digits covered by the check digit.
    pub fn base(&self) -> &str {
        &self.0[..BASE_LEN]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[BASE_LEN] - b'0'
    }

    /// Barcode element string: the `00` application identifier followed by the code.
    pub fn element_string(&self) -> String {
        format!("{APPLICATION_IDENTIFIER}{}", self.0)
    }
}

impl core::fmt::Display for Sscc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sscc {
    type Err = SsccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s, CheckDigitMode::Verify)
    }
}

impl TryFrom<String> for Sscc {
    type Error = SsccError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value, CheckDigitMode::Verify)?;
        Ok(Self(value))
    }
}

impl From<Sscc> for String {
    fn from(value: Sscc) -> Self {
        value.0
    }
}

/// GS1 mod-10 check digit over 17 base digits.
///
/// Scanning right to left, weights alternate 3, 1, 3, ... starting with 3 on the
/// rightmost digit; the check digit tops the weighted sum up to a multiple of ten.
pub fn compute_check_digit(base: &str) -> Result<u8, SsccError> {
    if base.len() != BASE_LEN || !base.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SsccError::Malformed(format!(
            "base must be {BASE_LEN} digits, got {base:?}"
        )));
    }

    let sum: u32 = base
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 { digit * 3 } else { digit }
        })
        .sum();

    Ok(((10 - sum % 10) % 10) as u8)
}

/// Validate an 18-digit code: digits only, exact length, and (optionally) check digit.
pub fn validate(code: &str, mode: CheckDigitMode) -> Result<(), SsccError> {
    if code.len() != SSCC_LEN || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SsccError::Malformed(format!(
            "expected {SSCC_LEN} digits, got {code:?}"
        )));
    }
    if mode == CheckDigitMode::Skip {
        return Ok(());
    }

    let expected = compute_check_digit(&code[..BASE_LEN])?;
    let found = code.as_bytes()[BASE_LEN] - b'0';
    if expected != found {
        return Err(SsccError::CheckDigit { expected, found });
    }
    Ok(())
}

/// Normalize a raw scan into a validated code.
///
/// Accepts the bare 18 digits or a 20-digit element string led by the `00`
/// application identifier. Human-readable separators (spaces, parentheses and
/// the GS group separator) are ignored; any other non-digit is rejected.
pub fn normalize(scan: &str, mode: CheckDigitMode) -> Result<Sscc, SsccError> {
    let cleaned: String = scan
        .chars()
        .filter(|c| !(c.is_whitespace() || matches!(c, '(' | ')' | '\u{1d}')))
        .collect();

    if !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SsccError::Malformed(format!("non-digit characters in {scan:?}")));
    }

    let code = match cleaned.len() {
        SSCC_LEN => cleaned,
        n if n == SSCC_LEN + APPLICATION_IDENTIFIER.len()
            && cleaned.starts_with(APPLICATION_IDENTIFIER) =>
        {
            cleaned[APPLICATION_IDENTIFIER.len()..].to_string()
        }
        _ => {
            return Err(SsccError::Malformed(format!(
                "expected {SSCC_LEN} digits or {APPLICATION_IDENTIFIER}-prefixed element string, got {scan:?}"
            )));
        }
    };

    validate(&code, mode)?;
    Ok(Sscc(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn check_digit_matches_gs1_reference() {
        assert_eq!(compute_check_digit("10614141123456789").unwrap(), 7);
        assert_eq!(compute_check_digit("00000000000000000").unwrap(), 0);
    }

    #[test]
    fn check_digit_round_trip_for_default_prefix() {
        let base = format!("{}{}", "0460704615", "0000001");
        assert_eq!(base.len(), BASE_LEN);

        let d = compute_check_digit(&base).unwrap();
        assert_eq!(d, 8);
        assert!(validate(&format!("{base}{d}"), CheckDigitMode::Verify).is_ok());

        let wrong = (d + 1) % 10;
        assert_eq!(
            validate(&format!("{base}{wrong}"), CheckDigitMode::Verify),
            Err(SsccError::CheckDigit { expected: d, found: wrong })
        );
    }

    #[test]
    fn normalize_strips_application_identifier() {
        let sscc = normalize("00046070461500000018", CheckDigitMode::Verify).unwrap();
        assert_eq!(sscc.as_str(), "046070461500000018");
        assert_eq!(sscc.element_string(), "00046070461500000018");
    }

    #[test]
    fn normalize_accepts_human_readable_form() {
        let sscc = normalize("(00) 0 460704615 0000001 8", CheckDigitMode::Verify).unwrap();
        assert_eq!(sscc.as_str(), "046070461500000018");
    }

    #[test]
    fn normalize_rejects_letters_and_wrong_lengths() {
        assert!(matches!(
            normalize("04607046150000001X", CheckDigitMode::Verify),
            Err(SsccError::Malformed(_))
        ));
        assert!(matches!(
            normalize("0460704615000000", CheckDigitMode::Verify),
            Err(SsccError::Malformed(_))
        ));
        // 20 digits without the `00` identifier.
        assert!(matches!(
            normalize("11046070461500000018", CheckDigitMode::Verify),
            Err(SsccError::Malformed(_))
        ));
    }

    #[test]
    fn skip_mode_accepts_bad_check_digit() {
        assert!(normalize("046070461500000011", CheckDigitMode::Verify).is_err());
        assert!(normalize("046070461500000011", CheckDigitMode::Skip).is_ok());
    }

    #[test]
    fn serde_rejects_invalid_codes() {
        let err = Sscc::try_from("046070461500000011".to_string()).unwrap_err();
        assert!(matches!(err, SsccError::CheckDigit { .. }));
        let ok = Sscc::try_from("046070461500000018".to_string()).unwrap();
        assert_eq!(ok.check_digit(), 8);
        assert_eq!(ok.base(), "04607046150000001");
    }

    #[test]
    fn errors_map_onto_engine_taxonomy() {
        let e: EngineError = SsccError::Malformed("x".into()).into();
        assert_eq!(e.code(), "invalid_input");
        let e: EngineError = SsccError::SerialOverflow { serial: 10, width: 1 }.into();
        assert_eq!(e.code(), "misconfiguration");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: exactly one of the ten possible trailing digits validates.
        #[test]
        fn exactly_one_check_digit_validates(base in "[0-9]{17}") {
            let valid: Vec<u8> = (0u8..10)
                .filter(|d| validate(&format!("{base}{d}"), CheckDigitMode::Verify).is_ok())
                .collect();
            prop_assert_eq!(valid.len(), 1);
            prop_assert_eq!(valid[0], compute_check_digit(&base).unwrap());
        }

        /// Property: a single-digit substitution in the base is always detected.
        #[test]
        fn single_digit_errors_are_detected(base in "[0-9]{17}", pos in 0usize..17, bump in 1u8..10) {
            let code = Sscc::from_base(&base).unwrap();
            let mut bytes = code.as_str().as_bytes().to_vec();
            bytes[pos] = b'0' + ((bytes[pos] - b'0' + bump) % 10);
            let corrupted = String::from_utf8(bytes).unwrap();
            prop_assert!(validate(&corrupted, CheckDigitMode::Verify).is_err());
        }
    }
}
