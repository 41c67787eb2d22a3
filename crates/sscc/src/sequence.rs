use serde::{Deserialize, Serialize};

use crate::code::{Sscc, SsccError};
use crate::layout::SsccLayout;

/// Persisted serial counter, one per company prefix.
///
/// `next_serial` only ever grows; a handed-out serial is never reused, even if
/// the transaction that used it later fails for an unrelated reason and the
/// caller retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsccSequence {
    pub company_prefix: String,
    pub extension_digit: String,
    pub serial_length: usize,
    pub next_serial: u64,
}

impl SsccSequence {
    /// Fresh counter for `layout`, starting at serial 1.
    pub fn start(layout: &SsccLayout) -> Self {
        Self {
            company_prefix: layout.company_prefix.clone(),
            extension_digit: layout.extension_digit.clone(),
            serial_length: layout.serial_length,
            next_serial: 1,
        }
    }

    /// Take the next serial and compose its code.
    ///
    /// On overflow the counter is left untouched so the error repeats on every
    /// call until an operator widens the layout.
    pub fn allocate(&mut self, layout: &SsccLayout) -> Result<(u64, Sscc), SsccError> {
        let serial = self.next_serial;
        let code = layout.compose(serial)?;
        self.next_serial = serial + 1;
        Ok((serial, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_consecutive_serials() {
        let layout = SsccLayout::new("0", "460704615", 7).unwrap();
        let mut seq = SsccSequence::start(&layout);

        let (s1, c1) = seq.allocate(&layout).unwrap();
        let (s2, c2) = seq.allocate(&layout).unwrap();
        assert_eq!((s1, s2), (1, 2));
        assert_eq!(c1.as_str(), "046070461500000018");
        assert_eq!(c2.as_str(), "046070461500000025");
        assert_eq!(seq.next_serial, 3);
    }

    #[test]
    fn overflow_does_not_advance_counter() {
        let layout = SsccLayout::new("0", "460704615", 7).unwrap();
        let mut seq = SsccSequence::start(&layout);
        seq.next_serial = 10_000_000;

        assert!(matches!(seq.allocate(&layout), Err(SsccError::SerialOverflow { .. })));
        assert_eq!(seq.next_serial, 10_000_000);
    }
}
