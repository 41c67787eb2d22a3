//! GS1 Serial Shipping Container Codes.
//!
//! Pure codec: check digits, scan normalization, the company-prefix layout
//! used when minting new codes and the counter record the allocator persists.
//! Nothing here performs IO.

pub mod code;
pub mod layout;
pub mod sequence;

pub use code::{compute_check_digit, normalize, validate, CheckDigitMode, Sscc, SsccError};
pub use layout::SsccLayout;
pub use sequence::SsccSequence;

/// Number of digits in a complete SSCC.
pub const SSCC_LEN: usize = 18;

/// Number of digits covered by the check digit.
pub const BASE_LEN: usize = SSCC_LEN - 1;

/// GS1 application identifier that prefixes an SSCC inside a barcode scan.
pub const APPLICATION_IDENTIFIER: &str = "00";
