//! Prescription identifier handling.
//!
//! Two identifier generations exist side by side. R1 identifiers have a
//! 36-character core; R2 identifiers have a 19-character core formatted as
//! three hyphenated groups. Both carry a trailing check digit computed over
//! the base-36 value of every other character.

mod checksum;
mod release;

pub use checksum::{calculate_check_digit, remove_check_digit, verify_check_digit};
pub use release::{sharded_release_version, ReleaseVersion, RELEASE_VERSION_PARTITIONS};

/// Errors that can occur when handling prescription identifiers.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// A character outside 0-9/A-Z appeared where a base-36 digit was expected
    #[error("invalid character {found:?} in prescription id {id}")]
    InvalidCharacter { id: String, found: char },
    /// The identifier is too short to carry a check digit
    #[error("prescription id too short: {0}")]
    TooShort(String),
}

pub type IdResult<T> = std::result::Result<T, IdError>;

/// Length of an R1 identifier core, without its check digit.
pub const LONG_ID_LENGTH: usize = 36;
/// Length of an R2 identifier core, without its check digit.
pub const SHORT_ID_LENGTH: usize = 19;

/// Strip a trailing check digit from a prescription identifier by length.
///
/// Identifiers longer than 36 characters are R1 ids carrying a check digit,
/// so they truncate to 36. Lengths strictly between 19 and 36 are R2 ids
/// carrying a check digit, so they truncate to 19. Anything else passes
/// through unchanged. The operation is idempotent.
pub fn prescription_id_without_check_digit(prescription_id: &str) -> &str {
    let len = prescription_id.len();
    if len > LONG_ID_LENGTH {
        &prescription_id[..LONG_ID_LENGTH]
    } else if len > SHORT_ID_LENGTH && len < LONG_ID_LENGTH {
        &prescription_id[..SHORT_ID_LENGTH]
    } else {
        prescription_id
    }
}
