//! Shared vocabulary types for the prescription lifecycle engine.
//!
//! Status codes cross system boundaries as fixed four-character strings, so
//! every enum here serialises to its wire code rather than its variant name.

mod activity;
mod line_item;
mod status;
mod treatment;

pub use activity::{Activity, RecordAction, USER_IMPACTING_ACTIVITY};
pub use line_item::LineItemStatus;
pub use status::PrescriptionStatus;
pub use treatment::TreatmentType;

/// Errors that can occur when decoding vocabulary codes.
#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    /// The supplied code is not part of the vocabulary
    #[error("unrecognised code: {0}")]
    Unrecognised(String),
}
