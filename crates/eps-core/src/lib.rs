//! # EPS Core
//!
//! Business logic for the electronic prescription record system.
//!
//! This crate contains the pure record operations:
//! - The prescription record model and its status state machine
//! - Lifecycle operations (create, release, dispense, claim, cancel)
//! - Next-activity scheduling and the record-level rollup
//! - Change log maintenance and record consistency checks
//! - Search index term construction
//!
//! **No storage concerns**: row layout, optimistic concurrency, and index
//! persistence belong in `eps-store`.

pub mod changelog;
pub mod config;
pub mod context;
mod error;
pub mod generator;
pub mod indexes;
pub mod model;
pub mod record;
pub mod rollup;
pub mod time;

pub use config::CoreConfig;
pub use context::MessageContext;
pub use error::{CancelRejection, EpsError, EpsResult};
