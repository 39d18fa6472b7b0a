//! The record state machine.
//!
//! Each submodule carries the operations for one concern. All of them work
//! on [`crate::model::Record`] in place; callers persist the result through
//! the storage layer under the record's SCN condition.

pub mod actions;
pub mod admin;
pub mod cancel;
pub mod claim;
pub mod consistency;
pub mod create;
pub mod dispense;
pub mod release;

pub use actions::{
    find_instances_to_action_update, update_by_action, ActionOutcome, InstanceTarget,
};
pub use admin::{update_by_admin, AdminUpdate, InstanceSelection};
pub use cancel::{
    apply_cancellation, cancellation_rejection, check_pending_cancellation_unique,
    check_pending_cancellation_unique_with_dispenser, line_cancellation_rejection,
    remove_pending_cancellations, set_pending_cancellation, set_unsuccessful_cancellation,
};
pub use claim::{update_for_claim, update_for_claim_amend};
pub use consistency::check_record_consistency;
pub use create::{create_record, NewPrescription};
pub use dispense::{
    clear_dispense_notifications_from_history, compare_line_items_for_dispense,
    create_dispense_history_entry, release_next_instance, roll_forward_instance,
    set_next_instance_prior_issue_date, update_for_dispense, DispenseUpdate,
};
pub use release::{
    create_release_history_entry, set_exemption_dates, update_for_release, update_for_return,
    withdrawn_status,
};
