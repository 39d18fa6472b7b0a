//! Reimbursement claims.

use eps_types::PrescriptionStatus;

use crate::model::Record;
use crate::EpsResult;

const CLAIMED_DISPLAY_STATUS: &str = "Claimed";

/// Record a dispense claim against an issue.
pub fn update_for_claim(
    record: &mut Record,
    issue_number: u32,
    claim_date: &str,
    dispense_claim_id: &str,
) -> EpsResult<()> {
    let issue = record.issue_mut(issue_number)?;
    issue.set_status(PrescriptionStatus::Claimed);
    issue.claim.received_date = Some(claim_date.to_owned());
    issue.claim.status = Some(CLAIMED_DISPLAY_STATUS.to_owned());
    issue.claim.guid = Some(dispense_claim_id.to_owned());
    Ok(())
}

/// Amend a previously received claim.
///
/// The superseded claim GUID is retained in the historic list so the claim
/// chain stays auditable.
pub fn update_for_claim_amend(
    record: &mut Record,
    issue_number: u32,
    claim_date: &str,
    dispense_claim_id: &str,
) -> EpsResult<()> {
    let issue = record.issue_mut(issue_number)?;
    if let Some(old_guid) = issue.claim.guid.take() {
        issue.claim.historic_guids.push(old_guid);
    }
    issue.set_status(PrescriptionStatus::Claimed);
    issue.claim.received_date = Some(claim_date.to_owned());
    issue.claim.status = Some(CLAIMED_DISPLAY_STATUS.to_owned());
    issue.claim.guid = Some(dispense_claim_id.to_owned());
    Ok(())
}
