//! Approval history and timeline recording.
//!
//! A transition writes one history entry and one timeline event, and a
//! request never carries half of a transition.
use super::error::Result;
use super::request::{ApprovalHistoryEntry, EventType, PurchaseRequest, TimelineEvent};
use super::status::RequestStatus;
use crate::directory::User;

/// Moves `request` to `status` and records the transition in both trails.
pub fn record_transition(
    request: &mut PurchaseRequest,
    status: RequestStatus,
    actor: &User,
    signature: &str,
    event_type: EventType,
    description: String,
) -> Result<()> {
    let at = request.next_timestamp();
    let entry = ApprovalHistoryEntry::new(
        request.id().to_string(),
        at.clone(),
        status,
        actor.id,
        signature.to_string(),
    );
    let event = TimelineEvent::new(
        request.id().to_string(),
        at,
        event_type,
        description,
        Some(actor.id),
    );

    // staged on a copy so a failed append leaves both trails untouched
    let mut staged = request.clone();
    staged.append_history(entry)?;
    staged.append_timeline(event)?;
    staged.set_status(status);
    *request = staged;
    Ok(())
}

/// Records the INITIATED entry and the CREATED event of a new request.
pub fn record_creation(request: &mut PurchaseRequest, creator: &User, signature: &str) -> Result<()> {
    let description = format!("Purchase request created by user: {}", creator.full_name());
    record_transition(
        request,
        RequestStatus::Initiated,
        creator,
        signature,
        EventType::Created,
        description,
    )
}

/// Timeline only event, used for edits.
pub fn record_event(
    request: &mut PurchaseRequest,
    event_type: EventType,
    actor: Option<&User>,
    description: String,
) -> Result<()> {
    let at = request.next_timestamp();
    let event = TimelineEvent::new(
        request.id().to_string(),
        at,
        event_type,
        description,
        actor.map(|a| a.id),
    );
    request.append_timeline(event)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ChainError {
    #[error("history entry {seq} is out of sequence")]
    OutOfSequence { seq: u64 },
    #[error("history entry {seq} does not match its digest")]
    DigestMismatch { seq: u64 },
    #[error("history entry {seq} could not be re-encoded")]
    Unencodable { seq: u64 },
}

/// Recomputes the digest chain over the approval history.
pub fn verify_history(request: &PurchaseRequest) -> std::result::Result<(), ChainError> {
    let mut prev = String::new();
    for (index, entry) in request.approval_history().iter().enumerate() {
        let seq = entry.seq;
        if seq != index as u64 + 1 {
            return Err(ChainError::OutOfSequence { seq });
        }
        let digest = entry
            .digest_after(&prev)
            .map_err(|_| ChainError::Unencodable { seq })?;
        if digest != entry.chain_digest {
            return Err(ChainError::DigestMismatch { seq });
        }
        prev = digest;
    }
    Ok(())
}
