//! The approve/reject state machine.
//!
//! [`decide`] is pure with respect to storage: it validates a decision
//! against the request's current status and, on success, moves the request
//! and records the transition in memory. Persisting and notifying are the
//! service's job.
use super::audit;
use super::directory::User;
use super::error::{Result, WorkflowError};
use super::request::{EventType, PurchaseRequest};
use super::status::RequestStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub approve: bool,
    pub signature: String,
}

impl Decision {
    pub fn approve(signature: &str) -> Self {
        Self {
            approve: true,
            signature: signature.to_string(),
        }
    }
    pub fn reject(signature: &str) -> Self {
        Self {
            approve: false,
            signature: signature.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event_type: EventType,
}

/// Fails unless `role` may act on a request sitting in `status`.
pub fn authorize(status: RequestStatus, role: &str) -> Result<()> {
    match status {
        RequestStatus::Received => Err(WorkflowError::AlreadyReceived),
        RequestStatus::Rejected => Err(WorkflowError::AlreadyRejected),
        status if status.permits(role) => Ok(()),
        status => Err(WorkflowError::NotAuthorized {
            role: role.to_string(),
            status,
        }),
    }
}

/// Applies one approve or reject decision to `request`.
///
/// `actor` is the directory record of the acting user and `role` the role
/// they act under. Nothing is mutated when an error is returned.
pub fn decide(
    request: &mut PurchaseRequest,
    actor: &User,
    role: &str,
    decision: &Decision,
) -> Result<Transition> {
    let from = request.status();
    authorize(from, role)?;

    let (to, event_type, verb) = if decision.approve {
        // authorize rejected terminal statuses, so a next stage exists
        let next = from.next_on_approval().ok_or(WorkflowError::AlreadyReceived)?;
        (next, EventType::Approved, "approved")
    } else {
        (RequestStatus::Rejected, EventType::Rejected, "rejected")
    };

    let description = format!("Purchase request {verb} by user: {}", actor.full_name());
    audit::record_transition(request, to, actor, &decision.signature, event_type, description)?;

    Ok(Transition {
        from,
        to,
        event_type,
    })
}
