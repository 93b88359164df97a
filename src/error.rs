use crate::audit::ChainError;
use crate::status::RequestStatus;

/// Coarse classification callers use to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NotAuthorized,
    Conflict,
    Validation,
    Infrastructure,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Purchase Request not found with id {0}")]
    RequestNotFound(String),
    #[error("Department not found with id {0}")]
    DepartmentNotFound(u64),
    #[error("User not found with email {0}")]
    UserNotFound(String),
    #[error("User role `{role}` not authorized to approve/reject a purchase request in status {status}")]
    NotAuthorized { role: String, status: RequestStatus },
    #[error("Purchase Request is already received and cannot be approved or rejected")]
    AlreadyReceived,
    #[error("Purchase Request is already rejected and cannot be approved or rejected")]
    AlreadyRejected,
    #[error("Purchase Request {0} was modified concurrently, reload and retry")]
    ConcurrentModification(String),
    #[error("Purchase Request code {0} is already assigned")]
    DuplicateCode(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("audit entry at {attempted} precedes the last recorded entry at {last}")]
    AuditOutOfOrder { last: String, attempted: String },
    #[error("approval history of {request_id} failed verification: {source}")]
    Integrity {
        request_id: String,
        source: ChainError,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode record: {0}")]
    Codec(String),
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Purchase Request must contain at least one item")]
    NoItems,
    #[error("Purchase Request is missing a department")]
    MissingDepartment,
    #[error("Purchase Request is missing a date")]
    MissingDate,
    #[error("Purchase Request is missing a reason")]
    MissingReason,
    #[error("item {index} is invalid: {reason}")]
    InvalidItem { index: usize, reason: &'static str },
    #[error("date {0} is outside the supported range")]
    DateOutOfRange(String),
    #[error("page size must be greater than zero")]
    EmptyPage,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestNotFound(_) | Self::DepartmentNotFound(_) | Self::UserNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            Self::AlreadyReceived
            | Self::AlreadyRejected
            | Self::ConcurrentModification(_)
            | Self::DuplicateCode(_) => ErrorKind::Conflict,
            Self::Validation(_) | Self::AuditOutOfOrder { .. } => ErrorKind::Validation,
            Self::Integrity { .. } | Self::Storage(_) | Self::Codec(_) | Self::Collaborator(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
