//! The approval chain.
//!
//! Every stage a purchase request can occupy is listed once in [`STAGES`],
//! together with the roles allowed to act on it and the stage an approval
//! moves it to. Everything else in the crate asks this table rather than
//! branching on statuses itself.

use std::fmt;
use std::str::FromStr;

pub const HEAD_OF_DEPARTMENT: &str = "HEAD_OF_DEPARTMENT";
pub const FINANCE_MANAGER: &str = "FINANCE_MANAGER";
pub const PROCUREMENT_OFFICER: &str = "PROCUREMENT_OFFICER";
pub const STORES_OFFICER: &str = "STORES_OFFICER";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, minicbor::Encode, minicbor::Decode,
)]
#[cbor(index_only)]
pub enum RequestStatus {
    #[n(0)]
    Initiated,
    #[n(1)]
    HodApproved,
    #[n(2)]
    FinanceApproved,
    #[n(3)]
    Ordered,
    #[n(4)]
    Received,
    #[n(5)]
    Rejected,
}

/// One row of the approval chain.
#[derive(Debug)]
pub struct Stage {
    pub status: RequestStatus,
    pub name: &'static str,
    pub roles: &'static [&'static str],
    pub next: Option<RequestStatus>,
}

pub static STAGES: [Stage; 6] = [
    Stage {
        status: RequestStatus::Initiated,
        name: "INITIATED",
        roles: &[HEAD_OF_DEPARTMENT],
        next: Some(RequestStatus::HodApproved),
    },
    Stage {
        status: RequestStatus::HodApproved,
        name: "HOD_APPROVED",
        roles: &[FINANCE_MANAGER],
        next: Some(RequestStatus::FinanceApproved),
    },
    Stage {
        status: RequestStatus::FinanceApproved,
        name: "FINANCE_APPROVED",
        roles: &[PROCUREMENT_OFFICER],
        next: Some(RequestStatus::Ordered),
    },
    Stage {
        status: RequestStatus::Ordered,
        name: "ORDERED",
        roles: &[STORES_OFFICER],
        next: Some(RequestStatus::Received),
    },
    Stage {
        status: RequestStatus::Received,
        name: "RECEIVED",
        roles: &[],
        next: None,
    },
    Stage {
        status: RequestStatus::Rejected,
        name: "REJECTED",
        roles: &[],
        next: None,
    },
];

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Initiated,
        RequestStatus::HodApproved,
        RequestStatus::FinanceApproved,
        RequestStatus::Ordered,
        RequestStatus::Received,
        RequestStatus::Rejected,
    ];

    pub fn stage(self) -> &'static Stage {
        // STAGES is laid out in discriminant order
        &STAGES[self as usize]
    }

    /// Roles allowed to approve or reject while a request sits in this status.
    /// Empty for terminal statuses.
    pub fn roles(self) -> &'static [&'static str] {
        self.stage().roles
    }

    /// The status an authorized approval moves to. `None` once terminal.
    pub fn next_on_approval(self) -> Option<RequestStatus> {
        self.stage().next
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Received | RequestStatus::Rejected)
    }

    pub fn permits(self, role: &str) -> bool {
        self.roles().iter().any(|r| *r == role)
    }

    /// Position along the forward chain. REJECTED sits outside it.
    pub fn rank(self) -> Option<usize> {
        match self {
            RequestStatus::Rejected => None,
            status => Some(status as usize),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.stage().name
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown purchase request status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_uppercase();
        STAGES
            .iter()
            .find(|stage| stage.name == wanted)
            .map(|stage| stage.status)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}
