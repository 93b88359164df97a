//! The purchase request aggregate and its drafts
use super::error::{Result, ValidationError, WorkflowError};
use super::status::RequestStatus;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Whether the nanosecond encoding can hold this instant, roughly the
    /// years 1677 to 2262.
    pub fn is_encodable(&self) -> bool {
        self.0.timestamp_nanos_opt().is_some()
    }
}

fn check_encodable(date: &TimeStamp<Utc>) -> std::result::Result<(), ValidationError> {
    if date.is_encodable() {
        Ok(())
    } else {
        Err(ValidationError::DateOutOfRange(date.to_string()))
    }
}

// ordered by instant, Utc has no ordering of its own
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _: &mut C,
    ) -> std::result::Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum EventType {
    #[n(0)]
    Created,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    Edited,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Approved => "APPROVED",
            EventType::Rejected => "REJECTED",
            EventType::Edited => "EDITED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line of the request. Amounts are integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RequestItem {
    #[n(0)]
    pub request_id: String,
    #[n(1)]
    pub number: Option<String>,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub unit_price: u64,
    #[n(5)]
    pub estimated_value: u64,
    #[n(6)]
    pub reference: Option<String>,
    #[n(7)]
    pub date: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct ApprovalHistoryEntry {
    #[n(0)]
    pub seq: u64,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub status: RequestStatus,
    #[n(4)]
    pub user_id: u64,
    #[n(5)]
    pub signature: String,
    #[n(6)]
    pub chain_digest: String, // sha256 over the previous digest and this entry
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct TimelineEvent {
    #[n(0)]
    pub seq: u64,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub event_type: EventType,
    #[n(4)]
    pub description: String,
    #[n(5)]
    pub user_id: Option<u64>, // None for system generated events
}

impl ApprovalHistoryEntry {
    /// An unsealed entry. Sequence number and digest are assigned on append.
    pub fn new(
        request_id: String,
        timestamp: TimeStamp<Utc>,
        status: RequestStatus,
        user_id: u64,
        signature: String,
    ) -> Self {
        Self {
            seq: 0,
            request_id,
            timestamp,
            status,
            user_id,
            signature,
            chain_digest: String::new(),
        }
    }

    pub(crate) fn digest_after(&self, prev: &str) -> Result<String> {
        let link = (
            prev,
            self.seq,
            &self.timestamp,
            self.status,
            self.user_id,
            self.signature.as_str(),
        );
        let cbor = minicbor::to_vec(link).map_err(WorkflowError::codec)?;
        Ok(sha256::digest(&cbor))
    }
}

impl TimelineEvent {
    pub fn new(
        request_id: String,
        timestamp: TimeStamp<Utc>,
        event_type: EventType,
        description: String,
        user_id: Option<u64>,
    ) -> Self {
        Self {
            seq: 0,
            request_id,
            timestamp,
            event_type,
            description,
            user_id,
        }
    }
}

// used for constructing items before they belong to a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDraft {
    number: Option<String>,
    description: String,
    quantity: u32,
    unit_price: u64,
    estimated_value: Option<u64>,
    reference: Option<String>,
    date: Option<TimeStamp<Utc>>,
}

impl ItemDraft {
    pub fn new(description: &str, quantity: u32, unit_price: u64) -> Self {
        Self {
            description: description.to_string(),
            quantity,
            unit_price,
            ..Self::default()
        }
    }
    pub fn set_number(mut self, number: &str) -> Self {
        self.number = Some(number.to_string());
        self
    }
    pub fn set_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
    pub fn set_estimated_value(mut self, value: u64) -> Self {
        self.estimated_value = Some(value);
        self
    }
    pub fn set_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    fn validate(&self, index: usize) -> std::result::Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::InvalidItem {
                index,
                reason: "description is empty",
            });
        }
        if self.quantity == 0 {
            return Err(ValidationError::InvalidItem {
                index,
                reason: "quantity is zero",
            });
        }
        self.date.as_ref().map_or(Ok(()), check_encodable)
    }

    fn into_item(self, request_id: &str) -> RequestItem {
        let estimated_value = self
            .estimated_value
            .unwrap_or_else(|| self.unit_price.saturating_mul(u64::from(self.quantity)));
        RequestItem {
            request_id: request_id.to_string(),
            number: self.number,
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            estimated_value,
            reference: self.reference,
            date: self.date,
        }
    }
}

/// Caller supplied fields for creating or editing a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDraft {
    department_id: Option<u64>,
    reason: String,
    date: Option<TimeStamp<Utc>>,
    items: Vec<ItemDraft>,
}

impl RequestDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_department(mut self, department_id: u64) -> Self {
        self.department_id = Some(department_id);
        self
    }
    pub fn set_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }
    pub fn set_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.date = Some(date);
        self
    }
    pub fn add_item(mut self, item: ItemDraft) -> Self {
        self.items.push(item);
        self
    }
    pub fn department_id(&self) -> Option<u64> {
        self.department_id
    }

    /// Checks everything a new request needs, including a department.
    pub fn validate_for_create(&self) -> std::result::Result<(), ValidationError> {
        if self.department_id.is_none() {
            return Err(ValidationError::MissingDepartment);
        }
        self.validate_for_edit()
    }

    /// Edits may leave the department out, which keeps the current one.
    pub fn validate_for_edit(&self) -> std::result::Result<(), ValidationError> {
        if self.reason.trim().is_empty() {
            return Err(ValidationError::MissingReason);
        }
        let date = self.date.as_ref().ok_or(ValidationError::MissingDate)?;
        check_encodable(date)?;
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        self.items
            .iter()
            .enumerate()
            .try_for_each(|(index, item)| item.validate(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PurchaseRequest {
    #[n(0)]
    id: String, // uuid7, bech32 encoded
    #[n(1)]
    code: String,
    #[n(2)]
    department_id: u64,
    #[n(3)]
    reason: String,
    #[n(4)]
    date: TimeStamp<Utc>,
    #[n(5)]
    status: RequestStatus,
    #[n(6)]
    items: Vec<RequestItem>,
    #[n(7)]
    approval_history: Vec<ApprovalHistoryEntry>,
    #[n(8)]
    timeline: Vec<TimelineEvent>,
    #[n(9)]
    version: u64,
    #[n(10)]
    ordinal: u64,
}

impl PurchaseRequest {
    /// Builds a request in INITIATED from a draft that passed
    /// [`RequestDraft::validate_for_create`]. Audit trails start empty.
    pub fn new(id: String, code: String, draft: RequestDraft) -> Result<Self> {
        draft.validate_for_create()?;
        let department_id = draft.department_id.ok_or(ValidationError::MissingDepartment)?;
        let date = draft.date.ok_or(ValidationError::MissingDate)?;
        let items = draft
            .items
            .into_iter()
            .map(|item| item.into_item(&id))
            .collect();

        Ok(Self {
            id,
            code,
            department_id,
            reason: draft.reason,
            date,
            status: RequestStatus::Initiated,
            items,
            approval_history: vec![],
            timeline: vec![],
            version: 0,
            ordinal: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn code(&self) -> &str {
        &self.code
    }
    pub fn department_id(&self) -> u64 {
        self.department_id
    }
    pub fn reason(&self) -> &str {
        &self.reason
    }
    pub fn date(&self) -> &TimeStamp<Utc> {
        &self.date
    }
    pub fn status(&self) -> RequestStatus {
        self.status
    }
    pub fn items(&self) -> &[RequestItem] {
        &self.items
    }
    pub fn approval_history(&self) -> &[ApprovalHistoryEntry] {
        &self.approval_history
    }
    pub fn timeline(&self) -> &[TimelineEvent] {
        &self.timeline
    }
    pub fn version(&self) -> u64 {
        self.version
    }
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// A timestamp for the next audit entry, never earlier than what is
    /// already recorded.
    pub fn next_timestamp(&self) -> TimeStamp<Utc> {
        let now = TimeStamp::new();
        match self.last_recorded() {
            Some(last) if *last > now => last.clone(),
            _ => now,
        }
    }

    fn last_recorded(&self) -> Option<&TimeStamp<Utc>> {
        let history = self.approval_history.last().map(|e| &e.timestamp);
        let timeline = self.timeline.last().map(|e| &e.timestamp);
        history.max(timeline)
    }

    /// Seals and appends a history entry. Fails if it predates the last one.
    pub fn append_history(&mut self, mut entry: ApprovalHistoryEntry) -> Result<()> {
        check_order(self.approval_history.last().map(|e| &e.timestamp), &entry.timestamp)?;

        let prev = self
            .approval_history
            .last()
            .map(|e| e.chain_digest.as_str())
            .unwrap_or_default();
        entry.seq = self.approval_history.len() as u64 + 1;
        entry.request_id = self.id.clone();
        entry.chain_digest = entry.digest_after(prev)?;

        self.approval_history.push(entry);
        Ok(())
    }

    /// Appends a timeline event. Fails if it predates the last one.
    pub fn append_timeline(&mut self, mut event: TimelineEvent) -> Result<()> {
        check_order(self.timeline.last().map(|e| &e.timestamp), &event.timestamp)?;

        event.seq = self.timeline.len() as u64 + 1;
        event.request_id = self.id.clone();

        self.timeline.push(event);
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    /// Wholesale replacement used by the edit flow. Status and audit trails
    /// are left alone.
    pub(crate) fn replace_contents(&mut self, draft: RequestDraft) -> Result<()> {
        draft.validate_for_edit()?;
        if let Some(department_id) = draft.department_id {
            self.department_id = department_id;
        }
        self.reason = draft.reason;
        self.date = draft.date.ok_or(ValidationError::MissingDate)?;
        let id = self.id.clone();
        self.items = draft
            .items
            .into_iter()
            .map(|item| item.into_item(&id))
            .collect();
        Ok(())
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    pub(crate) fn assign_ordinal(&mut self, ordinal: u64) {
        self.ordinal = ordinal;
    }

    #[cfg(test)]
    pub(crate) fn approval_history_mut_for_test(&mut self) -> &mut Vec<ApprovalHistoryEntry> {
        &mut self.approval_history
    }
}

fn check_order(last: Option<&TimeStamp<Utc>>, attempted: &TimeStamp<Utc>) -> Result<()> {
    match last {
        Some(last) if attempted < last => Err(WorkflowError::AuditOutOfOrder {
            last: last.to_string(),
            attempted: attempted.to_string(),
        }),
        _ => Ok(()),
    }
}
