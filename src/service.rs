//! Service layer API for purchase request workflow operations
use super::audit::{self, ChainError};
use super::config::{CodeConfig, WorkflowConfig};
use super::directory::{CodeGenerator, Department, DepartmentDirectory, Notifier, User, UserDirectory};
use super::engine::{self, Decision};
use super::error::{Result, ValidationError, WorkflowError};
use super::notify::NotificationDispatcher;
use super::request::{ApprovalHistoryEntry, EventType, PurchaseRequest, RequestDraft, TimelineEvent};
use super::status::RequestStatus;
use super::store::{Commit, Page, RequestStore, SledSequences};
use super::utils::{REQUEST_HRP, department_prefix, new_uuid_to_bech32};
use std::sync::Arc;

/// The external systems a service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub departments: Arc<dyn DepartmentDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub codes: Arc<dyn CodeGenerator>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct PurchaseRequestService {
    store: RequestStore,
    departments: Arc<dyn DepartmentDirectory>,
    users: Arc<dyn UserDirectory>,
    codes: Arc<dyn CodeGenerator>,
    dispatcher: NotificationDispatcher,
    code_config: CodeConfig,
    max_commit_retries: u32,
}

impl PurchaseRequestService {
    pub fn new(
        instance: Arc<sled::Db>,
        collaborators: Collaborators,
        config: &WorkflowConfig,
    ) -> Result<Self> {
        let dispatcher = NotificationDispatcher::new(
            collaborators.departments.clone(),
            collaborators.users.clone(),
            collaborators.notifier,
        );
        Ok(Self {
            store: RequestStore::new(instance)?,
            departments: collaborators.departments,
            users: collaborators.users,
            codes: collaborators.codes,
            dispatcher,
            code_config: config.codes.clone(),
            max_commit_retries: config.concurrency.max_commit_retries.max(1),
        })
    }

    /// Opens the database named in `config` and keeps code sequences in it.
    pub fn open(
        config: &WorkflowConfig,
        departments: Arc<dyn DepartmentDirectory>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let db = Arc::new(sled::open(&config.storage.path)?);
        let codes = Arc::new(SledSequences::new(&db)?);
        Self::new(
            db,
            Collaborators {
                departments,
                users,
                codes,
                notifier,
            },
            config,
        )
    }

    /// The directory record behind an acting identity.
    fn resolve_user(&self, identity: &User) -> Result<User> {
        self.users
            .find_user_by_email(&identity.email)?
            .ok_or_else(|| WorkflowError::UserNotFound(identity.email.clone()))
    }

    fn find_department(&self, id: u64) -> Result<Department> {
        self.departments
            .find_department(id)?
            .ok_or(WorkflowError::DepartmentNotFound(id))
    }

    fn generate_code(&self, department: &Department) -> Result<String> {
        let prefix = department_prefix(&department.name);
        let scope = format!("{}-{}", self.code_config.scope, prefix);
        let sequence = self.codes.next_sequence(&scope)?;
        Ok(format!("{}-{}-{}", self.code_config.prefix, prefix, sequence))
    }

    /// Submit a new purchase request. It starts in INITIATED and the heads
    /// of department sharing a station with the creator are notified.
    pub fn create(
        &self,
        creator: &User,
        signature: &str,
        draft: RequestDraft,
    ) -> Result<PurchaseRequest> {
        draft.validate_for_create()?;
        let department_id = draft
            .department_id()
            .ok_or(ValidationError::MissingDepartment)?;
        let department = self.find_department(department_id)?;
        let actor = self.resolve_user(creator)?;

        let code = self.generate_code(&department)?;
        let id = new_uuid_to_bech32(REQUEST_HRP)?;
        let mut request = PurchaseRequest::new(id, code, draft)?;
        audit::record_creation(&mut request, &actor, signature)?;

        self.store.insert_new(&mut request)?;
        tracing::info!(
            request_id = request.id(),
            code = request.code(),
            department = %department.name,
            user_id = actor.id,
            "purchase request created"
        );

        self.dispatcher
            .dispatch(&request, RequestStatus::Initiated, &actor);
        Ok(request)
    }

    pub fn get(&self, request_id: &str) -> Result<PurchaseRequest> {
        self.store.load(request_id)
    }

    pub fn find_by_code(&self, code: &str) -> Result<Option<PurchaseRequest>> {
        self.store.find_by_code(code)
    }

    /// Zero based page of requests in creation order.
    pub fn list(&self, page: usize, size: usize) -> Result<Page<PurchaseRequest>> {
        if size == 0 {
            return Err(ValidationError::EmptyPage.into());
        }
        self.store.list(page, size)
    }

    /// Approval history in insertion order.
    pub fn history(&self, request_id: &str) -> Result<Vec<ApprovalHistoryEntry>> {
        Ok(self.store.load(request_id)?.approval_history().to_vec())
    }

    /// Timeline in insertion order.
    pub fn timeline(&self, request_id: &str) -> Result<Vec<TimelineEvent>> {
        Ok(self.store.load(request_id)?.timeline().to_vec())
    }

    /// Re-checks the digest chain of a stored request's history.
    pub fn verify_history(&self, request_id: &str) -> Result<()> {
        let request = self.store.load(request_id)?;
        audit::verify_history(&request).map_err(|err: ChainError| WorkflowError::Integrity {
            request_id: request_id.to_string(),
            source: err,
        })
    }

    /// Approve or reject a request on behalf of `identity`, acting under
    /// `identity.role`. Next approvers are notified once the transition is
    /// committed.
    pub fn decide(
        &self,
        request_id: &str,
        identity: &User,
        decision: &Decision,
    ) -> Result<PurchaseRequest> {
        let actor = self.resolve_user(identity)?;
        let role = identity.role.as_str();

        let (request, transition) = self.apply(request_id, true, |request| {
            engine::decide(request, &actor, role, decision)
        })?;

        tracing::info!(
            request_id = request.id(),
            code = request.code(),
            from = %transition.from,
            to = %transition.to,
            %role,
            user_id = actor.id,
            "purchase request {}",
            transition.event_type
        );

        self.dispatcher.dispatch(&request, transition.to, &actor);
        Ok(request)
    }

    /// Replace reason, date, items and optionally department of an open
    /// request. Status and approval history are untouched.
    pub fn edit(
        &self,
        editor: &User,
        request_id: &str,
        draft: RequestDraft,
    ) -> Result<PurchaseRequest> {
        draft.validate_for_edit()?;
        if let Some(department_id) = draft.department_id() {
            self.find_department(department_id)?;
        }
        let actor = self.resolve_user(editor)?;

        let (request, ()) = self.apply(request_id, false, |request| {
            match request.status() {
                RequestStatus::Received => return Err(WorkflowError::AlreadyReceived),
                RequestStatus::Rejected => return Err(WorkflowError::AlreadyRejected),
                _ => {}
            }
            request.replace_contents(draft.clone())?;
            let description = format!("Purchase request edited by user: {}", actor.full_name());
            audit::record_event(request, EventType::Edited, Some(&actor), description)
        })?;

        tracing::info!(
            request_id = request.id(),
            code = request.code(),
            user_id = actor.id,
            "purchase request edited"
        );
        Ok(request)
    }

    /// Administrative removal. The workflow itself never deletes.
    pub fn delete(&self, request_id: &str) -> Result<()> {
        self.store.delete(request_id)?;
        tracing::info!(request_id, "purchase request deleted");
        Ok(())
    }

    /// Load, mutate and commit under a version check, retrying on stale
    /// commits. With `pin_status` a retry that finds the status moved fails
    /// instead of re-running `op` against the new stage.
    fn apply<T>(
        &self,
        request_id: &str,
        pin_status: bool,
        mut op: impl FnMut(&mut PurchaseRequest) -> Result<T>,
    ) -> Result<(PurchaseRequest, T)> {
        let mut observed: Option<RequestStatus> = None;

        for attempt in 1..=self.max_commit_retries {
            let mut request = self.store.load(request_id)?;
            if let Some(status) = observed {
                if pin_status && request.status() != status {
                    return Err(WorkflowError::ConcurrentModification(request_id.to_string()));
                }
            }
            observed = Some(request.status());

            let expected_version = request.version();
            let output = op(&mut request)?;
            request.bump_version();

            match self.store.commit(&request, expected_version)? {
                Commit::Applied => return Ok((request, output)),
                Commit::Stale => {
                    tracing::debug!(request_id, attempt, "stale purchase request, reloading");
                }
            }
        }

        Err(WorkflowError::ConcurrentModification(request_id.to_string()))
    }
}
