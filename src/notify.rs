//! Best-effort notification of the next approvers
use super::directory::{DepartmentDirectory, Notifier, User, UserDirectory};
use super::request::PurchaseRequest;
use super::status::RequestStatus;
use std::sync::Arc;

/// What a dispatch attempted. Failures are counted, never raised.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: Vec<String>,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    departments: Arc<dyn DepartmentDirectory>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(
        departments: Arc<dyn DepartmentDirectory>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            departments,
            users,
            notifier,
        }
    }

    /// Users who should act on `request` now that it sits in `status`.
    pub fn recipients(
        &self,
        request: &PurchaseRequest,
        status: RequestStatus,
        actor: &User,
    ) -> anyhow::Result<Vec<User>> {
        let roles = status.roles();
        if status.is_terminal() || roles.is_empty() {
            return Ok(vec![]);
        }

        let department = self
            .departments
            .find_department(request.department_id())?
            .ok_or_else(|| anyhow::anyhow!("department {} not found", request.department_id()))?;

        let users = self.users.find_users_by_department_stations_roles(
            department.id,
            &actor.station_ids,
            roles,
        )?;
        Ok(users
            .into_iter()
            .filter(|u| !u.email.trim().is_empty())
            .collect())
    }

    /// Notifies every recipient for `status`. Must only be called once the
    /// transition into `status` is committed.
    pub fn dispatch(
        &self,
        request: &PurchaseRequest,
        status: RequestStatus,
        actor: &User,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        let recipients = match self.recipients(request, status, actor) {
            Ok(recipients) => recipients,
            Err(err) => {
                tracing::warn!(
                    request_id = request.id(),
                    code = request.code(),
                    %status,
                    error = %err,
                    "could not resolve next approvers"
                );
                return report;
            }
        };

        let subject = format!("Purchase Request {} Update", request.code());
        let body = format!(
            "Purchase Request {} is assigned to you and waiting for your approval",
            request.code()
        );

        for user in recipients {
            match self.notifier.notify(&user.email, &subject, &body) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        code = request.code(),
                        address = %user.email,
                        error = %err,
                        "failed to notify approver"
                    );
                }
            }
            report.recipients.push(user.email);
        }

        tracing::debug!(
            code = request.code(),
            %status,
            sent = report.sent,
            failed = report.failed,
            "dispatched approver notifications"
        );
        report
    }
}
