//! Collaborators the workflow consumes but does not own.
//!
//! Departments, users and message delivery live in other systems. The
//! workflow reaches them through the traits below; [`InMemoryDirectory`] and
//! [`LogNotifier`] are simple implementations for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub id: u64,
    pub name: String,
}

/// A user as the directory knows them, or as an authenticated caller
/// presents themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub department_ids: Vec<u64>,
    pub station_ids: Vec<u64>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

pub trait DepartmentDirectory: Send + Sync {
    fn find_department(&self, id: u64) -> anyhow::Result<Option<Department>>;
}

pub trait UserDirectory: Send + Sync {
    fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Users in `department_id` assigned to any of `station_ids` and holding
    /// any of `roles`.
    fn find_users_by_department_stations_roles(
        &self,
        department_id: u64,
        station_ids: &[u64],
        roles: &[&str],
    ) -> anyhow::Result<Vec<User>>;
}

/// Monotonic sequence numbers, one counter per scope key.
pub trait CodeGenerator: Send + Sync {
    fn next_sequence(&self, scope: &str) -> anyhow::Result<u64>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, address: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    departments: RwLock<HashMap<u64, Department>>,
    users: RwLock<Vec<User>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_department(&self, id: u64, name: &str) -> anyhow::Result<()> {
        let mut departments = self
            .departments
            .write()
            .map_err(|_| anyhow::anyhow!("department directory lock poisoned"))?;
        departments.insert(
            id,
            Department {
                id,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn add_user(&self, user: User) -> anyhow::Result<()> {
        let mut users = self
            .users
            .write()
            .map_err(|_| anyhow::anyhow!("user directory lock poisoned"))?;
        users.retain(|u| u.email != user.email);
        users.push(user);
        Ok(())
    }
}

impl DepartmentDirectory for InMemoryDirectory {
    fn find_department(&self, id: u64) -> anyhow::Result<Option<Department>> {
        let departments = self
            .departments
            .read()
            .map_err(|_| anyhow::anyhow!("department directory lock poisoned"))?;
        Ok(departments.get(&id).cloned())
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("user directory lock poisoned"))?;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    fn find_users_by_department_stations_roles(
        &self,
        department_id: u64,
        station_ids: &[u64],
        roles: &[&str],
    ) -> anyhow::Result<Vec<User>> {
        let users = self
            .users
            .read()
            .map_err(|_| anyhow::anyhow!("user directory lock poisoned"))?;
        Ok(users
            .iter()
            .filter(|u| u.department_ids.contains(&department_id))
            .filter(|u| u.station_ids.iter().any(|s| station_ids.contains(s)))
            .filter(|u| roles.contains(&u.role.as_str()))
            .cloned()
            .collect())
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, address: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(%address, %subject, %body, "notification");
        Ok(())
    }
}
