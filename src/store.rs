//! sled persistence for purchase requests
use super::directory::CodeGenerator;
use super::error::{Result, WorkflowError};
use super::request::PurchaseRequest;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

const REQUESTS: &str = "requests";
const CODES: &str = "request_codes";
const ORDER: &str = "request_order";
const SEQUENCES: &str = "sequences";

/// Reasons a store transaction aborts on its own accord.
#[derive(Debug)]
enum Abort {
    DuplicateCode(String),
    StaleVersion(String),
    Missing(String),
    Codec(String),
}

impl From<Abort> for WorkflowError {
    fn from(abort: Abort) -> Self {
        match abort {
            Abort::DuplicateCode(code) => WorkflowError::DuplicateCode(code),
            Abort::StaleVersion(id) => WorkflowError::ConcurrentModification(id),
            Abort::Missing(id) => WorkflowError::RequestNotFound(id),
            Abort::Codec(msg) => WorkflowError::Codec(msg),
        }
    }
}

fn from_transaction(err: TransactionError<Abort>) -> WorkflowError {
    match err {
        TransactionError::Abort(abort) => abort.into(),
        TransactionError::Storage(err) => WorkflowError::Storage(err),
    }
}

/// Outcome of a version checked commit.
#[derive(Debug, PartialEq, Eq)]
pub enum Commit {
    Applied,
    Stale,
}

/// A page of requests in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct RequestStore {
    db: Arc<Db>,
    requests: Tree,
    codes: Tree,
    order: Tree,
}

impl RequestStore {
    pub fn new(db: Arc<Db>) -> Result<Self> {
        Ok(Self {
            requests: db.open_tree(REQUESTS)?,
            codes: db.open_tree(CODES)?,
            order: db.open_tree(ORDER)?,
            db,
        })
    }

    fn decode(bytes: &[u8]) -> Result<PurchaseRequest> {
        minicbor::decode(bytes).map_err(WorkflowError::codec)
    }

    fn encode(request: &PurchaseRequest) -> Result<Vec<u8>> {
        minicbor::to_vec(request).map_err(WorkflowError::codec)
    }

    /// Stores a new request together with its code and order index.
    pub fn insert_new(&self, request: &mut PurchaseRequest) -> Result<()> {
        let ordinal = self.db.generate_id()?;
        request.assign_ordinal(ordinal);
        let bytes = Self::encode(request)?;
        let id = request.id().as_bytes();
        let code = request.code();

        (&self.requests, &self.codes, &self.order)
            .transaction(|(requests, codes, order)| {
                if codes.get(code)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(Abort::DuplicateCode(
                        code.to_string(),
                    )));
                }
                requests.insert(id, bytes.as_slice())?;
                codes.insert(code, id)?;
                order.insert(&ordinal.to_be_bytes()[..], id)?;
                Ok(())
            })
            .map_err(from_transaction)?;

        self.db.flush()?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<PurchaseRequest> {
        match self.requests.get(id)? {
            Some(bytes) => Self::decode(&bytes),
            None => Err(WorkflowError::RequestNotFound(id.to_string())),
        }
    }

    pub fn find_by_code(&self, code: &str) -> Result<Option<PurchaseRequest>> {
        match self.codes.get(code)? {
            Some(id) => {
                let id = String::from_utf8_lossy(&id).into_owned();
                self.load(&id).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Writes `request` only if the stored copy is still at
    /// `expected_version`. The caller bumps the version beforehand.
    pub fn commit(&self, request: &PurchaseRequest, expected_version: u64) -> Result<Commit> {
        let bytes = Self::encode(request)?;
        let id = request.id();

        let outcome = self.requests.transaction(|requests| {
            let current = requests
                .get(id)?
                .ok_or_else(|| ConflictableTransactionError::Abort(Abort::Missing(id.to_string())))?;
            let current: PurchaseRequest = minicbor::decode(&current)
                .map_err(|e| ConflictableTransactionError::Abort(Abort::Codec(e.to_string())))?;
            if current.version() != expected_version {
                return Err(ConflictableTransactionError::Abort(Abort::StaleVersion(
                    id.to_string(),
                )));
            }
            requests.insert(id.as_bytes(), bytes.as_slice())?;
            Ok(())
        });

        match outcome {
            Ok(()) => {
                self.db.flush()?;
                Ok(Commit::Applied)
            }
            Err(TransactionError::Abort(Abort::StaleVersion(_))) => Ok(Commit::Stale),
            Err(err) => Err(from_transaction(err)),
        }
    }

    /// Removes a request and its indexes. Administrative only.
    pub fn delete(&self, id: &str) -> Result<()> {
        let request = self.load(id)?;
        let ordinal = request.ordinal().to_be_bytes();
        let code = request.code();

        (&self.requests, &self.codes, &self.order)
            .transaction(|(requests, codes, order)| {
                if requests.remove(id.as_bytes())?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Abort::Missing(
                        id.to_string(),
                    )));
                }
                codes.remove(code.as_bytes())?;
                order.remove(&ordinal[..])?;
                Ok(())
            })
            .map_err(from_transaction)?;

        self.db.flush()?;
        Ok(())
    }

    /// Zero based page of requests in creation order.
    pub fn list(&self, page: usize, size: usize) -> Result<Page<PurchaseRequest>> {
        let total = self.order.len();
        let mut items = Vec::with_capacity(size);
        for entry in self.order.iter().skip(page.saturating_mul(size)).take(size) {
            let (_, id) = entry?;
            if let Some(bytes) = self.requests.get(&id)? {
                items.push(Self::decode(&bytes)?);
            }
        }
        Ok(Page {
            items,
            page,
            size,
            total,
        })
    }
}

/// Per-scope sequences kept in their own tree.
#[derive(Clone)]
pub struct SledSequences {
    sequences: Tree,
}

impl SledSequences {
    pub fn new(db: &Db) -> anyhow::Result<Self> {
        Ok(Self {
            sequences: db.open_tree(SEQUENCES)?,
        })
    }
}

fn increment(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let current = old
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0);
    Some((current + 1).to_be_bytes().to_vec())
}

impl CodeGenerator for SledSequences {
    fn next_sequence(&self, scope: &str) -> anyhow::Result<u64> {
        let updated = self
            .sequences
            .update_and_fetch(scope, increment)?
            .ok_or_else(|| anyhow::anyhow!("sequence {scope} vanished during update"))?;
        let bytes = <[u8; 8]>::try_from(updated.as_ref())?;
        Ok(u64::from_be_bytes(bytes))
    }
}
