//! The store capability set consumed by the mapper.

use uuid::Uuid;

use crate::statement::{Statement, StatementResult};

/// Errors reported by a graph store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store query error: {0}")]
    Query(String),

    #[error("Node not found: {0}")]
    NodeNotFound(i64),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TxId),

    #[error("Commit conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Identifier of an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A graph store.
///
/// All calls block until the store answers. Implementations must be safe to
/// share between threads; isolation between callers is whatever the store
/// itself provides.
pub trait GraphStore: Send + Sync {
    /// Execute a batch of statements, returning one result per statement.
    ///
    /// A batch is atomic: on error no statement of the batch takes effect.
    /// With `tx = None` the batch commits on its own; otherwise it runs
    /// inside the given open transaction and is only visible to that
    /// transaction until commit.
    fn execute(
        &self,
        tx: Option<TxId>,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>, StoreError>;

    /// Delete all nodes and relationships.
    fn clear(&self) -> Result<(), StoreError>;

    /// Open a new transaction.
    fn begin(&self) -> Result<TxId, StoreError>;

    /// Commit an open transaction.
    fn commit(&self, tx: TxId) -> Result<(), StoreError>;

    /// Discard an open transaction.
    fn rollback(&self, tx: TxId) -> Result<(), StoreError>;
}
