//! Store connections and the transaction manager.

use std::sync::{Arc, Weak};

use ogm_core::config::{OgmConfig, StoreBackend};
use ogm_graph::{
    GraphConfig, GraphStore, MemoryStore, Neo4jStore, Statement, StatementResult, TxId,
};
use parking_lot::Mutex;

use crate::error::{DomainError, Result};

/// Notified when a transaction on a connection ends.
pub(crate) trait TxListener: Send + Sync {
    fn transaction_closed(&self, tx: TxId, committed: bool);
}

struct OpenTx {
    id: TxId,
    failed: bool,
}

#[derive(Default)]
struct TxSlot {
    open: Option<OpenTx>,
    listeners: Vec<Weak<dyn TxListener>>,
}

/// A handle to one graph store.
///
/// Clones share the store and the transaction slot: a connection has at
/// most one open transaction at a time, and every mutation issued through
/// the connection while it is open joins it. Independent connections to the
/// same store (see [`Connection::share`]) have independent slots.
#[derive(Clone)]
pub struct Connection {
    store: Arc<dyn GraphStore>,
    slot: Arc<Mutex<TxSlot>>,
}

impl Connection {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(TxSlot::default())),
        }
    }

    /// A connection to a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Connect to the store backend selected in the configuration.
    pub fn from_config(config: &OgmConfig) -> Result<Self> {
        match config.store.backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory store");
                Ok(Self::in_memory())
            }
            StoreBackend::Neo4j => {
                let settings = &config.store.neo4j;
                let graph_config = GraphConfig {
                    uri: settings.uri.clone(),
                    user: settings.user.clone(),
                    password: settings.password.clone(),
                    max_connections: settings.max_connections,
                    fetch_size: settings.fetch_size,
                };
                let store = Neo4jStore::connect(&graph_config)?;
                Ok(Self::new(Arc::new(store)))
            }
        }
    }

    /// A new connection to the same store with its own transaction slot.
    pub fn share(&self) -> Self {
        Self::new(Arc::clone(&self.store))
    }

    /// Delete all data in the store.
    pub fn clear_database(&self) -> Result<()> {
        self.store.clear()?;
        tracing::info!("Database cleared");
        Ok(())
    }

    /// Open a transaction. Fails if one is already open on this connection.
    pub fn begin_tx(&self) -> Result<Transaction> {
        let mut slot = self.slot.lock();
        if let Some(open) = &slot.open {
            return Err(DomainError::TransactionState(format!(
                "transaction {} is already open on this connection",
                open.id
            )));
        }
        let id = self.store.begin()?;
        slot.open = Some(OpenTx { id, failed: false });
        tracing::info!(tx = %id, "Transaction opened");
        Ok(Transaction {
            conn: self.clone(),
            id,
            closed: false,
        })
    }

    /// The transaction currently open on this connection, if any.
    pub fn current_tx(&self) -> Option<TxId> {
        self.slot.lock().open.as_ref().map(|o| o.id)
    }

    pub(crate) fn register_listener(&self, listener: Weak<dyn TxListener>) {
        let mut slot = self.slot.lock();
        slot.listeners.retain(|l| l.strong_count() > 0);
        slot.listeners.push(listener);
    }

    /// Run a batch inside the open transaction, or on its own.
    pub(crate) fn execute(&self, statements: &[Statement]) -> Result<Vec<StatementResult>> {
        let tx = self.current_tx();
        Ok(self.store.execute(tx, statements)?)
    }

    /// Run a single statement.
    pub(crate) fn execute_one(&self, statement: Statement) -> Result<StatementResult> {
        let mut results = self.execute(std::slice::from_ref(&statement))?;
        results
            .pop()
            .ok_or_else(|| DomainError::Decode("store returned no result".to_string()))
    }

    fn finish(&self, id: TxId) -> Result<()> {
        let (failed, listeners) = {
            let mut slot = self.slot.lock();
            let failed = match &slot.open {
                Some(open) if open.id == id => open.failed,
                _ => {
                    return Err(DomainError::TransactionState(format!(
                        "transaction {id} is not open"
                    )))
                }
            };
            slot.open = None;
            (failed, slot.listeners.clone())
        };

        let outcome = if failed {
            tracing::warn!(tx = %id, "Rolling back transaction marked as failed");
            self.store.rollback(id)
        } else {
            self.store.commit(id)
        };
        let committed = !failed && outcome.is_ok();
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.transaction_closed(id, committed);
        }

        match outcome {
            Ok(()) => {
                tracing::info!(tx = %id, committed, "Transaction closed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(tx = %id, error = %e, "Transaction close failed");
                Err(e.into())
            }
        }
    }
}

/// A unit of work on one connection.
///
/// `close` commits unless `failure` was called first, in which case it
/// rolls back. A transaction dropped while still open is rolled back.
pub struct Transaction {
    conn: Connection,
    id: TxId,
    closed: bool,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the transaction for rollback.
    pub fn failure(&mut self) -> Result<()> {
        if self.closed {
            return Err(DomainError::TransactionState(format!(
                "transaction {} is already closed",
                self.id
            )));
        }
        let mut slot = self.conn.slot.lock();
        match slot.open.as_mut() {
            Some(open) if open.id == self.id => {
                open.failed = true;
                Ok(())
            }
            _ => Err(DomainError::TransactionState(format!(
                "transaction {} is not open",
                self.id
            ))),
        }
    }

    pub fn is_failed(&self) -> bool {
        let slot = self.conn.slot.lock();
        slot.open
            .as_ref()
            .is_some_and(|open| open.id == self.id && open.failed)
    }

    /// Commit, or roll back if marked failed. Closes exactly once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(DomainError::TransactionState(format!(
                "transaction {} is already closed",
                self.id
            )));
        }
        self.closed = true;
        self.conn.finish(self.id)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(tx = %self.id, "Transaction dropped while open, rolling back");
        let _ = self.failure();
        self.closed = true;
        if let Err(e) = self.conn.finish(self.id) {
            tracing::warn!(tx = %self.id, error = %e, "Rollback of dropped transaction failed");
        }
    }
}
