//! ogm-graph: the graph store boundary.
//!
//! The mapper and the query engine talk to a store only through the
//! [`GraphStore`] trait: batches of [`Statement`]s in a small Cypher-shaped
//! IR, clear-all, and begin/commit/rollback. Two stores are provided:
//! - [`MemoryStore`]: an in-process graph with isolated transactions
//! - [`Neo4jStore`]: renders statements to Cypher and runs them on Neo4j

pub mod client;
pub mod cypher;
pub mod memory;
pub mod statement;
pub mod store;

pub use client::{GraphConfig, Neo4jStore};
pub use memory::MemoryStore;
pub use statement::{
    CompareOp, Condition, Direction, Hop, NodeId, NodeQuery, NodeRecord, Properties,
    PropertyValue, RelationshipRecord, Statement, StatementResult, TraversalQuery,
};
pub use store::{GraphStore, StoreError, TxId};
