//! ogm-domain: object-graph mapping, domain queries and transactions.
//!
//! A [`Connection`] wraps a [`GraphStore`](ogm_graph::GraphStore) and owns
//! the transaction state of one logical client. A [`DomainAccess`] handle
//! bound to a connection and a domain name stores and loads object graphs
//! and runs [`DomainQuery`]s. Every handle keeps its own identity map, so
//! two handles on the same store behave like two independent applications.

pub mod access;
pub mod connection;
pub mod error;
pub mod info;
pub mod mapper;
pub mod query;
pub mod sync;

pub use access::DomainAccess;
pub use connection::{Connection, Transaction};
pub use error::{DomainError, Result};
pub use info::{DomainInformation, DomainObjectType};
pub use query::{
    Attribute, CountQueryResult, DomainObjectMatch, DomainQuery, DomainQueryResult, Literal,
    Operand,
};
pub use sync::{SyncInfo, SyncState};
