use ogm_core::ModelError;
use ogm_graph::StoreError;
use thiserror::Error;

/// Errors raised by domain access, queries and transactions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Query build error: {0}")]
    QueryBuild(String),

    #[error("Unknown field {field} on type {type_name}")]
    UnknownField { type_name: String, field: String },

    #[error("Store execution failed: {}", join_causes(.causes))]
    StoreExecution { causes: Vec<StoreError> },

    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Stored data error: {0}")]
    Decode(String),
}

fn join_causes(causes: &[StoreError]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        Self::StoreExecution { causes: vec![e] }
    }
}

impl DomainError {
    /// The store errors behind a store execution failure.
    pub fn causes(&self) -> &[StoreError] {
        match self {
            Self::StoreExecution { causes } => causes,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
