//! Neo4j-backed graph store.

use std::collections::HashMap;

use neo4rs::{BoltList, BoltNull, BoltType, ConfigBuilder, Graph, Query, Row, Txn};
use parking_lot::Mutex;
use tokio::runtime::Runtime;

use crate::cypher::{render, CypherQuery, RowShape};
use crate::statement::{
    NodeId, NodeRecord, Properties, PropertyValue, RelationshipRecord, Statement, StatementResult,
};
use crate::store::{GraphStore, StoreError, TxId};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

/// [`GraphStore`] over a Neo4j server.
///
/// The store owns a tokio runtime and blocks on it, so its methods must not
/// be called from inside another async runtime. Open transactions are held
/// by id until committed or rolled back.
pub struct Neo4jStore {
    runtime: Runtime,
    graph: Graph,
    open: Mutex<HashMap<TxId, Txn>>,
}

impl Neo4jStore {
    /// Connect to Neo4j with the given configuration.
    pub fn connect(config: &GraphConfig) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let graph = runtime
            .block_on(Graph::connect(neo_config))
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self {
            runtime,
            graph,
            open: Mutex::new(HashMap::new()),
        })
    }

    async fn run_batch(
        txn: &mut Txn,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>, StoreError> {
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            let rendered = render(statement);
            tracing::debug!(cypher = %rendered.text, "Running statement");
            let rows = Self::query_rows(txn, &rendered).await?;
            results.push(to_result(rendered.shape, &rows)?);
        }
        Ok(results)
    }

    async fn query_rows(txn: &mut Txn, rendered: &CypherQuery) -> Result<Vec<Row>, StoreError> {
        let mut stream = txn.execute(to_query(rendered)).await.map_err(query_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(txn.handle()).await.map_err(query_error)? {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn query_error(e: neo4rs::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Null => BoltType::Null(BoltNull),
        PropertyValue::Bool(b) => BoltType::from(*b),
        PropertyValue::Int(i) => BoltType::from(*i),
        PropertyValue::Float(f) => BoltType::from(*f),
        PropertyValue::String(s) => BoltType::from(s.clone()),
        PropertyValue::List(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
    }
}

fn to_query(rendered: &CypherQuery) -> Query {
    rendered
        .params
        .iter()
        .fold(neo4rs::query(&rendered.text), |q, (k, v)| {
            q.param(k, to_bolt(v))
        })
}

fn column<'r, T: serde::Deserialize<'r>>(row: &'r Row, key: &str) -> Result<T, StoreError> {
    row.get::<T>(key)
        .map_err(|e| StoreError::Serialization(format!("column {key}: {e}")))
}

fn node_row(row: &Row) -> Result<NodeRecord, StoreError> {
    Ok(NodeRecord {
        id: column(row, "id")?,
        labels: column(row, "labels")?,
        properties: column::<Properties>(row, "props")?,
    })
}

fn to_result(shape: RowShape, rows: &[Row]) -> Result<StatementResult, StoreError> {
    match shape {
        RowShape::CreatedId => {
            let row = rows
                .first()
                .ok_or_else(|| StoreError::Query("statement returned no id".to_string()))?;
            Ok(StatementResult::Created(column::<NodeId>(row, "id")?))
        }
        RowShape::RequireRow(id) => {
            if rows.is_empty() {
                Err(StoreError::NodeNotFound(id))
            } else {
                Ok(StatementResult::Empty)
            }
        }
        RowShape::Nodes => Ok(StatementResult::Nodes(
            rows.iter().map(node_row).collect::<Result<_, _>>()?,
        )),
        RowShape::Count => {
            let count = match rows.first() {
                Some(row) => column::<i64>(row, "count")?,
                None => 0,
            };
            Ok(StatementResult::Count(count.max(0) as u64))
        }
        RowShape::Relationships => {
            let mut rels = Vec::with_capacity(rows.len());
            for row in rows {
                rels.push(RelationshipRecord {
                    id: column(row, "id")?,
                    rel_type: column(row, "type")?,
                    start: column(row, "start")?,
                    end: column(row, "end")?,
                    properties: column::<Properties>(row, "props")?,
                });
            }
            Ok(StatementResult::Relationships(rels))
        }
        RowShape::Paths => {
            let mut paths = Vec::with_capacity(rows.len());
            for row in rows {
                paths.push((column::<NodeId>(row, "start")?, node_row(row)?));
            }
            Ok(StatementResult::Paths(paths))
        }
    }
}

impl GraphStore for Neo4jStore {
    fn execute(
        &self,
        tx: Option<TxId>,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>, StoreError> {
        match tx {
            Some(tx) => {
                let mut open = self.open.lock();
                let txn = open.get_mut(&tx).ok_or(StoreError::UnknownTransaction(tx))?;
                self.runtime.block_on(Self::run_batch(txn, statements))
            }
            None => self.runtime.block_on(async {
                let mut txn = self.graph.start_txn().await.map_err(query_error)?;
                match Self::run_batch(&mut txn, statements).await {
                    Ok(results) => {
                        txn.commit().await.map_err(query_error)?;
                        Ok(results)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Batch failed, rolling back");
                        if let Err(rb) = txn.rollback().await {
                            tracing::warn!(error = %rb, "Rollback after failed batch failed");
                        }
                        Err(e)
                    }
                }
            }),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.graph.run(neo4rs::query("MATCH (n) DETACH DELETE n")))
            .map_err(query_error)?;
        tracing::info!("Cleared Neo4j database");
        Ok(())
    }

    fn begin(&self) -> Result<TxId, StoreError> {
        let txn = self
            .runtime
            .block_on(self.graph.start_txn())
            .map_err(query_error)?;
        let tx = TxId::new();
        self.open.lock().insert(tx, txn);
        tracing::debug!(%tx, "Transaction started");
        Ok(tx)
    }

    fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        let txn = self
            .open
            .lock()
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        self.runtime.block_on(txn.commit()).map_err(query_error)?;
        tracing::debug!(%tx, "Transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        let txn = self
            .open
            .lock()
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        self.runtime.block_on(txn.rollback()).map_err(query_error)?;
        tracing::debug!(%tx, "Transaction rolled back");
        Ok(())
    }
}
