//! In-process graph store.
//!
//! Keeps the committed graph behind a lock. A transaction works on a private
//! copy of the graph taken at `begin` and records every applied mutation
//! with its resolved ids; `commit` replays that log onto the committed graph
//! as it is at commit time. Batches are applied to a scratch copy and only
//! swapped in once every statement succeeded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::statement::{
    Direction, Hop, NodeId, NodeQuery, NodeRecord, Properties, RelationshipRecord, Statement,
    StatementResult, TraversalQuery,
};
use crate::store::{GraphStore, StoreError, TxId};

#[derive(Debug, Clone)]
struct NodeData {
    labels: Vec<String>,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct RelData {
    rel_type: String,
    start: NodeId,
    end: NodeId,
    properties: Properties,
}

#[derive(Debug, Clone, Default)]
struct Graph {
    nodes: BTreeMap<NodeId, NodeData>,
    rels: BTreeMap<i64, RelData>,
}

/// A mutation with its ids already resolved, replayable onto another graph.
#[derive(Debug, Clone)]
enum Mutation {
    CreateNode {
        id: NodeId,
        labels: Vec<String>,
        properties: Properties,
    },
    Merge {
        id: NodeId,
        label: String,
        key: Properties,
        properties: Properties,
    },
    SetProperties {
        id: NodeId,
        properties: Properties,
    },
    DeleteRelationships {
        start: NodeId,
        rel_type: String,
    },
    CreateRelationship {
        id: i64,
        start: NodeId,
        end: NodeId,
        rel_type: String,
        properties: Properties,
    },
}

struct OpenTx {
    workspace: Graph,
    log: Vec<Mutation>,
}

/// In-memory [`GraphStore`].
///
/// Node and relationship ids come from store-wide counters and are never
/// reused, not even after a rollback.
pub struct MemoryStore {
    committed: RwLock<Graph>,
    open: Mutex<HashMap<TxId, OpenTx>>,
    next_node: AtomicI64,
    next_rel: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Graph::default()),
            open: Mutex::new(HashMap::new()),
            next_node: AtomicI64::new(1),
            next_rel: AtomicI64::new(1),
        }
    }

    /// Number of committed nodes.
    pub fn node_count(&self) -> usize {
        self.committed.read().nodes.len()
    }

    /// Number of committed relationships.
    pub fn relationship_count(&self) -> usize {
        self.committed.read().rels.len()
    }

    /// Run a batch against `graph`. Batches with mutations work on a copy,
    /// returned for the caller to swap in; read-only batches return `None`.
    fn run_batch(
        &self,
        graph: &Graph,
        statements: &[Statement],
    ) -> Result<(Option<Graph>, Vec<Mutation>, Vec<StatementResult>), StoreError> {
        if !statements.iter().any(Statement::is_mutation) {
            let results = statements
                .iter()
                .map(|s| read(graph, s))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok((None, Vec::new(), results));
        }
        let mut scratch = graph.clone();
        let mut log = Vec::new();
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            let result = self.apply(&mut scratch, &mut log, statement)?;
            results.push(result);
        }
        Ok((Some(scratch), log, results))
    }

    fn apply(
        &self,
        graph: &mut Graph,
        log: &mut Vec<Mutation>,
        statement: &Statement,
    ) -> Result<StatementResult, StoreError> {
        match statement {
            Statement::CreateNode { labels, properties } => {
                let id = self.next_node.fetch_add(1, Ordering::SeqCst);
                let m = Mutation::CreateNode {
                    id,
                    labels: labels.clone(),
                    properties: properties.clone(),
                };
                replay(graph, &m)?;
                log.push(m);
                Ok(StatementResult::Created(id))
            }
            Statement::MergeNode {
                label,
                key,
                properties,
            } => {
                let id = match find_merge_target(graph, label, key) {
                    Some(id) => id,
                    None => self.next_node.fetch_add(1, Ordering::SeqCst),
                };
                let m = Mutation::Merge {
                    id,
                    label: label.clone(),
                    key: key.clone(),
                    properties: properties.clone(),
                };
                let id = replay(graph, &m)?;
                log.push(m);
                Ok(StatementResult::Created(id))
            }
            Statement::SetProperties { id, properties } => {
                let m = Mutation::SetProperties {
                    id: *id,
                    properties: properties.clone(),
                };
                replay(graph, &m)?;
                log.push(m);
                Ok(StatementResult::Empty)
            }
            Statement::DeleteRelationships { start, rel_type } => {
                let m = Mutation::DeleteRelationships {
                    start: *start,
                    rel_type: rel_type.clone(),
                };
                replay(graph, &m)?;
                log.push(m);
                Ok(StatementResult::Empty)
            }
            Statement::CreateRelationship {
                start,
                end,
                rel_type,
                properties,
            } => {
                let m = Mutation::CreateRelationship {
                    id: self.next_rel.fetch_add(1, Ordering::SeqCst),
                    start: *start,
                    end: *end,
                    rel_type: rel_type.clone(),
                    properties: properties.clone(),
                };
                replay(graph, &m)?;
                log.push(m);
                Ok(StatementResult::Empty)
            }
            read_only => read(graph, read_only),
        }
    }
}

/// Answer a statement that does not change the graph.
fn read(graph: &Graph, statement: &Statement) -> Result<StatementResult, StoreError> {
    match statement {
        Statement::FindNodes(query) => Ok(StatementResult::Nodes(find_nodes(graph, query))),
        Statement::CountNodes(query) => {
            let count = graph
                .nodes
                .iter()
                .filter(|(id, n)| query.accepts(**id, &n.labels, &n.properties))
                .count();
            Ok(StatementResult::Count(count as u64))
        }
        Statement::FetchRelationships { start_ids } => {
            let starts: HashSet<NodeId> = start_ids.iter().copied().collect();
            let rels = graph
                .rels
                .iter()
                .filter(|(_, r)| starts.contains(&r.start))
                .map(|(id, r)| RelationshipRecord {
                    id: *id,
                    rel_type: r.rel_type.clone(),
                    start: r.start,
                    end: r.end,
                    properties: r.properties.clone(),
                })
                .collect();
            Ok(StatementResult::Relationships(rels))
        }
        Statement::Traverse(query) => Ok(StatementResult::Paths(traverse(graph, query))),
        mutation => Err(StoreError::Query(format!(
            "mutation in a read-only batch: {mutation:?}"
        ))),
    }
}

/// Apply one resolved mutation. Returns the id of the affected node where
/// there is one.
fn replay(graph: &mut Graph, mutation: &Mutation) -> Result<NodeId, StoreError> {
    match mutation {
        Mutation::CreateNode {
            id,
            labels,
            properties,
        } => {
            graph.nodes.insert(
                *id,
                NodeData {
                    labels: labels.clone(),
                    properties: properties.clone(),
                },
            );
            Ok(*id)
        }
        Mutation::Merge {
            id,
            label,
            key,
            properties,
        } => {
            let target = if graph.nodes.contains_key(id) {
                *id
            } else {
                find_merge_target(graph, label, key).unwrap_or(*id)
            };
            let node = graph.nodes.entry(target).or_insert_with(|| NodeData {
                labels: vec![label.clone()],
                properties: key.clone(),
            });
            for (k, v) in properties {
                node.properties.insert(k.clone(), v.clone());
            }
            Ok(target)
        }
        Mutation::SetProperties { id, properties } => {
            let node = graph
                .nodes
                .get_mut(id)
                .ok_or(StoreError::NodeNotFound(*id))?;
            node.properties = properties.clone();
            Ok(*id)
        }
        Mutation::DeleteRelationships { start, rel_type } => {
            if !graph.nodes.contains_key(start) {
                return Err(StoreError::NodeNotFound(*start));
            }
            graph
                .rels
                .retain(|_, r| !(r.start == *start && r.rel_type == *rel_type));
            Ok(*start)
        }
        Mutation::CreateRelationship {
            id,
            start,
            end,
            rel_type,
            properties,
        } => {
            for node in [start, end] {
                if !graph.nodes.contains_key(node) {
                    return Err(StoreError::NodeNotFound(*node));
                }
            }
            graph.rels.insert(
                *id,
                RelData {
                    rel_type: rel_type.clone(),
                    start: *start,
                    end: *end,
                    properties: properties.clone(),
                },
            );
            Ok(*start)
        }
    }
}

fn find_merge_target(graph: &Graph, label: &str, key: &Properties) -> Option<NodeId> {
    graph
        .nodes
        .iter()
        .find(|(_, n)| {
            n.labels.iter().any(|l| l == label)
                && key.iter().all(|(k, v)| n.properties.get(k) == Some(v))
        })
        .map(|(id, _)| *id)
}

fn record(graph: &Graph, id: NodeId) -> Option<NodeRecord> {
    graph.nodes.get(&id).map(|n| NodeRecord {
        id,
        labels: n.labels.clone(),
        properties: n.properties.clone(),
    })
}

fn find_nodes(graph: &Graph, query: &NodeQuery) -> Vec<NodeRecord> {
    let matching = graph
        .nodes
        .iter()
        .filter(|(id, n)| query.accepts(**id, &n.labels, &n.properties))
        .skip(query.skip as usize)
        .map(|(id, n)| NodeRecord {
            id: *id,
            labels: n.labels.clone(),
            properties: n.properties.clone(),
        });
    match query.limit {
        Some(limit) => matching.take(limit as usize).collect(),
        None => matching.collect(),
    }
}

// ── Traversal ────────────────────────────────────────────────────

fn neighbors(graph: &Graph, from: &[NodeId], hop: &Hop) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &node in from {
        for rel in graph.rels.values().filter(|r| r.rel_type == hop.rel_type) {
            let next = match hop.direction {
                Direction::Outgoing if rel.start == node => Some(rel.end),
                Direction::Incoming if rel.end == node => Some(rel.start),
                Direction::Both if rel.start == node => Some(rel.end),
                Direction::Both if rel.end == node => Some(rel.start),
                _ => None,
            };
            if let Some(next) = next {
                if seen.insert(next) {
                    out.push(next);
                }
            }
        }
    }
    out
}

/// Nodes reachable from `from` over between `min_hops` and `max_hops`
/// relationships of the hop's type, in discovery order.
fn expand(graph: &Graph, from: Vec<NodeId>, hop: &Hop) -> Vec<NodeId> {
    let mut level = from;
    for _ in 0..hop.min_hops {
        if level.is_empty() {
            return level;
        }
        level = neighbors(graph, &level, hop);
    }

    let mut visited: HashSet<NodeId> = level.iter().copied().collect();
    let mut out = level.clone();
    let mut depth = hop.min_hops;
    while !level.is_empty() && hop.max_hops.map_or(true, |max| depth < max) {
        level = neighbors(graph, &level, hop)
            .into_iter()
            .filter(|n| visited.insert(*n))
            .collect();
        out.extend(level.iter().copied());
        depth += 1;
    }
    out
}

fn traverse(graph: &Graph, query: &TraversalQuery) -> Vec<(NodeId, NodeRecord)> {
    let mut out = Vec::new();
    for &start in &query.start_ids {
        if !graph.nodes.contains_key(&start) {
            continue;
        }
        let mut current = vec![start];
        for hop in &query.hops {
            current = expand(graph, current, hop);
        }
        for id in current {
            let Some(node) = record(graph, id) else {
                continue;
            };
            let label_ok = query.end_labels.is_empty()
                || query.end_labels.iter().any(|l| node.labels.contains(l));
            let filter_ok = query
                .end_filter
                .as_ref()
                .map_or(true, |c| c.matches(&node.properties));
            if label_ok && filter_ok {
                out.push((start, node));
            }
        }
    }
    out
}

// ── GraphStore ───────────────────────────────────────────────────

impl GraphStore for MemoryStore {
    fn execute(
        &self,
        tx: Option<TxId>,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>, StoreError> {
        match tx {
            None if !statements.iter().any(Statement::is_mutation) => {
                let committed = self.committed.read();
                let (_, _, results) = self.run_batch(&committed, statements)?;
                tracing::debug!(statements = statements.len(), "Executed read batch");
                Ok(results)
            }
            None => {
                let mut committed = self.committed.write();
                let (graph, _, results) = self.run_batch(&committed, statements)?;
                if let Some(graph) = graph {
                    *committed = graph;
                }
                tracing::debug!(statements = statements.len(), "Executed auto-commit batch");
                Ok(results)
            }
            Some(tx) => {
                let mut open = self.open.lock();
                let state = open.get_mut(&tx).ok_or(StoreError::UnknownTransaction(tx))?;
                let (graph, log, results) = self.run_batch(&state.workspace, statements)?;
                if let Some(graph) = graph {
                    state.workspace = graph;
                }
                state.log.extend(log);
                tracing::debug!(%tx, statements = statements.len(), "Executed batch in transaction");
                Ok(results)
            }
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.committed.write() = Graph::default();
        tracing::info!("Cleared in-memory store");
        Ok(())
    }

    fn begin(&self) -> Result<TxId, StoreError> {
        let tx = TxId::new();
        let workspace = self.committed.read().clone();
        self.open.lock().insert(
            tx,
            OpenTx {
                workspace,
                log: Vec::new(),
            },
        );
        tracing::debug!(%tx, "Transaction started");
        Ok(tx)
    }

    fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        let state = self
            .open
            .lock()
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        let mut committed = self.committed.write();
        let mut next = committed.clone();
        for mutation in &state.log {
            replay(&mut next, mutation)
                .map_err(|e| StoreError::Conflict(format!("transaction {tx}: {e}")))?;
        }
        *committed = next;
        tracing::debug!(%tx, mutations = state.log.len(), "Transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        self.open
            .lock()
            .remove(&tx)
            .ok_or(StoreError::UnknownTransaction(tx))?;
        tracing::debug!(%tx, "Transaction rolled back");
        Ok(())
    }
}
