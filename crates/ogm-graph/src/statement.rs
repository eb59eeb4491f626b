//! Statement IR and result records exchanged with a graph store.
//!
//! The statements mirror the Cypher the Neo4j store renders for them, so a
//! batch reads like the query text it becomes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Store-assigned node id.
pub type NodeId = i64;

/// Property map of a node or relationship.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A property value as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare two values of compatible kinds. Integers and floats compare
    /// numerically; values of different kinds are unordered.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// A node as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl NodeRecord {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// A relationship as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: i64,
    pub rel_type: String,
    pub start: NodeId,
    pub end: NodeId,
    pub properties: Properties,
}

/// Comparison operators usable in a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Apply the operator to an ordering result.
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// A boolean condition over the properties of one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        key: String,
        op: CompareOp,
        value: PropertyValue,
    },
    IsNull(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn eq(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self::Compare {
            key: key.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// Conjunction of two optional conditions.
    pub fn and_opt(a: Option<Condition>, b: Option<Condition>) -> Option<Condition> {
        match (a, b) {
            (Some(a), Some(b)) => Some(Self::And(vec![a, b])),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Evaluate against a property map. A comparison against a missing or
    /// null property, or between incomparable values, is false.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Self::Compare { key, op, value } => match props.get(key) {
                Some(actual) if !actual.is_null() => actual
                    .compare(value)
                    .map(|ord| op.holds(ord))
                    .unwrap_or(false),
                _ => false,
            },
            Self::IsNull(key) => props.get(key).map_or(true, PropertyValue::is_null),
            Self::And(items) => items.iter().all(|c| c.matches(props)),
            Self::Or(items) => items.iter().any(|c| c.matches(props)),
            Self::Not(inner) => !inner.matches(props),
        }
    }
}

/// Relationship direction relative to the node a hop starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// One step of a traversal: follow relationships of one type between
/// `min_hops` and `max_hops` times (`None` = unbounded).
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub rel_type: String,
    pub direction: Direction,
    pub min_hops: u32,
    pub max_hops: Option<u32>,
}

impl Hop {
    pub fn single(rel_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            rel_type: rel_type.into(),
            direction,
            min_hops: 1,
            max_hops: Some(1),
        }
    }
}

/// Selects nodes by label, id and property condition.
///
/// Results are ordered by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeQuery {
    /// Any of these labels; empty matches every node.
    pub labels: Vec<String>,
    pub ids: Option<Vec<NodeId>>,
    pub filter: Option<Condition>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl NodeQuery {
    pub fn with_labels(labels: Vec<String>) -> Self {
        Self {
            labels,
            ..Self::default()
        }
    }

    pub fn filter(mut self, condition: Option<Condition>) -> Self {
        self.filter = Condition::and_opt(self.filter.take(), condition);
        self
    }

    /// Whether a node satisfies the label, id and property constraints
    /// (paging aside).
    pub fn accepts(&self, id: NodeId, labels: &[String], props: &Properties) -> bool {
        (self.labels.is_empty() || self.labels.iter().any(|l| labels.contains(l)))
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&id))
            && self.filter.as_ref().map_or(true, |c| c.matches(props))
    }
}

/// Follows a chain of hops from each start node.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalQuery {
    pub start_ids: Vec<NodeId>,
    pub hops: Vec<Hop>,
    /// Any of these labels on the end node; empty accepts every label.
    pub end_labels: Vec<String>,
    pub end_filter: Option<Condition>,
}

/// One statement of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Create a node; yields [`StatementResult::Created`].
    CreateNode {
        labels: Vec<String>,
        properties: Properties,
    },
    /// Find a node by label and key properties or create it, then merge
    /// `properties` into it; yields [`StatementResult::Created`].
    MergeNode {
        label: String,
        key: Properties,
        properties: Properties,
    },
    /// Replace all properties of a node.
    SetProperties { id: NodeId, properties: Properties },
    /// Delete the outgoing relationships of one type from a node.
    DeleteRelationships { start: NodeId, rel_type: String },
    /// Create a relationship between two existing nodes.
    CreateRelationship {
        start: NodeId,
        end: NodeId,
        rel_type: String,
        properties: Properties,
    },
    /// Yields [`StatementResult::Nodes`].
    FindNodes(NodeQuery),
    /// Yields [`StatementResult::Count`].
    CountNodes(NodeQuery),
    /// Outgoing relationships of the given nodes, ordered by relationship
    /// id; yields [`StatementResult::Relationships`].
    FetchRelationships { start_ids: Vec<NodeId> },
    /// Yields [`StatementResult::Paths`].
    Traverse(TraversalQuery),
}

impl Statement {
    /// Whether the statement changes the graph.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateNode { .. }
                | Self::MergeNode { .. }
                | Self::SetProperties { .. }
                | Self::DeleteRelationships { .. }
                | Self::CreateRelationship { .. }
        )
    }
}

/// Result of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Empty,
    Created(NodeId),
    Nodes(Vec<NodeRecord>),
    Relationships(Vec<RelationshipRecord>),
    Count(u64),
    /// `(start id, end node)` pairs, grouped by start in request order and
    /// in discovery order within a start.
    Paths(Vec<(NodeId, NodeRecord)>),
}

impl StatementResult {
    pub fn created(&self) -> Option<NodeId> {
        match self {
            Self::Created(id) => Some(*id),
            _ => None,
        }
    }

    pub fn into_nodes(self) -> Vec<NodeRecord> {
        match self {
            Self::Nodes(nodes) => nodes,
            _ => Vec::new(),
        }
    }

    pub fn into_relationships(self) -> Vec<RelationshipRecord> {
        match self {
            Self::Relationships(rels) => rels,
            _ => Vec::new(),
        }
    }

    pub fn into_paths(self) -> Vec<(NodeId, NodeRecord)> {
        match self {
            Self::Paths(paths) => paths,
            _ => Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Self::Count(n) => *n,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_condition_boolean_structure() {
        let p = props(&[
            ("lastName", "Smith".into()),
            ("firstName", "Jeremy".into()),
        ]);
        let cond = Condition::And(vec![
            Condition::eq("lastName", "Smith"),
            Condition::Or(vec![
                Condition::eq("firstName", "Angelina"),
                Condition::eq("firstName", "Jeremy"),
            ]),
        ]);
        assert!(cond.matches(&p));
        assert!(!Condition::Not(Box::new(cond)).matches(&p));
    }

    #[test]
    fn test_missing_property_comparisons_are_false() {
        let p = props(&[("number", PropertyValue::Int(20))]);
        assert!(!Condition::eq("street", "Market Street").matches(&p));
        assert!(Condition::IsNull("street".to_string()).matches(&p));
        assert!(!Condition::IsNull("number".to_string()).matches(&p));
    }

    #[test]
    fn test_numeric_comparisons_mix_int_and_float() {
        let p = props(&[("number", PropertyValue::Int(20))]);
        let gt = Condition::Compare {
            key: "number".to_string(),
            op: CompareOp::Gt,
            value: PropertyValue::Float(19.5),
        };
        assert!(gt.matches(&p));
        let lte = Condition::Compare {
            key: "number".to_string(),
            op: CompareOp::Lte,
            value: PropertyValue::Int(19),
        };
        assert!(!lte.matches(&p));
    }

    #[test]
    fn test_incomparable_kinds() {
        assert_eq!(
            PropertyValue::String("1".into()).compare(&PropertyValue::Int(1)),
            None
        );
        assert_eq!(
            PropertyValue::List(vec![1.into(), 2.into()])
                .compare(&PropertyValue::List(vec![1.into()])),
            Some(Ordering::Greater)
        );
    }
}
