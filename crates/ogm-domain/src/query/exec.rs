//! Query execution against the store.
//!
//! Matches resolve to ordered sets of node ids (or scalar values for
//! collects). Type, seed and traversal matches read the store; set
//! operations, selects, collects, filters and ordering run over the node
//! records fetched on the way.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use ogm_core::{Scalar, TypeRegistry};
use ogm_graph::{
    Condition, Direction, Hop, NodeId, NodeQuery, NodeRecord, PropertyValue, Statement,
    TraversalQuery,
};

use super::expr::Expr;
use super::plan::Plan;
use super::{DomainQuery, Literal, MatchSource, Operand, OrderKey, Predicate, PredicateOp};
use crate::connection::Connection;
use crate::error::{DomainError, Result};
use crate::mapper::encode::{property_to_scalar, scalar_to_property, DOMAIN_KEY};
use crate::mapper::load::{instance_query, instance_types, type_condition};

/// The resolved content of one match.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Nodes(Vec<NodeId>),
    Values(Vec<Scalar>),
}

impl Bound {
    pub fn len(&self) -> usize {
        match self {
            Self::Nodes(ids) => ids.len(),
            Self::Values(values) => values.len(),
        }
    }

    fn elements(&self) -> Vec<Elem> {
        match self {
            Self::Nodes(ids) => ids.iter().copied().map(Elem::Node).collect(),
            Self::Values(values) => values.iter().cloned().map(Elem::Value).collect(),
        }
    }

    fn contains(&self, elem: &Elem) -> bool {
        match (self, elem) {
            (Self::Nodes(ids), Elem::Node(id)) => ids.contains(id),
            (Self::Values(values), Elem::Value(v)) => values.contains(v),
            _ => false,
        }
    }

    fn retain(self, keep: impl Fn(&Elem) -> bool) -> Self {
        match self {
            Self::Nodes(ids) => Self::Nodes(
                ids.into_iter()
                    .filter(|id| keep(&Elem::Node(*id)))
                    .collect(),
            ),
            Self::Values(values) => Self::Values(
                values
                    .into_iter()
                    .filter(|v| keep(&Elem::Value(v.clone())))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Elem {
    Node(NodeId),
    Value(Scalar),
}

impl From<Elem> for Bound {
    fn from(elem: Elem) -> Self {
        match elem {
            Elem::Node(id) => Self::Nodes(vec![id]),
            Elem::Value(v) => Self::Values(vec![v]),
        }
    }
}

/// Match bindings for one evaluation scope. Select predicates run in a
/// child frame per source element, where the source is bound to that
/// element and only matches that do not depend on it are reused.
#[derive(Debug, Clone, Default)]
struct Frame {
    bound: HashMap<usize, Bound>,
    memo: HashMap<usize, Bound>,
}

/// How element predicates are applied.
#[derive(Clone, Copy)]
enum Scope<'e> {
    /// Filtering the owner: element predicates test `elem`, set predicates
    /// test the owner's unfiltered set.
    Filter { elem: &'e Elem, base: &'e Bound },
    /// Select predicates: element predicates hold if any element of the
    /// owner satisfies them.
    Exists,
}

pub(crate) struct Engine<'a> {
    conn: &'a Connection,
    registry: &'a TypeRegistry,
    domain: &'a str,
    query: &'a DomainQuery,
    plan: &'a Plan,
    records: HashMap<NodeId, NodeRecord>,
    store_calls: usize,
}

impl<'a> Engine<'a> {
    pub fn new(
        conn: &'a Connection,
        registry: &'a TypeRegistry,
        domain: &'a str,
        query: &'a DomainQuery,
        plan: &'a Plan,
    ) -> Self {
        Self {
            conn,
            registry,
            domain,
            query,
            plan,
            records: HashMap::new(),
            store_calls: 0,
        }
    }

    /// Resolve every match, in query order.
    pub fn run(&mut self) -> Result<Vec<Bound>> {
        let plan = self.plan;
        let mut frame = Frame::default();
        for &index in &plan.order {
            self.resolve(index, &mut frame)?;
        }
        let bounds = (0..plan.kinds.len())
            .map(|i| frame.memo.remove(&i).unwrap_or(Bound::Nodes(Vec::new())))
            .collect::<Vec<_>>();
        tracing::debug!(
            query = %self.query.id(),
            matches = bounds.len(),
            store_calls = self.store_calls,
            nodes = self.records.len(),
            "Query resolved"
        );
        Ok(bounds)
    }

    /// Node records fetched while resolving, for materialization.
    pub fn into_records(self) -> HashMap<NodeId, NodeRecord> {
        self.records
    }

    fn resolve(&mut self, index: usize, frame: &mut Frame) -> Result<Bound> {
        if let Some(bound) = frame.bound.get(&index).or_else(|| frame.memo.get(&index)) {
            return Ok(bound.clone());
        }
        let plan = self.plan;
        let base = self.base(index, frame)?;
        let filtered = match &plan.filters[index] {
            Some(expr) => {
                let mut kept = Vec::new();
                for elem in base.elements() {
                    let scope = Scope::Filter {
                        elem: &elem,
                        base: &base,
                    };
                    if self.eval(expr, scope, frame)? {
                        kept.push(elem);
                    }
                }
                base.retain(|e| kept.contains(e))
            }
            None => base,
        };
        let resolved = self.sort(index, filtered);
        frame.memo.insert(index, resolved.clone());
        Ok(resolved)
    }

    // ── Sources ──────────────────────────────────────────────────

    fn base(&mut self, index: usize, frame: &mut Frame) -> Result<Bound> {
        let query = self.query;
        let plan = self.plan;
        match &query.matches[index].source {
            MatchSource::Type(type_name) => {
                let Some(node_query) = instance_query(self.registry, self.domain, type_name)?
                else {
                    return Ok(Bound::Nodes(Vec::new()));
                };
                let node_query = node_query.filter(plan.pushdown[index].clone());
                self.find(node_query)
            }
            MatchSource::Seed { node_id, .. } => {
                let node_query = NodeQuery {
                    ids: Some(vec![*node_id]),
                    ..NodeQuery::default()
                }
                .filter(Some(Condition::eq(DOMAIN_KEY, self.domain)));
                self.find(node_query)
            }
            MatchSource::Traversal {
                from,
                steps,
                target,
            } => {
                let Bound::Nodes(start_ids) = self.resolve(*from, frame)? else {
                    return Ok(Bound::Nodes(Vec::new()));
                };
                let names = instance_types(self.registry, target)?;
                if start_ids.is_empty() || names.is_empty() {
                    return Ok(Bound::Nodes(Vec::new()));
                }
                let mut end_labels = self.registry.instance_labels(target);
                end_labels.sort();
                end_labels.dedup();
                let hops = steps
                    .iter()
                    .map(|s| Hop {
                        rel_type: s.field.clone(),
                        direction: if s.forward {
                            Direction::Outgoing
                        } else {
                            Direction::Incoming
                        },
                        min_hops: s.min_hops,
                        max_hops: s.max_hops,
                    })
                    .collect();
                let traversal = TraversalQuery {
                    start_ids,
                    hops,
                    end_labels,
                    end_filter: Some(type_condition(self.domain, &names)),
                };
                self.store_calls += 1;
                let paths = self
                    .conn
                    .execute_one(Statement::Traverse(traversal))?
                    .into_paths();
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for (_, record) in paths {
                    if seen.insert(record.id) {
                        ids.push(record.id);
                    }
                    self.records.insert(record.id, record);
                }
                Ok(Bound::Nodes(ids))
            }
            MatchSource::Union(operands) => {
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for operand in operands {
                    if let Bound::Nodes(part) = self.resolve(*operand, frame)? {
                        ids.extend(part.into_iter().filter(|id| seen.insert(*id)));
                    }
                }
                Ok(Bound::Nodes(ids))
            }
            MatchSource::Intersection(operands) => {
                let mut parts = Vec::with_capacity(operands.len());
                for operand in operands {
                    match self.resolve(*operand, frame)? {
                        Bound::Nodes(part) => parts.push(part),
                        Bound::Values(_) => parts.push(Vec::new()),
                    }
                }
                let Some((first, rest)) = parts.split_first() else {
                    return Ok(Bound::Nodes(Vec::new()));
                };
                let rest: Vec<HashSet<NodeId>> =
                    rest.iter().map(|p| p.iter().copied().collect()).collect();
                let mut seen = HashSet::new();
                Ok(Bound::Nodes(
                    first
                        .iter()
                        .copied()
                        .filter(|id| rest.iter().all(|set| set.contains(id)))
                        .filter(|id| seen.insert(*id))
                        .collect(),
                ))
            }
            MatchSource::Select { source, reject, .. } => {
                let expr = plan.selects.get(&index).ok_or_else(|| {
                    DomainError::QueryBuild("select without element predicates".to_string())
                })?;
                let source_set = self.resolve(*source, frame)?;
                let mut kept = Vec::new();
                for elem in source_set.elements() {
                    let mut child = Frame {
                        bound: frame.bound.clone(),
                        memo: frame
                            .memo
                            .iter()
                            .filter(|(i, _)| **i != *source && !plan.depends_on(**i, *source))
                            .map(|(i, b)| (*i, b.clone()))
                            .collect(),
                    };
                    child.bound.insert(*source, Bound::from(elem.clone()));
                    if self.eval(expr, Scope::Exists, &mut child)? != *reject {
                        kept.push(elem);
                    }
                }
                Ok(source_set.retain(|e| kept.contains(e)))
            }
            MatchSource::Collect {
                source,
                attribute,
                as_type,
            } => {
                let Bound::Nodes(ids) = self.resolve(*source, frame)? else {
                    return Ok(Bound::Values(Vec::new()));
                };
                let mut values: Vec<Scalar> = Vec::new();
                for id in ids {
                    for prop in self.attribute_values(&Elem::Node(id), attribute) {
                        let value = property_to_scalar(attribute, *as_type, &prop)?;
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
                Ok(Bound::Values(values))
            }
        }
    }

    fn find(&mut self, query: NodeQuery) -> Result<Bound> {
        self.store_calls += 1;
        let records = self
            .conn
            .execute_one(Statement::FindNodes(query))?
            .into_nodes();
        let ids = records.iter().map(|r| r.id).collect();
        for record in records {
            self.records.insert(record.id, record);
        }
        Ok(Bound::Nodes(ids))
    }

    // ── Predicates ───────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, scope: Scope<'_>, frame: &mut Frame) -> Result<bool> {
        match expr {
            Expr::Pred(pred) => self.predicate(pred, scope, frame),
            Expr::And(items) => {
                for item in items {
                    if !self.eval(item, scope, frame)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Or(items) => {
                for item in items {
                    if self.eval(item, scope, frame)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Not(inner) => Ok(!self.eval(inner, scope, frame)?),
        }
    }

    fn predicate(
        &mut self,
        pred: &Predicate,
        scope: Scope<'_>,
        frame: &mut Frame,
    ) -> Result<bool> {
        let Some(owner) = pred.left.match_ref().map(|m| m.index()) else {
            return Ok(false);
        };

        // Set predicates look at the owner as a whole.
        if matches!(pred.left, Operand::Count(_)) || pred.op == PredicateOp::Contains {
            let owner_set = match scope {
                Scope::Filter { base, .. } => base.clone(),
                Scope::Exists => self.resolve(owner, frame)?,
            };
            return self.set_predicate(pred, &owner_set, frame);
        }

        match scope {
            Scope::Filter { elem, .. } => self.element_predicate(pred, owner, elem, frame),
            Scope::Exists => {
                for elem in self.resolve(owner, frame)?.elements() {
                    if self.element_predicate(pred, owner, &elem, frame)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn set_predicate(
        &mut self,
        pred: &Predicate,
        owner_set: &Bound,
        frame: &mut Frame,
    ) -> Result<bool> {
        match (pred.op, &pred.right) {
            (PredicateOp::Contains, Some(Operand::Match(m))) => {
                let elements = self.resolve(m.index(), frame)?;
                Ok(elements.elements().iter().all(|e| owner_set.contains(e)))
            }
            (PredicateOp::Compare(op), Some(right)) => {
                let right = match right {
                    Operand::Count(m) => self.resolve(m.index(), frame)?.len() as i64,
                    Operand::Literal(Literal::Scalar(Scalar::Integer(n))) => *n,
                    _ => return Ok(false),
                };
                Ok(op.holds((owner_set.len() as i64).cmp(&right)))
            }
            _ => Ok(false),
        }
    }

    fn element_predicate(
        &mut self,
        pred: &Predicate,
        owner: usize,
        elem: &Elem,
        frame: &mut Frame,
    ) -> Result<bool> {
        match pred.op {
            PredicateOp::IsNull => match &pred.left {
                Operand::Attribute(a) => Ok(self.attribute_is_null(elem, &a.name)),
                _ => Ok(false),
            },
            PredicateOp::In => match &pred.right {
                Some(Operand::Match(set)) => Ok(self.resolve(set.index(), frame)?.contains(elem)),
                _ => Ok(false),
            },
            PredicateOp::Compare(op) => {
                let left = self.operand_values(&pred.left, owner, elem, frame)?;
                let right = match &pred.right {
                    Some(right) => self.operand_values(right, owner, elem, frame)?,
                    None => Vec::new(),
                };
                Ok(left.iter().any(|l| {
                    right
                        .iter()
                        .any(|r| l.compare(r).is_some_and(|ord| op.holds(ord)))
                }))
            }
            PredicateOp::Contains => Ok(false),
        }
    }

    /// Values an operand stands for when testing `elem` of `owner`.
    /// Operands on other matches range over all their elements.
    fn operand_values(
        &mut self,
        operand: &Operand,
        owner: usize,
        elem: &Elem,
        frame: &mut Frame,
    ) -> Result<Vec<PropertyValue>> {
        match operand {
            Operand::Literal(Literal::Scalar(s)) => Ok(vec![scalar_to_property(s)]),
            Operand::Literal(Literal::Enum(e)) => Ok(vec![PropertyValue::from(e.name())]),
            Operand::Attribute(a) if a.owner.index() == owner => {
                Ok(self.attribute_values(elem, &a.name))
            }
            Operand::Attribute(a) => {
                let mut values = Vec::new();
                for other in self.resolve(a.owner.index(), frame)?.elements() {
                    values.extend(self.attribute_values(&other, &a.name));
                }
                Ok(values)
            }
            Operand::Match(m) if m.index() == owner => Ok(elem_value(elem).into_iter().collect()),
            Operand::Match(m) => Ok(self
                .resolve(m.index(), frame)?
                .elements()
                .iter()
                .filter_map(elem_value)
                .collect()),
            Operand::Count(_) => Ok(Vec::new()),
        }
    }

    /// Non-null values of a node attribute; list properties contribute
    /// each item.
    fn attribute_values(&self, elem: &Elem, field: &str) -> Vec<PropertyValue> {
        let Elem::Node(id) = elem else {
            return Vec::new();
        };
        match self.records.get(id).and_then(|r| r.property(field)) {
            None | Some(PropertyValue::Null) => Vec::new(),
            Some(PropertyValue::List(items)) => {
                items.iter().filter(|v| !v.is_null()).cloned().collect()
            }
            Some(value) => vec![value.clone()],
        }
    }

    fn attribute_is_null(&self, elem: &Elem, field: &str) -> bool {
        let Elem::Node(id) = elem else {
            return false;
        };
        self.records
            .get(id)
            .and_then(|r| r.property(field))
            .map_or(true, PropertyValue::is_null)
    }

    // ── Ordering ─────────────────────────────────────────────────

    fn sort(&self, index: usize, bound: Bound) -> Bound {
        let keys = &self.query.matches[index].order;
        match bound {
            Bound::Nodes(mut ids) if !keys.is_empty() => {
                ids.sort_by(|a, b| self.compare_nodes(keys, *a, *b));
                Bound::Nodes(ids)
            }
            other => other,
        }
    }

    /// Missing values sort last in either direction; ties fall back to
    /// store id.
    fn compare_nodes(&self, keys: &[OrderKey], a: NodeId, b: NodeId) -> Ordering {
        for key in keys {
            let va = self.sort_value(a, &key.field);
            let vb = self.sort_value(b, &key.field);
            let ord = match (va, vb) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => {
                    let ord = x.compare(y).unwrap_or(Ordering::Equal);
                    if key.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.cmp(&b)
    }

    fn sort_value(&self, id: NodeId, field: &str) -> Option<&PropertyValue> {
        self.records
            .get(&id)
            .and_then(|r| r.property(field))
            .filter(|v| !v.is_null())
    }
}

fn elem_value(elem: &Elem) -> Option<PropertyValue> {
    match elem {
        Elem::Value(v) => Some(scalar_to_property(v)),
        Elem::Node(_) => None,
    }
}

/// Resolve a query without materializing objects.
pub(crate) fn resolve_query(
    conn: &Connection,
    registry: &TypeRegistry,
    domain: &str,
    query: &DomainQuery,
) -> Result<(Vec<Bound>, HashMap<NodeId, NodeRecord>)> {
    let plan = Plan::build(query, registry)?;
    let mut engine = Engine::new(conn, registry, domain, query, &plan);
    let bounds = engine.run()?;
    Ok((bounds, engine.into_records()))
}
