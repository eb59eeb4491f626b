//! Domain queries: a builder for matches and their constraints.
//!
//! Building a query records matches, predicates, traversals and set
//! operations without touching the store. Nothing runs until the query is
//! handed to [`DomainAccess::execute`](crate::DomainAccess::execute) or
//! [`DomainAccess::execute_count`](crate::DomainAccess::execute_count).
//!
//! ```text
//! let mut q = access.create_query();
//! let smiths = q.create_match("people.Person");
//! q.where_(smiths.attribute("lastName")).equals("Smith");
//! q.br_open();
//! q.where_(smiths.attribute("firstName")).equals("Angelina");
//! q.or();
//! q.where_(smiths.attribute("firstName")).equals("Jeremy");
//! q.br_close();
//! let result = access.execute(&q)?;
//! ```

mod exec;
mod expr;
mod plan;
mod result;

use chrono::{DateTime, Utc};
use ogm_core::{EnumValue, ObjRef, Scalar, ScalarType};
use ogm_graph::{CompareOp, NodeId};
use uuid::Uuid;

pub use result::{CountQueryResult, DomainQueryResult};

use crate::access::DomainAccess;
use crate::error::DomainError;

// ── Handles & operands ───────────────────────────────────────────

/// A query variable: a not yet resolved set of domain objects (or, for
/// collect matches, scalar values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainObjectMatch {
    query: Uuid,
    index: usize,
}

impl DomainObjectMatch {
    /// An attribute of the matched objects, for predicates and collect.
    pub fn attribute(&self, name: impl Into<String>) -> Attribute {
        Attribute {
            owner: *self,
            name: name.into(),
        }
    }

    /// The number of matched objects, usable as a predicate operand.
    pub fn count(&self) -> Operand {
        Operand::Count(*self)
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

/// A named attribute of a match.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub(crate) owner: DomainObjectMatch,
    pub(crate) name: String,
}

/// A literal predicate value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Scalar(Scalar),
    Enum(EnumValue),
}

/// One side of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Attribute(Attribute),
    Match(DomainObjectMatch),
    Count(DomainObjectMatch),
    Literal(Literal),
}

impl Operand {
    /// The match this operand reads, if any.
    pub(crate) fn match_ref(&self) -> Option<DomainObjectMatch> {
        match self {
            Self::Attribute(a) => Some(a.owner),
            Self::Match(m) | Self::Count(m) => Some(*m),
            Self::Literal(_) => None,
        }
    }
}

impl From<Attribute> for Operand {
    fn from(a: Attribute) -> Self {
        Self::Attribute(a)
    }
}

impl From<DomainObjectMatch> for Operand {
    fn from(m: DomainObjectMatch) -> Self {
        Self::Match(m)
    }
}

impl From<&DomainObjectMatch> for Operand {
    fn from(m: &DomainObjectMatch) -> Self {
        Self::Match(*m)
    }
}

impl From<Scalar> for Operand {
    fn from(v: Scalar) -> Self {
        Self::Literal(Literal::Scalar(v))
    }
}

impl From<EnumValue> for Operand {
    fn from(v: EnumValue) -> Self {
        Self::Literal(Literal::Enum(v))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Scalar::from(v).into()
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Scalar::from(v).into()
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Scalar::from(v).into()
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Scalar::from(v).into()
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Scalar::from(v).into()
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Scalar::from(v).into()
    }
}

impl From<DateTime<Utc>> for Operand {
    fn from(v: DateTime<Utc>) -> Self {
        Scalar::from(v).into()
    }
}

// ── Recorded constraints ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PredicateOp {
    Compare(CompareOp),
    IsNull,
    In,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Predicate {
    pub left: Operand,
    pub op: PredicateOp,
    pub right: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Pred(Predicate),
    Or,
    Not,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TraversalStep {
    pub field: String,
    pub forward: bool,
    pub min_hops: u32,
    pub max_hops: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchSource {
    Type(String),
    Seed {
        type_name: String,
        node_id: NodeId,
    },
    Traversal {
        from: usize,
        steps: Vec<TraversalStep>,
        target: String,
    },
    Union(Vec<usize>),
    Intersection(Vec<usize>),
    Select {
        source: usize,
        tokens: Vec<Token>,
        reject: bool,
    },
    Collect {
        source: usize,
        attribute: String,
        as_type: ScalarType,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderKey {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MatchDef {
    pub source: MatchSource,
    pub order: Vec<OrderKey>,
    pub page: Option<(usize, usize)>,
}

// ── Query ────────────────────────────────────────────────────────

/// A domain query under construction.
#[derive(Debug, Clone)]
pub struct DomainQuery {
    id: Uuid,
    pub(crate) matches: Vec<MatchDef>,
    /// Top-level predicate stream.
    pub(crate) tokens: Vec<Token>,
    /// Token streams captured by `elements` blocks, innermost last.
    captures: Vec<Vec<Token>>,
    pub(crate) errors: Vec<DomainError>,
}

impl Default for DomainQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainQuery {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            matches: Vec::new(),
            tokens: Vec::new(),
            captures: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn owns(&self, m: &DomainObjectMatch) -> bool {
        m.query == self.id && m.index < self.matches.len()
    }

    fn add_match(&mut self, source: MatchSource) -> DomainObjectMatch {
        self.matches.push(MatchDef {
            source,
            order: Vec::new(),
            page: None,
        });
        DomainObjectMatch {
            query: self.id,
            index: self.matches.len() - 1,
        }
    }

    fn check(&mut self, m: &DomainObjectMatch) -> bool {
        let ok = self.owns(m);
        if !ok {
            self.errors.push(DomainError::QueryBuild(
                "match handle belongs to a different query".to_string(),
            ));
        }
        ok
    }

    fn push(&mut self, token: Token) {
        match self.captures.last_mut() {
            Some(capture) => capture.push(token),
            None => self.tokens.push(token),
        }
    }

    /// A match over all objects of a type and its subtypes.
    pub fn create_match(&mut self, type_name: impl AsRef<str>) -> DomainObjectMatch {
        self.add_match(MatchSource::Type(type_name.as_ref().to_string()))
    }

    /// A match bound to one object, usually a result of an earlier query.
    /// The object must have been stored or loaded through `access`.
    pub fn create_match_for(&mut self, access: &DomainAccess, obj: ObjRef) -> DomainObjectMatch {
        let type_name = access
            .object(obj)
            .map(|o| o.type_name().to_string())
            .unwrap_or_default();
        match access.sync.node_id(obj) {
            Some(node_id) => self.add_match(MatchSource::Seed { type_name, node_id }),
            None => {
                self.errors.push(DomainError::QueryBuild(format!(
                    "object {obj} has no store identity; store or load it first"
                )));
                self.add_match(MatchSource::Union(Vec::new()))
            }
        }
    }

    /// Start a predicate on an attribute, a match or a count.
    pub fn where_(&mut self, operand: impl Into<Operand>) -> Where<'_> {
        Where {
            query: self,
            left: operand.into(),
        }
    }

    pub fn or(&mut self) {
        self.push(Token::Or);
    }

    /// Negate the next predicate or bracket group.
    pub fn not(&mut self) {
        self.push(Token::Not);
    }

    pub fn br_open(&mut self) {
        self.push(Token::Open);
    }

    pub fn br_close(&mut self) {
        self.push(Token::Close);
    }

    /// Derive a match by following reference fields from `start`.
    pub fn traverse_from(&mut self, start: &DomainObjectMatch) -> Traverse<'_> {
        let valid = self.check(start);
        Traverse {
            query: self,
            from: start.index,
            steps: Vec::new(),
            valid,
        }
    }

    /// The deduplicated union of several matches.
    pub fn union(&mut self, matches: &[DomainObjectMatch]) -> DomainObjectMatch {
        for m in matches {
            self.check(m);
        }
        self.add_match(MatchSource::Union(matches.iter().map(|m| m.index).collect()))
    }

    /// The objects present in every one of several matches.
    pub fn intersection(&mut self, matches: &[DomainObjectMatch]) -> DomainObjectMatch {
        for m in matches {
            self.check(m);
        }
        self.add_match(MatchSource::Intersection(
            matches.iter().map(|m| m.index).collect(),
        ))
    }

    /// Select the elements of `source` for which the predicates given to
    /// [`Select::elements`] hold.
    pub fn select_from(&mut self, source: &DomainObjectMatch) -> Select<'_> {
        self.check(source);
        Select {
            query: self,
            source: source.index,
            reject: false,
        }
    }

    /// Like [`select_from`](Self::select_from), keeping the elements for
    /// which the predicates do not hold.
    pub fn reject_from(&mut self, source: &DomainObjectMatch) -> Select<'_> {
        self.check(source);
        Select {
            query: self,
            source: source.index,
            reject: true,
        }
    }

    /// Collect the values of an attribute over a match.
    pub fn collect(&mut self, attribute: Attribute) -> Collect<'_> {
        self.check(&attribute.owner);
        Collect {
            query: self,
            attribute,
        }
    }

    /// Add sort keys to a match; the first key added is the primary one.
    pub fn order(&mut self, m: &DomainObjectMatch) -> Order<'_> {
        let valid = self.check(m);
        Order {
            query: self,
            index: m.index,
            valid,
        }
    }

    /// Initial page window of a match's result.
    pub fn set_page(&mut self, m: &DomainObjectMatch, offset: usize, count: usize) {
        if self.check(m) {
            self.matches[m.index].page = Some((offset, count));
        }
    }
}

// ── Builder steps ────────────────────────────────────────────────

/// A predicate awaiting its operator.
pub struct Where<'q> {
    query: &'q mut DomainQuery,
    left: Operand,
}

impl Where<'_> {
    fn finish(self, op: PredicateOp, right: Option<Operand>) {
        let refs = self
            .left
            .match_ref()
            .into_iter()
            .chain(right.as_ref().and_then(Operand::match_ref));
        for m in refs.collect::<Vec<_>>() {
            self.query.check(&m);
        }
        self.query.push(Token::Pred(Predicate {
            left: self.left,
            op,
            right,
        }));
    }

    pub fn equals(self, value: impl Into<Operand>) {
        self.finish(PredicateOp::Compare(CompareOp::Eq), Some(value.into()));
    }

    pub fn gt(self, value: impl Into<Operand>) {
        self.finish(PredicateOp::Compare(CompareOp::Gt), Some(value.into()));
    }

    pub fn gte(self, value: impl Into<Operand>) {
        self.finish(PredicateOp::Compare(CompareOp::Gte), Some(value.into()));
    }

    pub fn lt(self, value: impl Into<Operand>) {
        self.finish(PredicateOp::Compare(CompareOp::Lt), Some(value.into()));
    }

    pub fn lte(self, value: impl Into<Operand>) {
        self.finish(PredicateOp::Compare(CompareOp::Lte), Some(value.into()));
    }

    pub fn is_null(self) {
        self.finish(PredicateOp::IsNull, None);
    }

    /// The element is a member of `set`.
    pub fn in_(self, set: &DomainObjectMatch) {
        self.finish(PredicateOp::In, Some(Operand::Match(*set)));
    }

    /// The set contains every element of `elements`.
    pub fn contains(self, elements: &DomainObjectMatch) {
        self.finish(PredicateOp::Contains, Some(Operand::Match(*elements)));
    }
}

/// A traversal under construction.
pub struct Traverse<'q> {
    query: &'q mut DomainQuery,
    from: usize,
    steps: Vec<TraversalStep>,
    valid: bool,
}

impl Traverse<'_> {
    fn step(mut self, field: impl Into<String>, forward: bool) -> Self {
        self.steps.push(TraversalStep {
            field: field.into(),
            forward,
            min_hops: 1,
            max_hops: Some(1),
        });
        self
    }

    /// Follow a reference field from the objects reached so far.
    pub fn forth(self, field: impl Into<String>) -> Self {
        self.step(field, true)
    }

    /// Follow a reference field backwards, to the objects referencing the
    /// ones reached so far.
    pub fn back(self, field: impl Into<String>) -> Self {
        self.step(field, false)
    }

    /// Hop count of the last step; `max = -1` leaves it unbounded.
    pub fn distance(mut self, min: u32, max: i32) -> Self {
        let max_hops = if max < 0 { None } else { Some(max as u32) };
        let invalid = max < -1 || max_hops.is_some_and(|m| m < min);
        match self.steps.last_mut() {
            Some(step) if !invalid => {
                step.min_hops = min;
                step.max_hops = max_hops;
            }
            Some(_) => self.query.errors.push(DomainError::QueryBuild(format!(
                "invalid traversal distance ({min}, {max})"
            ))),
            None => self.query.errors.push(DomainError::QueryBuild(
                "distance given before any traversal step".to_string(),
            )),
        }
        self
    }

    /// End the traversal at objects of `type_name` (or its subtypes).
    pub fn to(self, type_name: impl AsRef<str>) -> DomainObjectMatch {
        if self.steps.is_empty() && self.valid {
            self.query.errors.push(DomainError::QueryBuild(
                "traversal without steps".to_string(),
            ));
        }
        let source = MatchSource::Traversal {
            from: self.from,
            steps: self.steps,
            target: type_name.as_ref().to_string(),
        };
        self.query.add_match(source)
    }

    /// Same as [`to`](Self::to), for type names only known at runtime.
    pub fn to_generic(self, type_name: &str) -> DomainObjectMatch {
        self.to(type_name)
    }
}

/// A select or reject awaiting its element predicates.
pub struct Select<'q> {
    query: &'q mut DomainQuery,
    source: usize,
    reject: bool,
}

impl Select<'_> {
    /// Predicates recorded inside `predicates` are evaluated with the
    /// source match bound to one element at a time.
    pub fn elements(self, predicates: impl FnOnce(&mut DomainQuery)) -> DomainObjectMatch {
        self.query.captures.push(Vec::new());
        predicates(self.query);
        let tokens = self.query.captures.pop().unwrap_or_default();
        if tokens.is_empty() {
            self.query.errors.push(DomainError::QueryBuild(
                "select without element predicates".to_string(),
            ));
        }
        self.query.add_match(MatchSource::Select {
            source: self.source,
            tokens,
            reject: self.reject,
        })
    }
}

/// A collect awaiting its value type.
pub struct Collect<'q> {
    query: &'q mut DomainQuery,
    attribute: Attribute,
}

impl Collect<'_> {
    pub fn as_(self, scalar_type: ScalarType) -> DomainObjectMatch {
        self.query.add_match(MatchSource::Collect {
            source: self.attribute.owner.index,
            attribute: self.attribute.name,
            as_type: scalar_type,
        })
    }
}

/// Sort keys for one match.
pub struct Order<'q> {
    query: &'q mut DomainQuery,
    index: usize,
    valid: bool,
}

impl<'q> Order<'q> {
    /// Sort ascending by `field` after all previously added keys.
    pub fn by(self, field: impl Into<String>) -> Order<'q> {
        if self.valid {
            self.query.matches[self.index].order.push(OrderKey {
                field: field.into(),
                descending: false,
            });
        }
        self
    }

    /// Make the most recently added key descending.
    pub fn descending(self) -> Order<'q> {
        if !self.valid {
            return self;
        }
        if let Some(key) = self
            .query
            .matches
            .get_mut(self.index)
            .and_then(|m| m.order.last_mut())
        {
            key.descending = true;
        }
        self
    }
}
