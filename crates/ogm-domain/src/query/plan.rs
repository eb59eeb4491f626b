//! Query compilation: validation, match kinds, dependency order and
//! filter push-down.

use std::collections::{BTreeMap, BTreeSet};

use ogm_core::{ScalarType, TypeRegistry};
use ogm_graph::Condition;

use super::expr::{self, Expr};
use super::{DomainQuery, Literal, MatchSource, Operand, PredicateOp, Predicate, TraversalStep};
use crate::error::{DomainError, Result};
use crate::mapper::encode::{field_kind, scalar_to_property, FieldKind};

/// What a match resolves to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchKind {
    /// Domain objects of this type or its subtypes.
    Objects(String),
    /// Scalar values produced by a collect.
    Values(ScalarType),
}

/// A validated query, ready to run.
#[derive(Debug)]
pub(crate) struct Plan {
    pub kinds: Vec<MatchKind>,
    /// Per-match filters from the top-level predicates.
    pub filters: Vec<Option<Expr>>,
    /// Element predicates of select and reject matches.
    pub selects: BTreeMap<usize, Expr>,
    /// Store-side filters for type matches.
    pub pushdown: Vec<Option<Condition>>,
    /// Matches each match needs, directly or indirectly.
    pub transitive: Vec<BTreeSet<usize>>,
    /// Resolution order: every match after the matches it needs.
    pub order: Vec<usize>,
}

fn build_error(message: impl Into<String>) -> DomainError {
    DomainError::QueryBuild(message.into())
}

impl Plan {
    pub fn build(query: &DomainQuery, registry: &TypeRegistry) -> Result<Self> {
        if let Some(err) = query.errors.first() {
            return Err(err.clone());
        }

        let mut kinds = Vec::with_capacity(query.matches.len());
        for (index, def) in query.matches.iter().enumerate() {
            let kind = match_kind(registry, &kinds, index, &def.source)?;
            kinds.push(kind);
        }
        let validator = Validator {
            registry,
            kinds: &kinds,
        };

        let mut deps: Vec<BTreeSet<usize>> = query
            .matches
            .iter()
            .map(|def| source_deps(&def.source))
            .collect();

        let mut filters: Vec<Option<Expr>> = vec![None; kinds.len()];
        for (owner, expr) in expr::partition(&query.tokens)? {
            for pred in expr.predicates() {
                validator.predicate(pred)?;
                if let Some(right) = pred.right.as_ref().and_then(Operand::match_ref) {
                    if right.index() != owner {
                        deps[owner].insert(right.index());
                    }
                }
            }
            filters[owner] = Some(expr);
        }

        let mut selects = BTreeMap::new();
        for (index, def) in query.matches.iter().enumerate() {
            if let MatchSource::Select { tokens, .. } = &def.source {
                let Some(expr) = expr::parse(tokens)? else {
                    return Err(build_error("select without element predicates"));
                };
                for pred in expr.predicates() {
                    validator.predicate(pred)?;
                    for m in std::iter::once(&pred.left)
                        .chain(pred.right.as_ref())
                        .filter_map(Operand::match_ref)
                    {
                        if m.index() == index {
                            return Err(build_error("a select cannot constrain itself"));
                        }
                        deps[index].insert(m.index());
                    }
                }
                selects.insert(index, expr);
            }
            for key in &def.order {
                match &kinds[index] {
                    MatchKind::Objects(type_name) => {
                        validator.scalar_field(type_name, &key.field)?;
                    }
                    MatchKind::Values(_) => {
                        return Err(build_error(
                            "collect results follow the order of their source match",
                        ))
                    }
                }
            }
        }

        let order = topological_order(&deps)?;
        let transitive = transitive_deps(&deps, &order);

        let pushdown = query
            .matches
            .iter()
            .zip(&filters)
            .map(|(def, filter)| match (&def.source, filter) {
                (MatchSource::Type(type_name), Some(expr)) => {
                    pushdown_condition(registry, type_name, expr)
                }
                _ => None,
            })
            .collect();

        Ok(Self {
            kinds,
            filters,
            selects,
            pushdown,
            transitive,
            order,
        })
    }

    /// Whether resolving `index` involves `other`.
    pub fn depends_on(&self, index: usize, other: usize) -> bool {
        self.transitive[index].contains(&other)
    }
}

// ── Match kinds ──────────────────────────────────────────────────

fn object_type<'k>(kinds: &'k [MatchKind], index: usize, role: &str) -> Result<&'k str> {
    match kinds.get(index) {
        Some(MatchKind::Objects(t)) => Ok(t),
        Some(MatchKind::Values(_)) => Err(build_error(format!(
            "{role} needs a match over domain objects, not collected values"
        ))),
        None => Err(build_error(format!(
            "{role} refers to a match without a source type"
        ))),
    }
}

fn match_kind(
    registry: &TypeRegistry,
    kinds: &[MatchKind],
    index: usize,
    source: &MatchSource,
) -> Result<MatchKind> {
    let kind = match source {
        MatchSource::Type(type_name) => {
            registry.require(type_name)?;
            MatchKind::Objects(type_name.clone())
        }
        MatchSource::Seed { type_name, .. } => MatchKind::Objects(type_name.clone()),
        MatchSource::Traversal {
            from,
            steps,
            target,
        } => {
            let start = object_type(kinds, *from, "a traversal")?;
            let mut current = start.to_string();
            for step in steps {
                current = traverse_step(registry, &current, step)?;
            }
            registry.require(target)?;
            MatchKind::Objects(target.clone())
        }
        MatchSource::Union(operands) | MatchSource::Intersection(operands) => {
            let Some(first) = operands.first() else {
                return Err(build_error(format!(
                    "set operation for match {index} needs at least one operand"
                )));
            };
            for operand in operands {
                object_type(kinds, *operand, "a set operation")?;
            }
            MatchKind::Objects(object_type(kinds, *first, "a set operation")?.to_string())
        }
        MatchSource::Select { source, .. } => {
            MatchKind::Objects(object_type(kinds, *source, "a select")?.to_string())
        }
        MatchSource::Collect {
            source,
            attribute,
            as_type,
        } => {
            let type_name = object_type(kinds, *source, "a collect")?;
            let stored = Validator { registry, kinds }.scalar_field(type_name, attribute)?;
            let readable = match &stored {
                FieldKind::Scalar(s) => {
                    s == as_type || (*s == ScalarType::Integer && *as_type == ScalarType::Float)
                }
                FieldKind::Enum(_) => *as_type == ScalarType::String,
                FieldKind::Reference(_) => false,
            };
            if !readable {
                return Err(build_error(format!(
                    "cannot collect {type_name}.{attribute} ({stored:?}) as {}",
                    as_type.name()
                )));
            }
            MatchKind::Values(*as_type)
        }
    };
    Ok(kind)
}

/// Type reached by one traversal step from `current`.
fn traverse_step(registry: &TypeRegistry, current: &str, step: &TraversalStep) -> Result<String> {
    if step.forward {
        let field = registry
            .field_in_hierarchy(current, &step.field)
            .ok_or_else(|| DomainError::UnknownField {
                type_name: current.to_string(),
                field: step.field.clone(),
            })?;
        match field_kind(registry, &field) {
            FieldKind::Reference(target) => Ok(target),
            _ => Err(build_error(format!(
                "cannot traverse {current}.{}: it holds no object references",
                step.field
            ))),
        }
    } else {
        // Backwards the field lives on the referencing types.
        registry
            .types()
            .find(|t| {
                t.declared_fields().iter().any(|f| {
                    f.name() == step.field
                        && matches!(field_kind(registry, f), FieldKind::Reference(_))
                })
            })
            .map(|t| t.name().to_string())
            .ok_or_else(|| DomainError::UnknownField {
                type_name: current.to_string(),
                field: step.field.clone(),
            })
    }
}

fn source_deps(source: &MatchSource) -> BTreeSet<usize> {
    match source {
        MatchSource::Type(_) | MatchSource::Seed { .. } => BTreeSet::new(),
        MatchSource::Traversal { from, .. } => BTreeSet::from([*from]),
        MatchSource::Union(operands) | MatchSource::Intersection(operands) => {
            operands.iter().copied().collect()
        }
        MatchSource::Select { source, .. } | MatchSource::Collect { source, .. } => {
            BTreeSet::from([*source])
        }
    }
}

// ── Predicate validation ─────────────────────────────────────────

struct Validator<'a> {
    registry: &'a TypeRegistry,
    kinds: &'a [MatchKind],
}

impl Validator<'_> {
    /// The stored kind of a non-reference field on `type_name` or a subtype.
    fn scalar_field(&self, type_name: &str, field: &str) -> Result<FieldKind> {
        let found = self
            .registry
            .field_in_hierarchy(type_name, field)
            .ok_or_else(|| DomainError::UnknownField {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })?;
        match field_kind(self.registry, &found) {
            FieldKind::Reference(_) => Err(build_error(format!(
                "{type_name}.{field} holds object references; constrain it through a traversal"
            ))),
            kind => Ok(kind),
        }
    }

    fn attribute_kind(&self, operand: &Operand) -> Result<Option<FieldKind>> {
        match operand {
            Operand::Attribute(a) => {
                let type_name = object_type(self.kinds, a.owner.index(), "an attribute")?;
                Ok(Some(self.scalar_field(type_name, &a.name)?))
            }
            _ => Ok(None),
        }
    }

    fn predicate(&self, pred: &Predicate) -> Result<()> {
        match pred.op {
            PredicateOp::Compare(_) => self.comparison(pred),
            PredicateOp::IsNull => match &pred.left {
                Operand::Attribute(_) => self.attribute_kind(&pred.left).map(|_| ()),
                _ => Err(build_error("IS_NULL applies to attributes only")),
            },
            PredicateOp::In | PredicateOp::Contains => match (&pred.left, &pred.right) {
                (Operand::Match(left), Some(Operand::Match(right))) => {
                    let role = "a membership predicate";
                    match (&self.kinds[left.index()], &self.kinds[right.index()]) {
                        (MatchKind::Objects(_), MatchKind::Objects(_)) => {
                            object_type(self.kinds, left.index(), role)?;
                            Ok(())
                        }
                        (MatchKind::Values(a), MatchKind::Values(b)) if a == b => Ok(()),
                        _ => Err(build_error(format!(
                            "{role} needs two matches of the same kind"
                        ))),
                    }
                }
                _ => Err(build_error("IN and CONTAINS relate two matches")),
            },
        }
    }

    fn comparison(&self, pred: &Predicate) -> Result<()> {
        let Some(right) = &pred.right else {
            return Err(build_error("comparison without a right operand"));
        };
        match &pred.left {
            Operand::Count(_) => match right {
                Operand::Count(_) => Ok(()),
                Operand::Literal(Literal::Scalar(s)) if s.scalar_type() == ScalarType::Integer => {
                    Ok(())
                }
                _ => Err(build_error("a count compares with an integer or another count")),
            },
            Operand::Attribute(_) => {
                let kind = self.attribute_kind(&pred.left)?;
                self.comparable(kind, right)
            }
            Operand::Match(m) => match &self.kinds[m.index()] {
                MatchKind::Values(t) => self.comparable(Some(FieldKind::Scalar(*t)), right),
                MatchKind::Objects(_) => Err(build_error(
                    "object matches compare through their attributes",
                )),
            },
            Operand::Literal(_) => Err(build_error(
                "a predicate must start from a match, attribute or count",
            )),
        }
    }

    /// Right operand of a comparison against a value of `left` kind.
    fn comparable(&self, left: Option<FieldKind>, right: &Operand) -> Result<()> {
        match right {
            Operand::Attribute(_) => self.attribute_kind(right).map(|_| ()),
            Operand::Match(m) => match &self.kinds[m.index()] {
                MatchKind::Values(_) => Ok(()),
                MatchKind::Objects(_) => Err(build_error(
                    "compare against collected values or an attribute, not an object match",
                )),
            },
            Operand::Count(_) => Err(build_error("a count compares with a count")),
            Operand::Literal(literal) => match (left, literal) {
                (Some(FieldKind::Enum(expected)), Literal::Enum(e)) if e.type_name() == expected => {
                    Ok(())
                }
                (Some(FieldKind::Scalar(expected)), Literal::Scalar(s))
                    if numeric_compatible(expected, s.scalar_type()) =>
                {
                    Ok(())
                }
                (kind, _) => Err(build_error(format!(
                    "literal {} does not match the attribute type {kind:?}",
                    literal_text(literal)
                ))),
            },
        }
    }
}

fn numeric_compatible(expected: ScalarType, actual: ScalarType) -> bool {
    expected == actual
        || matches!(
            (expected, actual),
            (ScalarType::Integer, ScalarType::Float) | (ScalarType::Float, ScalarType::Integer)
        )
}

fn literal_text(literal: &Literal) -> String {
    match literal {
        Literal::Scalar(s) => s.to_string(),
        Literal::Enum(e) => e.to_string(),
    }
}

// ── Ordering ─────────────────────────────────────────────────────

/// Kahn's algorithm, always taking the lowest ready index.
fn topological_order(deps: &[BTreeSet<usize>]) -> Result<Vec<usize>> {
    let mut done = vec![false; deps.len()];
    let mut order = Vec::with_capacity(deps.len());
    while order.len() < deps.len() {
        let ready = (0..deps.len())
            .find(|i| !done[*i] && deps[*i].iter().all(|d| done[*d]))
            .ok_or_else(|| {
                let pending: Vec<usize> = (0..deps.len()).filter(|i| !done[*i]).collect();
                build_error(format!("cyclic dependency between matches {pending:?}"))
            })?;
        done[ready] = true;
        order.push(ready);
    }
    Ok(order)
}

fn transitive_deps(deps: &[BTreeSet<usize>], order: &[usize]) -> Vec<BTreeSet<usize>> {
    let mut all: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); deps.len()];
    for &index in order {
        let mut set = BTreeSet::new();
        for &d in &deps[index] {
            set.insert(d);
            set.extend(all[d].iter().copied());
        }
        all[index] = set;
    }
    all
}

// ── Push-down ────────────────────────────────────────────────────

/// Store condition equivalent to a filter made only of attribute-to-literal
/// comparisons and null tests on single-valued fields. Negations stay in
/// memory: the store's three-valued logic would drop nodes missing the
/// attribute. So do list fields, which match when any item does.
fn pushdown_condition(registry: &TypeRegistry, type_name: &str, expr: &Expr) -> Option<Condition> {
    if expr.contains_not() {
        return None;
    }
    to_condition(registry, type_name, expr)
}

fn to_condition(registry: &TypeRegistry, type_name: &str, expr: &Expr) -> Option<Condition> {
    match expr {
        Expr::Pred(pred) => {
            let Operand::Attribute(attr) = &pred.left else {
                return None;
            };
            let single = registry
                .field_in_hierarchy(type_name, &attr.name)
                .is_some_and(|f| !f.is_list());
            if !single {
                return None;
            }
            match (pred.op, &pred.right) {
                (PredicateOp::IsNull, None) => Some(Condition::IsNull(attr.name.clone())),
                (PredicateOp::Compare(op), Some(Operand::Literal(literal))) => {
                    let value = match literal {
                        Literal::Scalar(s) => scalar_to_property(s),
                        Literal::Enum(e) => e.name().into(),
                    };
                    Some(Condition::Compare {
                        key: attr.name.clone(),
                        op,
                        value,
                    })
                }
                _ => None,
            }
        }
        Expr::And(items) => items
            .iter()
            .map(|e| to_condition(registry, type_name, e))
            .collect::<Option<Vec<_>>>()
            .map(Condition::And),
        Expr::Or(items) => items
            .iter()
            .map(|e| to_condition(registry, type_name, e))
            .collect::<Option<Vec<_>>>()
            .map(Condition::Or),
        Expr::Not(_) => None,
    }
}
