//! Rendering of statements to parameterized Cypher.
//!
//! Every statement becomes one query. Values always travel as parameters;
//! only labels, relationship types and property keys are spliced into the
//! text, backtick-quoted.

use std::collections::BTreeMap;

use crate::statement::{
    Condition, Direction, Hop, NodeId, NodeQuery, PropertyValue, Statement, TraversalQuery,
};

/// How the rows of a rendered query map back to a statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    /// One row with an `id` column.
    CreatedId,
    /// Rows are ignored, but at least one must come back; otherwise the
    /// given node does not exist.
    RequireRow(NodeId),
    /// `id`, `labels`, `props` columns.
    Nodes,
    /// One row with a `count` column.
    Count,
    /// `id`, `type`, `start`, `end`, `props` columns.
    Relationships,
    /// `start`, `id`, `labels`, `props` columns.
    Paths,
}

/// A rendered query.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    pub text: String,
    pub params: BTreeMap<String, PropertyValue>,
    pub shape: RowShape,
}

/// Quote a label, relationship type or property key.
pub fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[derive(Default)]
struct Params {
    values: BTreeMap<String, PropertyValue>,
}

impl Params {
    fn add(&mut self, value: PropertyValue) -> String {
        let name = format!("p{}", self.values.len());
        self.values.insert(name.clone(), value);
        format!("${name}")
    }

    fn map(&mut self, props: &BTreeMap<String, PropertyValue>) -> String {
        // Maps are inlined key by key so they stay plain parameters.
        let entries: Vec<String> = props
            .iter()
            .map(|(k, v)| format!("{}: {}", quote(k), self.add(v.clone())))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

/// Render one statement.
pub fn render(statement: &Statement) -> CypherQuery {
    let mut params = Params::default();
    let (text, shape) = match statement {
        Statement::CreateNode { labels, properties } => (
            format!(
                "CREATE (n{}) SET n = {} RETURN id(n) AS id",
                label_suffix(labels),
                params.map(properties)
            ),
            RowShape::CreatedId,
        ),
        Statement::MergeNode {
            label,
            key,
            properties,
        } => {
            let key = params.map(key);
            (
                format!(
                    "MERGE (n:{} {}) SET n += {} RETURN id(n) AS id",
                    quote(label),
                    key,
                    params.map(properties)
                ),
                RowShape::CreatedId,
            )
        }
        Statement::SetProperties { id, properties } => {
            let id_param = params.add(PropertyValue::Int(*id));
            (
                format!(
                    "MATCH (n) WHERE id(n) = {} SET n = {} RETURN id(n) AS id",
                    id_param,
                    params.map(properties)
                ),
                RowShape::RequireRow(*id),
            )
        }
        Statement::DeleteRelationships { start, rel_type } => (
            format!(
                "MATCH (n) WHERE id(n) = {} OPTIONAL MATCH (n)-[r:{}]->() DELETE r \
                 RETURN DISTINCT id(n) AS id",
                params.add(PropertyValue::Int(*start)),
                quote(rel_type)
            ),
            RowShape::RequireRow(*start),
        ),
        Statement::CreateRelationship {
            start,
            end,
            rel_type,
            properties,
        } => {
            let s = params.add(PropertyValue::Int(*start));
            let e = params.add(PropertyValue::Int(*end));
            (
                format!(
                    "MATCH (a), (b) WHERE id(a) = {} AND id(b) = {} \
                     CREATE (a)-[r:{}]->(b) SET r = {} RETURN id(r) AS id",
                    s,
                    e,
                    quote(rel_type),
                    params.map(properties)
                ),
                RowShape::RequireRow(*start),
            )
        }
        Statement::FindNodes(query) => {
            let mut text = format!("MATCH (n){}", node_where(query, &mut params));
            text.push_str(
                " RETURN id(n) AS id, labels(n) AS labels, properties(n) AS props ORDER BY id",
            );
            if query.skip > 0 {
                text.push_str(&format!(" SKIP {}", params.add(PropertyValue::Int(query.skip as i64))));
            }
            if let Some(limit) = query.limit {
                text.push_str(&format!(" LIMIT {}", params.add(PropertyValue::Int(limit as i64))));
            }
            (text, RowShape::Nodes)
        }
        Statement::CountNodes(query) => (
            format!(
                "MATCH (n){} RETURN count(n) AS count",
                node_where(query, &mut params)
            ),
            RowShape::Count,
        ),
        Statement::FetchRelationships { start_ids } => (
            format!(
                "MATCH (n)-[r]->(m) WHERE id(n) IN {} RETURN id(r) AS id, type(r) AS type, \
                 id(n) AS start, id(m) AS end, properties(r) AS props ORDER BY id",
                params.add(id_list(start_ids))
            ),
            RowShape::Relationships,
        ),
        Statement::Traverse(query) => (traversal(query, &mut params), RowShape::Paths),
    };
    CypherQuery {
        text,
        params: params.values,
        shape,
    }
}

fn id_list(ids: &[NodeId]) -> PropertyValue {
    PropertyValue::List(ids.iter().map(|id| PropertyValue::Int(*id)).collect())
}

fn label_suffix(labels: &[String]) -> String {
    labels.iter().map(|l| format!(":{}", quote(l))).collect()
}

fn label_test(var: &str, labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = labels
        .iter()
        .map(|l| format!("{var}:{}", quote(l)))
        .collect();
    Some(format!("({})", alternatives.join(" OR ")))
}

fn node_where(query: &NodeQuery, params: &mut Params) -> String {
    let mut clauses = Vec::new();
    clauses.extend(label_test("n", &query.labels));
    if let Some(ids) = &query.ids {
        clauses.push(format!("id(n) IN {}", params.add(id_list(ids))));
    }
    if let Some(filter) = &query.filter {
        clauses.push(condition("n", filter, params));
    }
    where_clause(clauses)
}

fn where_clause(clauses: Vec<String>) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn condition(var: &str, cond: &Condition, params: &mut Params) -> String {
    match cond {
        Condition::Compare { key, op, value } => format!(
            "{var}.{} {} {}",
            quote(key),
            op.symbol(),
            params.add(value.clone())
        ),
        Condition::IsNull(key) => format!("{var}.{} IS NULL", quote(key)),
        Condition::And(items) if items.is_empty() => "true".to_string(),
        Condition::Or(items) if items.is_empty() => "false".to_string(),
        Condition::And(items) => join(var, items, " AND ", params),
        Condition::Or(items) => join(var, items, " OR ", params),
        Condition::Not(inner) => format!("NOT ({})", condition(var, inner, params)),
    }
}

fn join(var: &str, items: &[Condition], sep: &str, params: &mut Params) -> String {
    let parts: Vec<String> = items.iter().map(|c| condition(var, c, params)).collect();
    format!("({})", parts.join(sep))
}

fn hop_pattern(hop: &Hop) -> String {
    let range = match hop.max_hops {
        Some(max) => format!("*{}..{}", hop.min_hops, max),
        None => format!("*{}..", hop.min_hops),
    };
    let rel = format!("[:{}{}]", quote(&hop.rel_type), range);
    match hop.direction {
        Direction::Outgoing => format!("-{rel}->"),
        Direction::Incoming => format!("<-{rel}-"),
        Direction::Both => format!("-{rel}-"),
    }
}

/// Pairs come back grouped by start position, then by hop distance, then by
/// node id, which approximates breadth-first discovery order.
fn traversal(query: &TraversalQuery, params: &mut Params) -> String {
    let starts = params.add(id_list(&query.start_ids));
    let mut text = format!(
        "UNWIND range(0, size({starts}) - 1) AS idx WITH idx, {starts}[idx] AS sid "
    );
    if query.hops.is_empty() {
        text.push_str("MATCH p = (n) WHERE id(n) = sid");
    } else {
        text.push_str("MATCH (s) WHERE id(s) = sid MATCH p = (s)");
        for (i, hop) in query.hops.iter().enumerate() {
            text.push_str(&hop_pattern(hop));
            if i + 1 == query.hops.len() {
                text.push_str("(n)");
            } else {
                text.push_str("()");
            }
        }
    }

    let mut clauses = Vec::new();
    clauses.extend(label_test("n", &query.end_labels));
    if let Some(filter) = &query.end_filter {
        clauses.push(condition("n", filter, params));
    }
    if !clauses.is_empty() {
        let prefix = if query.hops.is_empty() { " AND " } else { " WHERE " };
        text.push_str(prefix);
        text.push_str(&clauses.join(" AND "));
    }

    text.push_str(
        " WITH idx, sid, n, min(length(p)) AS dist \
         RETURN sid AS start, id(n) AS id, labels(n) AS labels, properties(n) AS props \
         ORDER BY idx, dist, id",
    );
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{CompareOp, Properties};

    #[test]
    fn test_quote_escapes_backticks() {
        assert_eq!(quote("lastName"), "`lastName`");
        assert_eq!(quote("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_render_create_node() {
        let mut properties = Properties::new();
        properties.insert("firstName".to_string(), "John".into());
        let q = render(&Statement::CreateNode {
            labels: vec!["Person".to_string()],
            properties,
        });
        assert_eq!(
            q.text,
            "CREATE (n:`Person`) SET n = {`firstName`: $p0} RETURN id(n) AS id"
        );
        assert_eq!(q.params.get("p0"), Some(&PropertyValue::from("John")));
        assert_eq!(q.shape, RowShape::CreatedId);
    }

    #[test]
    fn test_render_find_nodes_with_condition() {
        let query = NodeQuery {
            labels: vec!["Person".to_string(), "Company".to_string()],
            ids: None,
            filter: Some(Condition::And(vec![
                Condition::eq("lastName", "Smith"),
                Condition::Not(Box::new(Condition::Compare {
                    key: "age".to_string(),
                    op: CompareOp::Gte,
                    value: PropertyValue::Int(30),
                })),
            ])),
            skip: 2,
            limit: Some(5),
        };
        let q = render(&Statement::FindNodes(query));
        assert_eq!(
            q.text,
            "MATCH (n) WHERE (n:`Person` OR n:`Company`) AND (n.`lastName` = $p0 AND NOT (n.`age` >= $p1)) \
             RETURN id(n) AS id, labels(n) AS labels, properties(n) AS props ORDER BY id SKIP $p2 LIMIT $p3"
        );
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_render_traversal() {
        let query = TraversalQuery {
            start_ids: vec![7],
            hops: vec![Hop {
                rel_type: "partOf".to_string(),
                direction: Direction::Outgoing,
                min_hops: 1,
                max_hops: None,
            }],
            end_labels: vec!["Area".to_string()],
            end_filter: None,
        };
        let q = render(&Statement::Traverse(query));
        assert!(q
            .text
            .contains("MATCH p = (s)-[:`partOf`*1..]->(n) WHERE (n:`Area`)"));
        assert!(q.text.ends_with("ORDER BY idx, dist, id"));
        assert_eq!(q.shape, RowShape::Paths);
    }

    #[test]
    fn test_render_incoming_bounded_hops() {
        let hop = Hop {
            rel_type: "pointsOfContact".to_string(),
            direction: Direction::Incoming,
            min_hops: 1,
            max_hops: Some(1),
        };
        assert_eq!(hop_pattern(&hop), "<-[:`pointsOfContact`*1..1]-");
    }
}
