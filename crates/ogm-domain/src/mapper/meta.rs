//! Type metadata kept in the store next to instance data.
//!
//! One `DomainInfo` node per domain and one `DomainType` node per type hold
//! the serialized type definitions, so a fresh handle can rebuild the model.

use ogm_core::{TypeDefinition, TypeRegistry};
use ogm_graph::{Condition, NodeQuery, Properties, PropertyValue, Statement};

use super::encode::DOMAIN_KEY;
use crate::connection::Connection;
use crate::error::{DomainError, Result};

pub(crate) const DOMAIN_INFO_LABEL: &str = "DomainInfo";
pub(crate) const DOMAIN_TYPE_LABEL: &str = "DomainType";

/// Statements that create or refresh the metadata of every registered type.
pub(crate) fn write_statements(domain: &str, registry: &TypeRegistry) -> Result<Vec<Statement>> {
    let mut statements = Vec::with_capacity(registry.len() + 1);
    let mut key = Properties::new();
    key.insert("name".to_string(), PropertyValue::from(domain));
    statements.push(Statement::MergeNode {
        label: DOMAIN_INFO_LABEL.to_string(),
        key,
        properties: Properties::new(),
    });

    for ty in registry.types() {
        let definition = serde_json::to_string(&ty.definition())
            .map_err(|e| DomainError::Decode(e.to_string()))?;
        let mut key = Properties::new();
        key.insert(DOMAIN_KEY.to_string(), PropertyValue::from(domain));
        key.insert("name".to_string(), PropertyValue::from(ty.name()));
        let mut properties = Properties::new();
        properties.insert("label".to_string(), PropertyValue::from(ty.simple_name()));
        properties.insert("kind".to_string(), PropertyValue::from(ty.kind().to_string()));
        properties.insert("definition".to_string(), PropertyValue::String(definition));
        statements.push(Statement::MergeNode {
            label: DOMAIN_TYPE_LABEL.to_string(),
            key,
            properties,
        });
    }
    Ok(statements)
}

/// Stored type definitions of a domain, in store order.
pub(crate) fn read_definitions(conn: &Connection, domain: &str) -> Result<Vec<TypeDefinition>> {
    let query = NodeQuery::with_labels(vec![DOMAIN_TYPE_LABEL.to_string()])
        .filter(Some(Condition::eq(DOMAIN_KEY, domain)));
    let nodes = conn.execute_one(Statement::FindNodes(query))?.into_nodes();
    nodes
        .iter()
        .map(|node| {
            let json = node
                .property("definition")
                .and_then(PropertyValue::as_str)
                .ok_or_else(|| {
                    DomainError::Decode(format!("type node {} has no definition", node.id))
                })?;
            serde_json::from_str(json).map_err(|e| DomainError::Decode(e.to_string()))
        })
        .collect()
}

/// Names of all domains with metadata in the store, sorted.
pub(crate) fn read_domain_names(conn: &Connection) -> Result<Vec<String>> {
    let query = NodeQuery::with_labels(vec![DOMAIN_INFO_LABEL.to_string()]);
    let nodes = conn.execute_one(Statement::FindNodes(query))?.into_nodes();
    let mut names: Vec<String> = nodes
        .iter()
        .filter_map(|n| n.property("name").and_then(PropertyValue::as_str))
        .map(String::from)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Load the stored model of `domain` into `registry`.
pub(crate) fn load_registry(
    conn: &Connection,
    domain: &str,
    registry: &mut TypeRegistry,
) -> Result<usize> {
    let definitions = read_definitions(conn, domain)?;
    let count = definitions.len();
    registry.restore(definitions)?;
    if count > 0 {
        tracing::debug!(domain, types = count, "Loaded domain model from store");
    }
    Ok(count)
}
