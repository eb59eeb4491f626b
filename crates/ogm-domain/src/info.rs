//! Read-only introspection of the domains kept in a store.

use ogm_core::{TypeKind, TypeRegistry};
use serde::Serialize;

use crate::connection::Connection;
use crate::error::Result;
use crate::mapper::meta;

/// Stored description of one domain type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainObjectType {
    pub type_name: String,
    /// Label of the nodes holding instances of the type.
    pub node_label: String,
    pub kind: TypeKind,
    pub declared_fields: Vec<String>,
    /// Declared and inherited fields.
    pub fields: Vec<String>,
}

/// The type model of one domain as recorded in the store.
#[derive(Debug)]
pub struct DomainInformation {
    domain: String,
    registry: TypeRegistry,
}

impl DomainInformation {
    /// Names of all domains with data in the store, sorted.
    pub fn available_domains(conn: &Connection) -> Result<Vec<String>> {
        meta::read_domain_names(conn)
    }

    pub fn for_domain(conn: &Connection, domain: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let mut registry = TypeRegistry::new();
        meta::load_registry(conn, &domain, &mut registry)?;
        Ok(Self { domain, registry })
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    /// Stored types sorted by name.
    pub fn domain_object_types(&self) -> Vec<DomainObjectType> {
        let mut types: Vec<DomainObjectType> = self
            .registry
            .types()
            .map(|t| DomainObjectType {
                type_name: t.name().to_string(),
                node_label: t.simple_name().to_string(),
                kind: t.kind(),
                declared_fields: t
                    .declared_field_names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
                fields: t.field_names().into_iter().map(String::from).collect(),
            })
            .collect();
        types.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        types
    }

    pub fn domain_object_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.names().into_iter().map(String::from).collect();
        names.sort();
        names
    }
}
