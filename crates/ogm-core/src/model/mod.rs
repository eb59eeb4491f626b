//! Reflective type model for domain objects.
//!
//! Types are described at runtime: a closed set of kinds (class, interface,
//! enum), each carrying its own fields or values. Inheritance is resolved by
//! walking the explicit super-type chain, so no host-language type
//! definitions are needed to work with stored objects.

mod builder;
mod registry;

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use builder::{ClassBuilder, EnumBuilder, InterfaceBuilder};
pub use registry::TypeRegistry;

use crate::object::EnumValue;

// ── Kinds & field types ──────────────────────────────────────────

/// The kind of a domain type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Enum => "enum",
        };
        f.write_str(s)
    }
}

/// Scalar primitive types a field may hold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

impl ScalarType {
    /// Resolve a scalar type from its name. Accepts the canonical names and
    /// the common lower-case aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "String" | "string" | "str" => Some(Self::String),
            "Integer" | "integer" | "int" | "long" | "i64" => Some(Self::Integer),
            "Float" | "float" | "double" | "f64" => Some(Self::Float),
            "Boolean" | "boolean" | "bool" => Some(Self::Boolean),
            "Date" | "date" | "DateTime" => Some(Self::Date),
            _ => None,
        }
    }

    /// Canonical name of the scalar type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
        }
    }
}

/// Declared type of a field: a scalar, or the name of another domain type
/// (class, interface or enum).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum FieldType {
    Scalar(ScalarType),
    Named(String),
}

impl FieldType {
    /// Classify a type name: scalar names become [`FieldType::Scalar`],
    /// everything else names a domain type.
    pub fn from_name(name: &str) -> Self {
        match ScalarType::parse(name) {
            Some(s) => Self::Scalar(s),
            None => Self::Named(name.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Scalar(s) => s.name(),
            Self::Named(n) => n,
        }
    }
}

/// A declared field of a domain type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    name: String,
    field_type: FieldType,
    list: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType, list: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            list,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Whether the field holds an ordered list of values.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Whether the field is scalar-typed (stored as a node property).
    pub fn is_scalar(&self) -> bool {
        matches!(self.field_type, FieldType::Scalar(_))
    }

    fn describe(&self) -> String {
        if self.list {
            format!("{}: List<{}>", self.name, self.field_type.type_name())
        } else {
            format!("{}: {}", self.name, self.field_type.type_name())
        }
    }
}

// ── Domain types ─────────────────────────────────────────────────

/// An immutable domain type.
///
/// Super type and interfaces are held as shared links to the types they were
/// built from, so field and interface lookups walk the chain directly.
#[derive(Debug)]
pub struct DomainType {
    name: String,
    kind: TypeKind,
    is_abstract: bool,
    super_type: Option<Arc<DomainType>>,
    interfaces: Vec<Arc<DomainType>>,
    fields: Vec<Field>,
    enum_values: Vec<String>,
}

impl DomainType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simple name (last `.`-separated segment), used as the node label.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Whether instances of this type may be created.
    pub fn is_instantiable(&self) -> bool {
        self.kind == TypeKind::Class && !self.is_abstract
    }

    pub fn super_type(&self) -> Option<&Arc<DomainType>> {
        self.super_type.as_ref()
    }

    /// Interfaces declared directly on this type.
    pub fn declared_interfaces(&self) -> &[Arc<DomainType>] {
        &self.interfaces
    }

    /// All interfaces of this type, including those of ancestors and
    /// super-interfaces, each listed once.
    pub fn interfaces(&self) -> Vec<Arc<DomainType>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<Arc<DomainType>> = Vec::new();
        for ty in self.ancestry() {
            stack.extend(ty.interfaces.iter().rev().cloned());
            while let Some(iface) = stack.pop() {
                if seen.insert(iface.name.clone()) {
                    stack.extend(iface.interfaces.iter().rev().cloned());
                    out.push(iface);
                }
            }
        }
        out
    }

    /// Fields declared directly on this type.
    pub fn declared_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn declared_field_names(&self) -> Vec<&str> {
        self.fields.iter().map(Field::name).collect()
    }

    /// Effective fields: own and inherited, de-duplicated by name.
    ///
    /// Root ancestor fields come first. When a descendant redeclares a name,
    /// the most-derived declaration replaces the inherited one in place.
    pub fn fields(&self) -> Vec<&Field> {
        let chain: Vec<&DomainType> = self.ancestry().collect();
        let mut out: Vec<&Field> = Vec::new();
        for ty in chain.iter().rev() {
            for field in &ty.fields {
                match out.iter_mut().find(|f| f.name == field.name) {
                    Some(slot) => *slot = field,
                    None => out.push(field),
                }
            }
        }
        out
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields().into_iter().map(Field::name).collect()
    }

    /// Look up an effective field by name (most-derived wins).
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.ancestry()
            .find_map(|ty| ty.fields.iter().find(|f| f.name == name))
    }

    /// Enum values in declaration order (empty for non-enums).
    pub fn enum_values(&self) -> &[String] {
        &self.enum_values
    }

    /// Resolve one value of this enum type.
    pub fn enum_value(&self, name: &str) -> Option<EnumValue> {
        if self.kind != TypeKind::Enum || !self.enum_values.iter().any(|v| v == name) {
            return None;
        }
        Some(EnumValue::new(&self.name, name))
    }

    /// This type followed by its super types, most-derived first.
    pub fn ancestry(&self) -> impl Iterator<Item = &DomainType> {
        let mut next = Some(self);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.super_type.as_deref();
            Some(current)
        })
    }

    /// Whether a value of this type can be used where `type_name` is
    /// expected (same type, a super type, or an implemented interface).
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.ancestry().any(|t| t.name == type_name)
            || self.interfaces().iter().any(|i| i.name == type_name)
    }

    /// Multi-line rendering of the type, indented by `indent` per level.
    pub fn describe(&self, indent: &str) -> String {
        let mut out = String::new();
        let _ = write!(out, "{} {}", self.kind, self.name);
        if self.is_abstract {
            out.push_str(" (abstract)");
        }
        if let Some(sup) = &self.super_type {
            let _ = write!(out, " extends {}", sup.name);
        }
        if !self.interfaces.is_empty() {
            let names: Vec<&str> = self.interfaces.iter().map(|i| i.name()).collect();
            let _ = write!(out, " implements {}", names.join(", "));
        }
        out.push_str(" {\n");
        for value in &self.enum_values {
            let _ = writeln!(out, "{indent}{value}");
        }
        for field in self.fields() {
            let inherited = self.fields.iter().all(|f| f.name != field.name);
            let _ = write!(out, "{indent}{}", field.describe());
            if inherited {
                out.push_str(" (inherited)");
            }
            out.push('\n');
        }
        out.push('}');
        out
    }

    /// Serializable definition of this type (links replaced by names).
    pub fn definition(&self) -> TypeDefinition {
        TypeDefinition {
            name: self.name.clone(),
            kind: self.kind,
            is_abstract: self.is_abstract,
            super_type: self.super_type.as_ref().map(|s| s.name.clone()),
            interfaces: self.interfaces.iter().map(|i| i.name.clone()).collect(),
            fields: self.fields.clone(),
            enum_values: self.enum_values.clone(),
        }
    }
}

impl AsRef<str> for DomainType {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl PartialEq for DomainType {
    fn eq(&self, other: &Self) -> bool {
        self.definition() == other.definition()
    }
}

/// Flat, serializable description of a [`DomainType`].
///
/// This is what gets persisted as type metadata so that a fresh handle can
/// rebuild the model from stored data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub super_type: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        EnumBuilder::new("people.SubjectTypes")
            .value("NAT_PERSON")
            .value("JUR_PERSON")
            .build(&mut reg)
            .unwrap();
        InterfaceBuilder::new("people.PointOfContact")
            .build(&mut reg)
            .unwrap();
        ClassBuilder::new("people.Subject")
            .set_abstract()
            .field("subjectType", "people.SubjectTypes")
            .list_field("pointsOfContact", "people.PointOfContact")
            .field("name", "String")
            .build(&mut reg)
            .unwrap();
        ClassBuilder::new("people.Person")
            .super_type("people.Subject")
            .field("firstName", "String")
            .field("lastName", "String")
            .field("name", "Integer")
            .build(&mut reg)
            .unwrap();
        reg
    }

    #[test]
    fn test_fields_walk_super_chain() {
        let reg = people();
        let person = reg.get("people.Person").unwrap();
        assert_eq!(
            person.field_names(),
            vec!["subjectType", "pointsOfContact", "name", "firstName", "lastName"]
        );
        assert_eq!(
            person.declared_field_names(),
            vec!["firstName", "lastName", "name"]
        );
    }

    #[test]
    fn test_most_derived_field_wins() {
        let reg = people();
        let person = reg.get("people.Person").unwrap();
        let name = person.field("name").unwrap();
        assert_eq!(name.field_type(), &FieldType::Scalar(ScalarType::Integer));
        let subject = reg.get("people.Subject").unwrap();
        assert_eq!(
            subject.field("name").unwrap().field_type(),
            &FieldType::Scalar(ScalarType::String)
        );
    }

    #[test]
    fn test_simple_name_and_kind() {
        let reg = people();
        let person = reg.get("people.Person").unwrap();
        assert_eq!(person.simple_name(), "Person");
        assert_eq!(person.kind(), TypeKind::Class);
        assert!(person.is_instantiable());
        assert!(!reg.get("people.Subject").unwrap().is_instantiable());
        assert!(!reg.get("people.PointOfContact").unwrap().is_instantiable());
    }

    #[test]
    fn test_enum_value_lookup() {
        let reg = people();
        let st = reg.get("people.SubjectTypes").unwrap();
        assert_eq!(st.enum_values(), &["NAT_PERSON", "JUR_PERSON"]);
        let v = st.enum_value("NAT_PERSON").unwrap();
        assert_eq!(v.type_name(), "people.SubjectTypes");
        assert!(st.enum_value("ALIEN").is_none());
    }

    #[test]
    fn test_describe_marks_inherited_fields() {
        let reg = people();
        let text = reg.get("people.Person").unwrap().describe("   ");
        assert!(text.starts_with("class people.Person extends people.Subject {"));
        assert!(text.contains("   pointsOfContact: List<people.PointOfContact> (inherited)"));
        assert!(text.contains("   firstName: String\n"));
    }

    #[test]
    fn test_scalar_type_aliases() {
        assert_eq!(ScalarType::parse("int"), Some(ScalarType::Integer));
        assert_eq!(ScalarType::parse("Date"), Some(ScalarType::Date));
        assert_eq!(ScalarType::parse("people.Person"), None);
        assert_eq!(
            FieldType::from_name("people.Area"),
            FieldType::Named("people.Area".to_string())
        );
    }
}
