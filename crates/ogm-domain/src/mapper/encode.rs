//! Translation between object fields and node properties.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use ogm_core::{
    DomainGraph, DomainObject, EnumValue, Field, FieldType, ObjRef, Scalar, ScalarType,
    TypeRegistry, Value,
};
use ogm_graph::{NodeId, Properties, PropertyValue};
use serde::Serialize;

use crate::error::{DomainError, Result};

/// Domain name property present on every instance and metadata node.
pub(crate) const DOMAIN_KEY: &str = "__domain";
/// Fully qualified type name of an instance node.
pub(crate) const TYPE_KEY: &str = "__type";
/// Position of a list element on its relationship.
pub(crate) const INDEX_KEY: &str = "__idx";
/// Names of reference list fields that are set but hold no element. Such a
/// field writes no relationship, so the node has to say it is not unset.
pub(crate) const EMPTY_LISTS_KEY: &str = "__emptyLists";

/// How a field is stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldKind {
    Scalar(ScalarType),
    Enum(String),
    Reference(String),
}

pub(crate) fn field_kind(registry: &TypeRegistry, field: &Field) -> FieldKind {
    match field.field_type() {
        FieldType::Scalar(s) => FieldKind::Scalar(*s),
        FieldType::Named(name) if registry.is_enum(name) => FieldKind::Enum(name.clone()),
        FieldType::Named(name) => FieldKind::Reference(name.clone()),
    }
}

pub(crate) fn scalar_to_property(scalar: &Scalar) -> PropertyValue {
    match scalar {
        Scalar::String(s) => PropertyValue::String(s.clone()),
        Scalar::Integer(i) => PropertyValue::Int(*i),
        Scalar::Float(f) => PropertyValue::Float(*f),
        Scalar::Boolean(b) => PropertyValue::Bool(*b),
        Scalar::Date(d) => PropertyValue::String(d.to_rfc3339()),
    }
}

/// Property form of a scalar or enum value; object references have none.
pub(crate) fn value_to_property(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Scalar(s) => Some(scalar_to_property(s)),
        Value::Enum(e) => Some(PropertyValue::String(e.name().to_string())),
        Value::Object(_) => None,
    }
}

fn decode_error(field: &str, expected: &str, actual: &PropertyValue) -> DomainError {
    DomainError::Decode(format!(
        "property {field}: expected {expected}, found {actual:?}"
    ))
}

pub(crate) fn property_to_scalar(
    field: &str,
    scalar_type: ScalarType,
    prop: &PropertyValue,
) -> Result<Scalar> {
    let scalar = match (scalar_type, prop) {
        (ScalarType::String, PropertyValue::String(s)) => Scalar::String(s.clone()),
        (ScalarType::Integer, PropertyValue::Int(i)) => Scalar::Integer(*i),
        (ScalarType::Float, PropertyValue::Float(f)) => Scalar::Float(*f),
        (ScalarType::Float, PropertyValue::Int(i)) => Scalar::Float(*i as f64),
        (ScalarType::Boolean, PropertyValue::Bool(b)) => Scalar::Boolean(*b),
        (ScalarType::Date, PropertyValue::String(s)) => {
            let parsed = DateTime::parse_from_rfc3339(s)
                .map_err(|e| DomainError::Decode(format!("property {field}: {e}")))?;
            Scalar::Date(parsed.with_timezone(&Utc))
        }
        _ => return Err(decode_error(field, scalar_type.name(), prop)),
    };
    Ok(scalar)
}

fn property_to_value(field: &str, kind: &FieldKind, prop: &PropertyValue) -> Result<Value> {
    match kind {
        FieldKind::Scalar(s) => Ok(Value::Scalar(property_to_scalar(field, *s, prop)?)),
        FieldKind::Enum(type_name) => match prop {
            PropertyValue::String(name) => Ok(Value::Enum(EnumValue::new(type_name, name))),
            other => Err(decode_error(field, type_name, other)),
        },
        FieldKind::Reference(_) => Err(DomainError::Decode(format!(
            "reference field {field} cannot be read from a property"
        ))),
    }
}

/// Node properties of an object: domain and type markers, every set
/// scalar and enum field, and the empty reference lists.
pub(crate) fn encode_properties(
    domain: &str,
    registry: &TypeRegistry,
    obj: &DomainObject,
) -> Properties {
    let mut props = Properties::new();
    props.insert(DOMAIN_KEY.to_string(), PropertyValue::from(domain));
    props.insert(TYPE_KEY.to_string(), PropertyValue::from(obj.type_name()));
    let mut empty_lists = Vec::new();
    for field in obj.domain_type().fields() {
        let Some(value) = obj.field(field.name()) else {
            continue;
        };
        if matches!(field_kind(registry, field), FieldKind::Reference(_)) {
            if field.is_list() && value.values().is_empty() {
                empty_lists.push(PropertyValue::from(field.name()));
            }
            continue;
        }
        let prop = if field.is_list() {
            PropertyValue::List(value.values().iter().filter_map(value_to_property).collect())
        } else {
            match value.as_single().and_then(value_to_property) {
                Some(p) => p,
                None => continue,
            }
        };
        props.insert(field.name().to_string(), prop);
    }
    if !empty_lists.is_empty() {
        props.insert(EMPTY_LISTS_KEY.to_string(), PropertyValue::List(empty_lists));
    }
    props
}

/// Reference list fields a node marks as set but empty.
pub(crate) fn empty_reference_lists(props: &Properties) -> BTreeSet<String> {
    match props.get(EMPTY_LISTS_KEY) {
        Some(PropertyValue::List(names)) => names
            .iter()
            .filter_map(PropertyValue::as_str)
            .map(String::from)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Everything that gets written for one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Encoded {
    pub properties: Properties,
    /// Target node ids per written reference field, in list order.
    pub relationships: BTreeMap<String, Vec<NodeId>>,
}

impl Encoded {
    /// BLAKE3 hash of the encoded content, hex encoded.
    pub fn hash(&self) -> Result<String> {
        let json =
            serde_json::to_vec(self).map_err(|e| DomainError::Decode(e.to_string()))?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }
}

/// Encode an object. Reference fields listed in `unresolved` and not set
/// in memory are left out, so relationships never loaded are not touched.
pub(crate) fn encode(
    domain: &str,
    registry: &TypeRegistry,
    graph: &DomainGraph,
    obj: ObjRef,
    unresolved: &BTreeSet<String>,
    node_id: impl Fn(ObjRef) -> Option<NodeId>,
) -> Result<Encoded> {
    let object = graph.get(obj)?;
    let mut relationships = BTreeMap::new();
    for field in object.domain_type().fields() {
        if !matches!(field_kind(registry, field), FieldKind::Reference(_)) {
            continue;
        }
        if unresolved.contains(field.name()) && !object.is_set(field.name()) {
            continue;
        }
        let mut targets = Vec::new();
        if let Some(value) = object.field(field.name()) {
            for target in value.object_refs() {
                let id = node_id(target).ok_or_else(|| {
                    DomainError::Decode(format!("object {target} has no store node"))
                })?;
                targets.push(id);
            }
        }
        relationships.insert(field.name().to_string(), targets);
    }
    Ok(Encoded {
        properties: encode_properties(domain, registry, object),
        relationships,
    })
}

/// Set the scalar and enum fields of `obj` from node properties, clearing
/// those the node does not carry. Reference lists the node marks as empty
/// are set to an empty list; a reference list that is empty in memory but
/// unmarked is cleared. Other reference fields are left alone.
pub(crate) fn decode_properties(
    registry: &TypeRegistry,
    graph: &mut DomainGraph,
    obj: ObjRef,
    props: &Properties,
) -> Result<()> {
    let fields: Vec<Field> = graph
        .get(obj)?
        .domain_type()
        .fields()
        .into_iter()
        .cloned()
        .collect();
    let empty_lists = empty_reference_lists(props);
    for field in fields {
        let kind = field_kind(registry, &field);
        if matches!(kind, FieldKind::Reference(_)) {
            if !field.is_list() {
                continue;
            }
            if empty_lists.contains(field.name()) {
                graph.set_list(obj, field.name(), Vec::new())?;
            } else if graph
                .get(obj)?
                .field(field.name())
                .is_some_and(|v| v.values().is_empty())
            {
                graph.clear_field(obj, field.name())?;
            }
            continue;
        }
        match props.get(field.name()) {
            None | Some(PropertyValue::Null) => graph.clear_field(obj, field.name())?,
            Some(PropertyValue::List(items)) if field.is_list() => {
                let values = items
                    .iter()
                    .map(|p| property_to_value(field.name(), &kind, p))
                    .collect::<Result<Vec<_>>>()?;
                graph.set_list(obj, field.name(), values)?;
            }
            Some(prop) => {
                let value = property_to_value(field.name(), &kind, prop)?;
                graph.set_field(obj, field.name(), value)?;
            }
        }
    }
    Ok(())
}
