//! Object graph model: domain object instances held in an arena.
//!
//! Objects reference each other through [`ObjRef`] handles into the owning
//! [`DomainGraph`], so reference cycles (a person's address leading back to
//! other persons) carry no ownership cycles. Identity is the handle: two
//! objects with equal field values are still distinct.

mod value;
mod walk;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use value::{EnumValue, FieldValue, Scalar, Value};
pub use walk::{graph_equals, reachable};

use crate::error::{ModelError, Result};
use crate::model::{DomainType, Field, FieldType};

/// Handle to an object inside a [`DomainGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A domain object: its type plus the values of the fields that are set.
#[derive(Debug, Clone)]
pub struct DomainObject {
    domain_type: Arc<DomainType>,
    fields: BTreeMap<String, FieldValue>,
}

impl DomainObject {
    pub fn domain_type(&self) -> &Arc<DomainType> {
        &self.domain_type
    }

    pub fn type_name(&self) -> &str {
        self.domain_type.name()
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Single value of a field, if set and single-valued.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(FieldValue::as_single)
    }

    pub fn scalar(&self, name: &str) -> Option<&Scalar> {
        self.value(name).and_then(Value::as_scalar)
    }

    pub fn str_value(&self, name: &str) -> Option<&str> {
        self.scalar(name).and_then(Scalar::as_str)
    }

    pub fn object(&self, name: &str) -> Option<ObjRef> {
        self.value(name).and_then(Value::as_object)
    }

    /// Values of a list field (empty if unset).
    pub fn list(&self, name: &str) -> &[Value] {
        self.fields
            .get(name)
            .and_then(FieldValue::as_list)
            .unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// Arena of domain objects.
#[derive(Debug, Clone, Default)]
pub struct DomainGraph {
    objects: Vec<DomainObject>,
}

impl DomainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn refs(&self) -> impl Iterator<Item = ObjRef> {
        (0..self.objects.len() as u32).map(ObjRef)
    }

    /// Create a new object of an instantiable class type.
    pub fn create(&mut self, domain_type: &Arc<DomainType>) -> Result<ObjRef> {
        if !domain_type.is_instantiable() {
            return Err(ModelError::NotInstantiable(domain_type.name().to_string()));
        }
        let r = ObjRef(self.objects.len() as u32);
        self.objects.push(DomainObject {
            domain_type: Arc::clone(domain_type),
            fields: BTreeMap::new(),
        });
        Ok(r)
    }

    pub fn get(&self, r: ObjRef) -> Result<&DomainObject> {
        self.objects
            .get(r.index())
            .ok_or(ModelError::UnknownObject(r.0))
    }

    /// Set a single-valued field, replacing any previous value.
    pub fn set_field(&mut self, r: ObjRef, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let field = self.field_of(r, name)?;
        if field.is_list() {
            return Err(self.mismatch(r, &field, "single value".to_string()));
        }
        self.check_value(r, &field, &value)?;
        self.obj_mut(r)?
            .fields
            .insert(name.to_string(), FieldValue::Single(value));
        Ok(())
    }

    /// Append one value to a list field.
    pub fn add_list_value(
        &mut self,
        r: ObjRef,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let field = self.field_of(r, name)?;
        if !field.is_list() {
            return Err(self.mismatch(r, &field, "list value".to_string()));
        }
        self.check_value(r, &field, &value)?;
        let slot = self
            .obj_mut(r)?
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldValue::List(Vec::new()));
        if let FieldValue::List(items) = slot {
            items.push(value);
        }
        Ok(())
    }

    /// Replace a list field with the given values.
    pub fn set_list(&mut self, r: ObjRef, name: &str, values: Vec<Value>) -> Result<()> {
        let field = self.field_of(r, name)?;
        if !field.is_list() {
            return Err(self.mismatch(r, &field, "list value".to_string()));
        }
        for v in &values {
            self.check_value(r, &field, v)?;
        }
        self.obj_mut(r)?
            .fields
            .insert(name.to_string(), FieldValue::List(values));
        Ok(())
    }

    /// Unset a field.
    pub fn clear_field(&mut self, r: ObjRef, name: &str) -> Result<()> {
        self.field_of(r, name)?;
        self.obj_mut(r)?.fields.remove(name);
        Ok(())
    }

    /// Unset every field of an object.
    pub fn clear_fields(&mut self, r: ObjRef) -> Result<()> {
        self.obj_mut(r)?.fields.clear();
        Ok(())
    }

    fn obj_mut(&mut self, r: ObjRef) -> Result<&mut DomainObject> {
        self.objects
            .get_mut(r.index())
            .ok_or(ModelError::UnknownObject(r.0))
    }

    fn field_of(&self, r: ObjRef, name: &str) -> Result<Field> {
        let obj = self.get(r)?;
        obj.domain_type
            .field(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownField {
                type_name: obj.type_name().to_string(),
                field: name.to_string(),
            })
    }

    fn check_value(&self, r: ObjRef, field: &Field, value: &Value) -> Result<()> {
        let ok = match (field.field_type(), value) {
            (FieldType::Scalar(expected), Value::Scalar(s)) => s.scalar_type() == *expected,
            (FieldType::Named(expected), Value::Enum(e)) => e.type_name() == expected,
            (FieldType::Named(expected), Value::Object(target)) => self
                .get(*target)?
                .domain_type
                .is_assignable_to(expected),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.mismatch(r, field, value.kind_name()))
        }
    }

    fn mismatch(&self, r: ObjRef, field: &Field, actual: String) -> ModelError {
        let type_name = self
            .get(r)
            .map(|o| o.type_name().to_string())
            .unwrap_or_default();
        ModelError::TypeMismatch {
            type_name,
            field: field.name().to_string(),
            expected: if field.is_list() {
                format!("List<{}>", field.field_type().type_name())
            } else {
                field.field_type().type_name().to_string()
            },
            actual,
        }
    }
}
