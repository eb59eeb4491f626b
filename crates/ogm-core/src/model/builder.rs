//! Builders for new domain types.
//!
//! A builder only collects a definition; `build` validates it against the
//! target registry and registers the resulting immutable type.

use std::sync::Arc;

use super::{DomainType, Field, FieldType, TypeDefinition, TypeKind, TypeRegistry};
use crate::error::Result;

/// Builds a class type.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    def: TypeDefinition,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: empty_definition(name.into(), TypeKind::Class),
        }
    }

    /// Register a single-valued field. `type_name` is a scalar name
    /// (`String`, `Integer`, ...) or the name of a domain type.
    pub fn field(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.def
            .fields
            .push(Field::new(name, FieldType::from_name(type_name), false));
        self
    }

    /// Register an ordered, list-valued field.
    pub fn list_field(mut self, name: impl Into<String>, type_name: &str) -> Self {
        self.def
            .fields
            .push(Field::new(name, FieldType::from_name(type_name), true));
        self
    }

    /// Wire single inheritance. The super type must already be built
    /// through the registry passed to [`ClassBuilder::build`].
    pub fn super_type(mut self, super_type: impl AsRef<str>) -> Self {
        self.def.super_type = Some(super_type.as_ref().to_string());
        self
    }

    pub fn interface(mut self, interface: impl AsRef<str>) -> Self {
        self.def.interfaces.push(interface.as_ref().to_string());
        self
    }

    pub fn set_abstract(mut self) -> Self {
        self.def.is_abstract = true;
        self
    }

    pub fn build(self, registry: &mut TypeRegistry) -> Result<Arc<DomainType>> {
        registry.register(self.def)
    }
}

/// Builds an interface type. Interfaces carry no fields of their own.
#[derive(Debug, Clone)]
pub struct InterfaceBuilder {
    def: TypeDefinition,
}

impl InterfaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: empty_definition(name.into(), TypeKind::Interface),
        }
    }

    /// Extend another interface.
    pub fn interface(mut self, interface: impl AsRef<str>) -> Self {
        self.def.interfaces.push(interface.as_ref().to_string());
        self
    }

    pub fn build(self, registry: &mut TypeRegistry) -> Result<Arc<DomainType>> {
        registry.register(self.def)
    }
}

/// Builds an enum type from an ordered set of distinct value names.
#[derive(Debug, Clone)]
pub struct EnumBuilder {
    def: TypeDefinition,
}

impl EnumBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            def: empty_definition(name.into(), TypeKind::Enum),
        }
    }

    pub fn value(mut self, name: impl Into<String>) -> Self {
        self.def.enum_values.push(name.into());
        self
    }

    pub fn build(self, registry: &mut TypeRegistry) -> Result<Arc<DomainType>> {
        registry.register(self.def)
    }
}

fn empty_definition(name: String, kind: TypeKind) -> TypeDefinition {
    TypeDefinition {
        name,
        kind,
        is_abstract: false,
        super_type: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        enum_values: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelError;

    #[test]
    fn test_duplicate_type_rejected() {
        let mut reg = TypeRegistry::new();
        ClassBuilder::new("a.Thing").build(&mut reg).unwrap();
        let err = ClassBuilder::new("a.Thing").build(&mut reg).unwrap_err();
        assert_eq!(err, ModelError::DuplicateType("a.Thing".to_string()));
    }

    #[test]
    fn test_unknown_super_type_rejected() {
        let mut reg = TypeRegistry::new();
        let err = ClassBuilder::new("a.Person")
            .super_type("a.Subject")
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownSuperType { .. }));
        assert!(reg.get("a.Person").is_none());
    }

    #[test]
    fn test_unknown_interface_rejected() {
        let mut reg = TypeRegistry::new();
        let err = ClassBuilder::new("a.Address")
            .interface("a.PointOfContact")
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownSuperType { .. }));
    }

    #[test]
    fn test_super_type_from_other_registry_rejected() {
        let mut other = TypeRegistry::new();
        let subject = ClassBuilder::new("a.Subject").build(&mut other).unwrap();

        let mut reg = TypeRegistry::new();
        let err = ClassBuilder::new("a.Person")
            .super_type(subject.name())
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownSuperType { .. }));
    }

    #[test]
    fn test_interface_cannot_be_super_type() {
        let mut reg = TypeRegistry::new();
        InterfaceBuilder::new("a.Contact").build(&mut reg).unwrap();
        let err = ClassBuilder::new("a.Address")
            .super_type("a.Contact")
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSuperType { .. }));
    }

    #[test]
    fn test_duplicate_declared_field_rejected() {
        let mut reg = TypeRegistry::new();
        let err = ClassBuilder::new("a.Person")
            .field("name", "String")
            .field("name", "String")
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateField { .. }));
    }

    #[test]
    fn test_duplicate_enum_value_rejected() {
        let mut reg = TypeRegistry::new();
        let err = EnumBuilder::new("a.Gender")
            .value("MALE")
            .value("MALE")
            .build(&mut reg)
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateEnumValue { .. }));
    }

    #[test]
    fn test_interfaces_include_inherited() {
        let mut reg = TypeRegistry::new();
        InterfaceBuilder::new("a.Named").build(&mut reg).unwrap();
        InterfaceBuilder::new("a.Contact")
            .interface("a.Named")
            .build(&mut reg)
            .unwrap();
        ClassBuilder::new("a.Base")
            .interface("a.Contact")
            .build(&mut reg)
            .unwrap();
        let derived = ClassBuilder::new("a.Derived")
            .super_type("a.Base")
            .build(&mut reg)
            .unwrap();
        let names: Vec<String> = derived
            .interfaces()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["a.Contact", "a.Named"]);
        assert!(derived.is_assignable_to("a.Named"));
        assert!(derived.is_assignable_to("a.Base"));
        assert!(!derived.is_assignable_to("a.Other"));
        assert!(derived.declared_interfaces().is_empty());
    }
}
