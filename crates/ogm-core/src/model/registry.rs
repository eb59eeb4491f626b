//! Registry of the domain types known to one domain.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DomainType, Field, TypeDefinition, TypeKind};
use crate::error::{ModelError, Result};

/// All domain types of one domain, in registration order.
///
/// Types are immutable once registered; a name can be registered only once.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: Vec<Arc<DomainType>>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<DomainType>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.types[i]))
    }

    /// Like [`TypeRegistry::get`], failing with [`ModelError::UnknownType`].
    pub fn require(&self, name: &str) -> Result<Arc<DomainType>> {
        self.get(name)
            .ok_or_else(|| ModelError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<DomainType>> {
        self.types.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name()).collect()
    }

    /// Every type assignable to `name`, including the type itself.
    pub fn assignable_to(&self, name: &str) -> Vec<Arc<DomainType>> {
        self.types
            .iter()
            .filter(|t| t.is_assignable_to(name))
            .cloned()
            .collect()
    }

    /// Node labels of all instantiable types assignable to `name`.
    pub fn instance_labels(&self, name: &str) -> Vec<String> {
        let mut labels: Vec<String> = self
            .assignable_to(name)
            .iter()
            .filter(|t| t.is_instantiable())
            .map(|t| t.simple_name().to_string())
            .collect();
        labels.dedup();
        labels
    }

    /// Find a field on `type_name` or, failing that, on any type assignable
    /// to it. Queries over a super type may constrain fields that only some
    /// of its subtypes declare.
    pub fn field_in_hierarchy(&self, type_name: &str, field: &str) -> Option<Field> {
        if let Some(f) = self.get(type_name).and_then(|t| t.field(field).cloned()) {
            return Some(f);
        }
        self.assignable_to(type_name)
            .iter()
            .find_map(|t| t.field(field).cloned())
    }

    /// Whether `name` is a registered enum type.
    pub fn is_enum(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.kind() == TypeKind::Enum)
    }

    /// Definitions of all types, super types before their descendants.
    pub fn definitions(&self) -> Vec<TypeDefinition> {
        self.types.iter().map(|t| t.definition()).collect()
    }

    /// Rebuild types from stored definitions.
    ///
    /// Definitions may arrive in any order; a definition is registered once
    /// all the types it links to are available. Definitions whose names are
    /// already registered are skipped.
    pub fn restore(&mut self, definitions: Vec<TypeDefinition>) -> Result<()> {
        let mut pending: Vec<TypeDefinition> = definitions
            .into_iter()
            .filter(|d| !self.contains(&d.name))
            .collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for def in pending {
                let ready = def.super_type.iter().all(|s| self.contains(s))
                    && def.interfaces.iter().all(|i| self.contains(i));
                if ready {
                    self.register(def)?;
                } else {
                    deferred.push(def);
                }
            }
            if deferred.len() == before {
                // Nothing progressed: report the first unresolved link.
                let def = &deferred[0];
                let missing = def
                    .super_type
                    .iter()
                    .chain(def.interfaces.iter())
                    .find(|n| !self.contains(n))
                    .cloned()
                    .unwrap_or_default();
                return Err(ModelError::UnknownSuperType {
                    type_name: def.name.clone(),
                    super_type: missing,
                });
            }
            pending = deferred;
        }
        Ok(())
    }

    /// Validate a definition and register the resulting type.
    pub(crate) fn register(&mut self, def: TypeDefinition) -> Result<Arc<DomainType>> {
        if self.contains(&def.name) {
            return Err(ModelError::DuplicateType(def.name));
        }

        let super_type = match &def.super_type {
            Some(name) => {
                let sup = self.get(name).ok_or_else(|| ModelError::UnknownSuperType {
                    type_name: def.name.clone(),
                    super_type: name.clone(),
                })?;
                if def.kind != TypeKind::Class || sup.kind() != TypeKind::Class {
                    return Err(ModelError::InvalidSuperType {
                        type_name: def.name.clone(),
                        super_type: name.clone(),
                        reason: "only classes may extend classes".to_string(),
                    });
                }
                Some(sup)
            }
            None => None,
        };

        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for name in &def.interfaces {
            let iface = self.get(name).ok_or_else(|| ModelError::UnknownSuperType {
                type_name: def.name.clone(),
                super_type: name.clone(),
            })?;
            if iface.kind() != TypeKind::Interface || def.kind == TypeKind::Enum {
                return Err(ModelError::InvalidSuperType {
                    type_name: def.name.clone(),
                    super_type: name.clone(),
                    reason: "only interfaces may be implemented".to_string(),
                });
            }
            interfaces.push(iface);
        }

        for (i, field) in def.fields.iter().enumerate() {
            if def.fields[..i].iter().any(|f| f.name() == field.name()) {
                return Err(ModelError::DuplicateField {
                    type_name: def.name.clone(),
                    field: field.name().to_string(),
                });
            }
        }
        for (i, value) in def.enum_values.iter().enumerate() {
            if def.enum_values[..i].contains(value) {
                return Err(ModelError::DuplicateEnumValue {
                    type_name: def.name.clone(),
                    value: value.clone(),
                });
            }
        }

        let ty = Arc::new(DomainType {
            name: def.name,
            kind: def.kind,
            is_abstract: def.is_abstract,
            super_type,
            interfaces,
            fields: def.fields,
            enum_values: def.enum_values,
        });

        tracing::debug!(type_name = %ty.name(), kind = %ty.kind(), "Domain type registered");
        self.by_name.insert(ty.name().to_string(), self.types.len());
        self.types.push(Arc::clone(&ty));
        Ok(ty)
    }
}
