//! ogm-core: Type model, object graph model, and configuration for the ogm
//! object-graph mapper.
//!
//! This crate provides the store-independent foundation used by the mapper
//! and the query engine:
//! - Domain types (classes, interfaces, enums) built at runtime through
//!   builders and kept in a [`TypeRegistry`]
//! - The object graph arena ([`DomainGraph`]) holding [`DomainObject`]s that
//!   reference each other by [`ObjRef`] handles, so cycles need no shared
//!   ownership
//! - Configuration management
//! - Model error types

pub mod config;
pub mod error;
pub mod model;
pub mod object;

pub use error::ModelError;
pub use model::{
    ClassBuilder, DomainType, EnumBuilder, Field, FieldType, InterfaceBuilder, ScalarType,
    TypeDefinition, TypeKind, TypeRegistry,
};
pub use object::{
    graph_equals, reachable, DomainGraph, DomainObject, EnumValue, FieldValue, ObjRef, Scalar,
    Value,
};
