//! Graph mapper: writes object graphs to the store and reads them back.
//!
//! Storage layout:
//! - one node per object, labelled with the simple type name and carrying
//!   `__domain` and `__type` plus one property per scalar or enum field
//! - one relationship per reference, typed by the field name; list
//!   elements carry their position in `__idx`
//! - type metadata in `DomainInfo` / `DomainType` nodes (see [`meta`])

pub(crate) mod encode;
pub(crate) mod load;
pub(crate) mod meta;
mod store;
