use thiserror::Error;

/// Errors raised by the type model and the object graph model.
///
/// All of these are detected synchronously, before any store interaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Duplicate type: {0} is already defined in this model")]
    DuplicateType(String),

    #[error("Unknown super type {super_type} for {type_name}: it was not built through this model")]
    UnknownSuperType {
        type_name: String,
        super_type: String,
    },

    #[error("Invalid super type {super_type} for {type_name}: {reason}")]
    InvalidSuperType {
        type_name: String,
        super_type: String,
        reason: String,
    },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown field {field} on type {type_name}")]
    UnknownField { type_name: String, field: String },

    #[error("Duplicate field {field} declared on type {type_name}")]
    DuplicateField { type_name: String, field: String },

    #[error("Unknown value {value} for enum {type_name}")]
    UnknownEnumValue { type_name: String, value: String },

    #[error("Duplicate value {value} for enum {type_name}")]
    DuplicateEnumValue { type_name: String, value: String },

    #[error("Type mismatch on {type_name}.{field}: expected {expected}, got {actual}")]
    TypeMismatch {
        type_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Type {0} cannot be instantiated")]
    NotInstantiable(String),

    #[error("Unknown object reference: {0}")]
    UnknownObject(u32),
}

pub type Result<T> = std::result::Result<T, ModelError>;
