//! Error types for schema linking and type building

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema linking, building and loading errors.
///
/// Every variant is fatal to the build in progress. Linking is deterministic,
/// so none of them are worth retrying with the same input.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate fully-qualified name: {name}")]
    DuplicateName { name: String },

    #[error("Unresolved reference '{reference}' from {from}")]
    UnresolvedReference { reference: String, from: String },

    #[error("Type mismatch on field {field}: {reason}")]
    TypeMismatch { field: String, reason: String },

    #[error("Invalid extension {extension}: {reason}")]
    InvalidExtension { extension: String, reason: String },

    #[error("Unsupported field type on {field}: {field_type}")]
    UnsupportedFieldType { field: String, field_type: String },

    #[error("Cannot parse default value '{value}' for field {field}: {reason}")]
    DefaultValueParse {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Missing dependency: {file} -> {dependency}")]
    MissingDependency { file: String, dependency: String },

    #[error("Schema file listed twice in one set: {0}")]
    DuplicateFile(String),

    #[error("Invalid schema descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Serialized form of {name} not found in schema file {file}")]
    SerializedRangeNotFound { name: String, file: String },

    #[error("Malformed {type_name} record: {reason}")]
    MalformedRecord { type_name: String, reason: String },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Truncated input: expected {expected} more bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Descriptor decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    pub(crate) fn malformed(type_name: &str, reason: impl Into<String>) -> Self {
        SchemaError::MalformedRecord {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }
}
