//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be put on the wire.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// Wire data could not be turned back into a value.
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    /// The type registry was built from inconsistent schemas.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A save router is missing an operation it must have.
    #[error(transparent)]
    RoutingConfiguration(#[from] RoutingConfigurationError),
}

/// Failures while encoding a value graph.
///
/// Always surfaced to the caller; nothing is written on failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    /// Object or enum whose type name is not in the registry.
    #[error("unregistered type `{0}`")]
    UnregisteredType(String),
    #[error("enum `{type_name}` has no variant `{variant}`")]
    UnknownVariant { type_name: String, variant: String },
    /// Value kind does not fit the declared slot.
    #[error("expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
    /// Runtime type is not the declared type or one of its subtypes.
    #[error("type `{runtime}` is not assignable to `{declared}`")]
    NotAssignable { declared: String, runtime: String },
    #[error("object of type `{type_name}` is missing required field `{field}`")]
    MissingField { type_name: String, field: String },
    #[error("object of type `{type_name}` carries unknown field `{field}`")]
    UnknownField { type_name: String, field: String },
    #[error("non-finite float cannot be encoded in the named format")]
    NonFiniteFloat,
    #[error("graph nests deeper than {limit} levels")]
    TooDeep { limit: usize },
    /// The wire body writer failed.
    #[error("serialize: {0}")]
    Serialize(String),
}

/// Failures while decoding wire data.
///
/// A decode that fails never yields a partially built object.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodingError {
    /// Wrong element count or kind for the resolved schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unresolved discriminator `{0}`")]
    UnresolvedDiscriminator(String),
    /// Back-reference into an instance that needs all of its fields before it can exist.
    #[error("cyclic reference to `{type_name}` (id {id}) cannot be resolved: type is eagerly constructed")]
    CyclicResolution { type_name: String, id: u32 },
    #[error("reference to unknown id {0}")]
    DanglingReference(u32),
    #[error("graph nests deeper than {limit} levels")]
    TooDeep { limit: usize },
    /// Bytes are not a well-formed body for the format.
    #[error("malformed wire data: {0}")]
    Malformed(String),
}

/// Inconsistent schema set handed to the registry builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("type `{0}` registered twice")]
    DuplicateType(String),
    #[error("discriminator `{0}` used by more than one type")]
    DuplicateDiscriminator(String),
    #[error("type `{type_name}` declares field `{field}` twice")]
    DuplicateField { type_name: String, field: String },
    #[error("field name `{0}` is reserved")]
    ReservedField(String),
    #[error("`{from}` refers to unregistered type `{missing}`")]
    UnknownType { from: String, missing: String },
    #[error("inheritance cycle through `{0}`")]
    InheritanceCycle(String),
}

/// A save router that cannot route every state it may see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("save routing for `{entity}` has no {operation} implementation")]
pub struct RoutingConfigurationError {
    pub entity: String,
    pub operation: &'static str,
}
