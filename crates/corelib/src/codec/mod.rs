//! Dual-format object-graph codec.
//!
//! # Formats
//!
//! - **Ordinal**: fields of a registered type are written positionally in
//!   name-sorted order, without names. The decoder uses the same sorted field
//!   list, so a schema that drifted between peers shows up as a count or kind
//!   mismatch, never as silently shifted data.
//! - **Named**: self-describing JSON. Unknown fields are ignored and missing
//!   optional fields read as null.
//!
//! # Identity
//!
//! Each pass owns an identity map. The first time an instance is met it is
//! written in full with a fresh id (1, 2, 3... in depth-first, first-seen
//! order); every later occurrence is written as a back-reference to that id.
//! Decoding splices back-references onto the one decoded instance, so shared
//! nodes stay shared and cycles close. A back-reference may also point at an
//! instance written under a field the decoding side does not know.
//!
//! Nesting of objects, lists and maps is capped at [`MAX_DEPTH`] in both
//! directions and both formats.
//!
//! # Polymorphism
//!
//! When a slot is declared as a base type (or [`Shape::Any`]) and holds a
//! subtype, the subtype's discriminator is written next to its fields and
//! resolved through the [`TypeRegistry`] on decode.

mod named;
mod ordinal;
mod reader;
mod schema;
mod value;
mod wire;

pub use ordinal::MAX_BODY_BYTES;
pub use wire::MAX_DEPTH;
pub use schema::{
    Construction, EnumSchema, FieldSchema, Shape, TypeRegistry, TypeRegistryBuilder, TypeSchema,
};
pub use value::{Object, ObjectRef, Value};

use crate::error::{DecodingError, EncodingError};
use reader::GraphReader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use wire::GraphWriter;

/// Wire format selector, carried as a header on every envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Ordinal,
    Named,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Ordinal => "ordinal",
            Format::Named => "named",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ordinal" => Ok(Format::Ordinal),
            "named" => Ok(Format::Named),
            other => Err(format!("unknown wire format `{}`", other)),
        }
    }
}

/// Encodes and decodes value graphs against a fixed [`TypeRegistry`].
///
/// Holds no per-call state; safe to share across concurrent calls.
#[derive(Clone, Debug)]
pub struct SerializationEngine {
    registry: TypeRegistry,
}

impl SerializationEngine {
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encode with an untyped root: a root object always carries its discriminator.
    pub fn encode(&self, value: &Value, format: Format) -> Result<Vec<u8>, EncodingError> {
        self.encode_as(value, &Shape::Any, format)
    }

    /// Encode a value into a slot declared as `shape`.
    pub fn encode_as(
        &self,
        value: &Value,
        shape: &Shape,
        format: Format,
    ) -> Result<Vec<u8>, EncodingError> {
        let mut writer = GraphWriter::new(&self.registry, format);
        let wire = writer.write(value, shape)?;
        let bytes = match format {
            Format::Ordinal => ordinal::to_bytes(&wire)?,
            Format::Named => named::to_bytes(&wire)?,
        };
        tracing::trace!(
            format = %format,
            bytes = bytes.len(),
            objects = writer.objects(),
            "encoded graph"
        );
        Ok(bytes)
    }

    /// Decode wire data expected to fill a slot declared as `expected`.
    pub fn decode(
        &self,
        bytes: &[u8],
        expected: &Shape,
        format: Format,
    ) -> Result<Value, DecodingError> {
        let wire = match format {
            Format::Ordinal => ordinal::from_bytes(bytes)?,
            Format::Named => named::from_bytes(bytes)?,
        };
        GraphReader::new(&self.registry, format).decode(wire, expected)
    }
}
