//! Format-neutral wire tree and the graph writer that produces it.
//!
//! The writer walks a value graph once, depth first, assigning identity slots
//! to objects in first-seen order. The resulting [`Wire`] tree is then written
//! by the ordinal or named body writer.

use super::schema::{Shape, TypeRegistry, TypeSchema};
use super::value::{ObjectRef, Value};
use super::Format;
use crate::error::EncodingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deepest nesting of objects, lists and maps either side will handle.
pub const MAX_DEPTH: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Wire {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Wire>),
    Map(Vec<(Wire, Wire)>),
    /// `tag` names the enum type when the slot does not.
    Enum { tag: Option<String>, variant: Variant },
    /// First occurrence of an instance.
    Object {
        id: u32,
        tag: Option<String>,
        fields: Fields,
    },
    /// Later occurrence of an instance already written in this pass.
    Ref(u32),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Variant {
    Index(u32),
    Name(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Fields {
    /// Values in canonical field order, no names.
    Positional(Vec<Wire>),
    Named(Vec<(String, Wire)>),
}

impl Wire {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Wire::Null => "null",
            Wire::Bool(_) => "bool",
            Wire::Int(_) => "int",
            Wire::Float(_) => "float",
            Wire::Str(_) => "string",
            Wire::Bytes(_) => "bytes",
            Wire::List(_) => "list",
            Wire::Map(_) => "map",
            Wire::Enum { .. } => "enum",
            Wire::Object { .. } => "object",
            Wire::Ref(_) => "reference",
        }
    }
}

/// Per-call encoder state. Never shared between passes.
pub(crate) struct GraphWriter<'r> {
    registry: &'r TypeRegistry,
    format: Format,
    ids: HashMap<usize, u32>,
    next_id: u32,
    depth: usize,
}

impl<'r> GraphWriter<'r> {
    pub(crate) fn new(registry: &'r TypeRegistry, format: Format) -> Self {
        Self {
            registry,
            format,
            ids: HashMap::new(),
            next_id: 1,
            depth: 0,
        }
    }

    fn nested<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, EncodingError>,
    ) -> Result<T, EncodingError> {
        if self.depth > MAX_DEPTH {
            return Err(EncodingError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let out = step(self);
        self.depth -= 1;
        out
    }

    /// Number of distinct instances written so far.
    pub(crate) fn objects(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn write(&mut self, value: &Value, shape: &Shape) -> Result<Wire, EncodingError> {
        match (shape, value) {
            (Shape::Optional(_) | Shape::Any, Value::Null) => Ok(Wire::Null),
            (Shape::Optional(inner), value) => self.write(value, inner),
            (Shape::Any, value) => self.write_untyped(value),
            (Shape::Bool, Value::Bool(b)) => Ok(Wire::Bool(*b)),
            (Shape::Int, Value::Int(i)) => Ok(Wire::Int(*i)),
            (Shape::Float, Value::Float(f)) => Ok(Wire::Float(*f)),
            (Shape::Str, Value::Str(s)) => Ok(Wire::Str(s.clone())),
            (Shape::Bytes, Value::Bytes(b)) => Ok(Wire::Bytes(b.clone())),
            (Shape::List(item), Value::List(items)) => self.nested(|w| {
                items
                    .iter()
                    .map(|v| w.write(v, item))
                    .collect::<Result<_, _>>()
                    .map(Wire::List)
            }),
            (Shape::Map(key, val), Value::Map(entries)) => self.write_map(entries, key, val),
            (Shape::Enum(declared), Value::Enum { type_name, variant }) => {
                if declared != type_name {
                    return Err(EncodingError::NotAssignable {
                        declared: declared.clone(),
                        runtime: type_name.clone(),
                    });
                }
                self.write_enum(type_name, variant, false)
            }
            (Shape::Object(declared), Value::Object(object)) => {
                self.write_object(object, Some(declared))
            }
            (shape, value) => Err(EncodingError::ShapeMismatch {
                expected: shape.to_string(),
                found: value.kind().to_string(),
            }),
        }
    }

    fn write_untyped(&mut self, value: &Value) -> Result<Wire, EncodingError> {
        match value {
            Value::Null => Ok(Wire::Null),
            Value::Bool(b) => Ok(Wire::Bool(*b)),
            Value::Int(i) => Ok(Wire::Int(*i)),
            Value::Float(f) => Ok(Wire::Float(*f)),
            Value::Str(s) => Ok(Wire::Str(s.clone())),
            Value::Bytes(b) => Ok(Wire::Bytes(b.clone())),
            Value::List(items) => self.nested(|w| {
                items
                    .iter()
                    .map(|v| w.write_untyped(v))
                    .collect::<Result<_, _>>()
                    .map(Wire::List)
            }),
            Value::Map(entries) => self.write_map(entries, &Shape::Any, &Shape::Any),
            Value::Enum { type_name, variant } => self.write_enum(type_name, variant, true),
            Value::Object(object) => self.write_object(object, None),
        }
    }

    fn write_map(
        &mut self,
        entries: &[(Value, Value)],
        key: &Shape,
        val: &Shape,
    ) -> Result<Wire, EncodingError> {
        self.nested(|w| {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((w.write(k, key)?, w.write(v, val)?));
            }
            Ok(Wire::Map(out))
        })
    }

    fn write_enum(
        &mut self,
        type_name: &str,
        variant: &str,
        tagged: bool,
    ) -> Result<Wire, EncodingError> {
        let schema = self
            .registry
            .enumeration(type_name)
            .ok_or_else(|| EncodingError::UnregisteredType(type_name.to_string()))?;
        let index = schema
            .index_of(variant)
            .ok_or_else(|| EncodingError::UnknownVariant {
                type_name: type_name.to_string(),
                variant: variant.to_string(),
            })?;
        let variant = match self.format {
            Format::Ordinal => Variant::Index(index),
            Format::Named => Variant::Name(variant.to_string()),
        };
        Ok(Wire::Enum {
            tag: tagged.then(|| type_name.to_string()),
            variant,
        })
    }

    fn write_object(
        &mut self,
        object: &ObjectRef,
        declared: Option<&str>,
    ) -> Result<Wire, EncodingError> {
        let registry = self.registry;
        let type_name = object.type_name();
        let schema = registry
            .object(&type_name)
            .ok_or_else(|| EncodingError::UnregisteredType(type_name.clone()))?;

        if let Some(declared) = declared {
            if !registry.is_assignable(declared, &type_name) {
                return Err(EncodingError::NotAssignable {
                    declared: declared.to_string(),
                    runtime: type_name,
                });
            }
        }

        if let Some(id) = self.ids.get(&object.address()) {
            return Ok(Wire::Ref(*id));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(object.address(), id);

        let tag = match declared {
            Some(declared) if declared == type_name => None,
            _ => Some(schema.tag().to_string()),
        };

        let fields = self.nested(|w| w.write_fields(object, schema, type_name))?;
        Ok(Wire::Object { id, tag, fields })
    }

    fn write_fields(
        &mut self,
        object: &ObjectRef,
        schema: &TypeSchema,
        type_name: String,
    ) -> Result<Fields, EncodingError> {
        let mut values = object.fields();
        if let Some(extra) = values.keys().find(|k| schema.field_named(k).is_none()) {
            return Err(EncodingError::UnknownField {
                type_name,
                field: extra.clone(),
            });
        }

        let mut positional = Vec::new();
        let mut named = Vec::new();
        for field in schema.fields() {
            let value = match values.remove(&field.name) {
                Some(value) => value,
                None if field.shape.is_optional() => Value::Null,
                None => {
                    return Err(EncodingError::MissingField {
                        type_name,
                        field: field.name.clone(),
                    })
                }
            };
            let wire = self.write(&value, &field.shape)?;
            match self.format {
                Format::Ordinal => positional.push(wire),
                Format::Named => named.push((field.name.clone(), wire)),
            }
        }

        Ok(match self.format {
            Format::Ordinal => Fields::Positional(positional),
            Format::Named => Fields::Named(named),
        })
    }
}
