//! Graph reader: rebuilds values from a wire tree against declared shapes.

use super::schema::{Construction, FieldSchema, Shape, TypeRegistry, TypeSchema};
use super::value::{ObjectRef, Value};
use super::wire::{Fields, Variant, Wire, MAX_DEPTH};
use super::Format;
use crate::error::DecodingError;
use std::collections::{BTreeMap, HashMap};

enum Slot {
    Ready(ObjectRef),
    /// Eager instance whose fields are still being read.
    Building(String),
}

/// An object body lifted out of the tree, waiting for its first use.
struct Body {
    tag: Option<String>,
    fields: Fields,
}

/// Per-call decoder state. Never shared between passes.
///
/// Every object body is first lifted into `bodies` and replaced by a
/// reference, then built the first time a slot asks for it. Bodies under
/// fields the local schema does not know are never built unless something
/// else refers to them, and a reference may come before its body.
pub(crate) struct GraphReader<'r> {
    registry: &'r TypeRegistry,
    format: Format,
    slots: HashMap<u32, Slot>,
    bodies: HashMap<u32, Body>,
    depth: usize,
}

impl<'r> GraphReader<'r> {
    pub(crate) fn new(registry: &'r TypeRegistry, format: Format) -> Self {
        Self {
            registry,
            format,
            slots: HashMap::new(),
            bodies: HashMap::new(),
            depth: 0,
        }
    }

    /// Decode a whole wire tree into a slot declared as `shape`.
    pub(crate) fn decode(mut self, wire: Wire, shape: &Shape) -> Result<Value, DecodingError> {
        let wire = self.lift(wire, 0)?;
        self.read(wire, shape)
    }

    /// Move each object body into `bodies`, leaving a reference behind.
    fn lift(&mut self, wire: Wire, depth: usize) -> Result<Wire, DecodingError> {
        let nested = matches!(wire, Wire::List(_) | Wire::Map(_) | Wire::Object { .. });
        if nested && depth > MAX_DEPTH {
            return Err(DecodingError::TooDeep { limit: MAX_DEPTH });
        }
        let lifted = match wire {
            Wire::List(items) => Wire::List(
                items
                    .into_iter()
                    .map(|w| self.lift(w, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Wire::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.lift(k, depth + 1)?, self.lift(v, depth + 1)?));
                }
                Wire::Map(out)
            }
            Wire::Object { id, tag, fields } => {
                let fields = match fields {
                    Fields::Positional(values) => Fields::Positional(
                        values
                            .into_iter()
                            .map(|w| self.lift(w, depth + 1))
                            .collect::<Result<_, _>>()?,
                    ),
                    Fields::Named(values) => {
                        let mut out = Vec::with_capacity(values.len());
                        for (name, w) in values {
                            out.push((name, self.lift(w, depth + 1)?));
                        }
                        Fields::Named(out)
                    }
                };
                if self.bodies.insert(id, Body { tag, fields }).is_some() {
                    return Err(defined_twice(id));
                }
                Wire::Ref(id)
            }
            other => other,
        };
        Ok(lifted)
    }

    fn nested<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, DecodingError>,
    ) -> Result<T, DecodingError> {
        if self.depth > MAX_DEPTH {
            return Err(DecodingError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let out = step(self);
        self.depth -= 1;
        out
    }

    fn read(&mut self, wire: Wire, shape: &Shape) -> Result<Value, DecodingError> {
        match (shape, wire) {
            (Shape::Optional(_) | Shape::Any, Wire::Null) => Ok(Value::Null),
            (Shape::Optional(inner), wire) => self.read(wire, inner),
            (Shape::Any, wire) => self.read_untyped(wire),
            (Shape::Bool, Wire::Bool(b)) => Ok(Value::Bool(b)),
            (Shape::Int, Wire::Int(i)) => Ok(Value::Int(i)),
            (Shape::Float, Wire::Float(f)) => Ok(Value::Float(f)),
            (Shape::Str, Wire::Str(s)) => Ok(Value::Str(s)),
            (Shape::Bytes, Wire::Bytes(b)) => Ok(Value::Bytes(b)),
            (Shape::List(item), Wire::List(items)) => self.nested(|r| {
                items
                    .into_iter()
                    .map(|w| r.read(w, item))
                    .collect::<Result<_, _>>()
                    .map(Value::List)
            }),
            (Shape::Map(key, val), Wire::Map(entries)) => self.read_map(entries, key, val),
            (Shape::Enum(declared), Wire::Enum { tag, variant }) => {
                if let Some(tag) = tag {
                    if &tag != declared {
                        return Err(DecodingError::SchemaMismatch(format!(
                            "enum slot `{}` holds `{}`",
                            declared, tag
                        )));
                    }
                }
                self.read_enum(declared, variant)
            }
            // Named bodies write a declared enum as its bare variant name.
            (Shape::Enum(declared), Wire::Str(name)) if self.format == Format::Named => {
                self.read_enum(declared, Variant::Name(name))
            }
            (Shape::Object(declared), Wire::Object { id, tag, fields }) => {
                self.nested(|r| r.read_object(Some(declared), id, tag, fields))
            }
            (Shape::Object(declared), Wire::Ref(id)) => self.resolve(id, Some(declared)),
            (shape, wire) => Err(DecodingError::SchemaMismatch(format!(
                "expected {}, found {}",
                shape,
                wire.kind()
            ))),
        }
    }

    fn read_untyped(&mut self, wire: Wire) -> Result<Value, DecodingError> {
        match wire {
            Wire::Null => Ok(Value::Null),
            Wire::Bool(b) => Ok(Value::Bool(b)),
            Wire::Int(i) => Ok(Value::Int(i)),
            Wire::Float(f) => Ok(Value::Float(f)),
            Wire::Str(s) => Ok(Value::Str(s)),
            Wire::Bytes(b) => Ok(Value::Bytes(b)),
            Wire::List(items) => self.nested(|r| {
                items
                    .into_iter()
                    .map(|w| r.read_untyped(w))
                    .collect::<Result<_, _>>()
                    .map(Value::List)
            }),
            Wire::Map(entries) => self.read_map(entries, &Shape::Any, &Shape::Any),
            Wire::Enum {
                tag: Some(tag),
                variant,
            } => self.read_enum(&tag, variant),
            Wire::Enum { tag: None, .. } => Err(DecodingError::SchemaMismatch(
                "untagged enum in an untyped slot".into(),
            )),
            Wire::Object { id, tag, fields } => self.nested(|r| r.read_object(None, id, tag, fields)),
            Wire::Ref(id) => self.resolve(id, None),
        }
    }

    fn read_map(
        &mut self,
        entries: Vec<(Wire, Wire)>,
        key: &Shape,
        val: &Shape,
    ) -> Result<Value, DecodingError> {
        self.nested(|r| {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((r.read(k, key)?, r.read(v, val)?));
            }
            Ok(Value::Map(out))
        })
    }

    fn read_enum(&self, type_name: &str, variant: Variant) -> Result<Value, DecodingError> {
        let schema = self
            .registry
            .enumeration(type_name)
            .ok_or_else(|| DecodingError::UnresolvedDiscriminator(type_name.to_string()))?;
        let variant = match variant {
            Variant::Index(index) => schema.variant_at(index).map(str::to_string),
            Variant::Name(name) => schema.index_of(&name).map(|_| name),
        }
        .ok_or_else(|| {
            DecodingError::SchemaMismatch(format!("no such variant of enum `{}`", type_name))
        })?;
        Ok(Value::Enum {
            type_name: type_name.to_string(),
            variant,
        })
    }

    fn resolve(&mut self, id: u32, declared: Option<&str>) -> Result<Value, DecodingError> {
        if let Some(Body { tag, fields }) = self.bodies.remove(&id) {
            return self.nested(|r| r.read_object(declared, id, tag, fields));
        }
        match self.slots.get(&id) {
            None => Err(DecodingError::DanglingReference(id)),
            Some(Slot::Building(type_name)) => Err(DecodingError::CyclicResolution {
                type_name: type_name.clone(),
                id,
            }),
            Some(Slot::Ready(object)) => {
                if let Some(declared) = declared {
                    let runtime = object.type_name();
                    if !self.registry.is_assignable(declared, &runtime) {
                        return Err(DecodingError::SchemaMismatch(format!(
                            "reference to `{}` in a `{}` slot",
                            runtime, declared
                        )));
                    }
                }
                Ok(Value::Object(object.clone()))
            }
        }
    }

    fn read_object(
        &mut self,
        declared: Option<&str>,
        id: u32,
        tag: Option<String>,
        fields: Fields,
    ) -> Result<Value, DecodingError> {
        if self.slots.contains_key(&id) {
            return Err(defined_twice(id));
        }

        let registry = self.registry;
        let schema = match (&tag, declared) {
            (Some(tag), _) => registry
                .by_discriminator(tag)
                .ok_or_else(|| DecodingError::UnresolvedDiscriminator(tag.clone()))?,
            (None, Some(declared)) => registry.object(declared).ok_or_else(|| {
                DecodingError::UnresolvedDiscriminator(declared.to_string())
            })?,
            (None, None) => {
                return Err(DecodingError::SchemaMismatch(
                    "untagged object in an untyped slot".into(),
                ))
            }
        };
        if let Some(declared) = declared {
            if !registry.is_assignable(declared, schema.name()) {
                return Err(DecodingError::SchemaMismatch(format!(
                    "`{}` is not assignable to `{}`",
                    schema.name(),
                    declared
                )));
            }
        }

        let pairs = self.match_fields(schema, fields)?;

        match schema.construction_mode() {
            Construction::Deferred => {
                let object = ObjectRef::new(schema.name());
                self.slots.insert(id, Slot::Ready(object.clone()));
                let values = self.read_fields(pairs)?;
                object.replace_fields(values);
                Ok(Value::Object(object))
            }
            Construction::Eager => {
                self.slots
                    .insert(id, Slot::Building(schema.name().to_string()));
                let values = self.read_fields(pairs)?;
                let object = ObjectRef::new(schema.name());
                object.replace_fields(values);
                self.slots.insert(id, Slot::Ready(object.clone()));
                Ok(Value::Object(object))
            }
        }
    }

    fn read_fields(
        &mut self,
        pairs: Vec<(&'r FieldSchema, Wire)>,
    ) -> Result<BTreeMap<String, Value>, DecodingError> {
        let mut values = BTreeMap::new();
        for (field, wire) in pairs {
            let value = self.read(wire, &field.shape)?;
            values.insert(field.name.clone(), value);
        }
        Ok(values)
    }

    /// Pair each schema field with its wire value, in canonical order.
    fn match_fields(
        &self,
        schema: &'r TypeSchema,
        fields: Fields,
    ) -> Result<Vec<(&'r FieldSchema, Wire)>, DecodingError> {
        match (self.format, fields) {
            (Format::Ordinal, Fields::Positional(values)) => {
                if values.len() != schema.fields().len() {
                    return Err(DecodingError::SchemaMismatch(format!(
                        "`{}` expects {} fields, found {}",
                        schema.name(),
                        schema.fields().len(),
                        values.len()
                    )));
                }
                Ok(schema.fields().iter().zip(values).collect())
            }
            (Format::Named, Fields::Named(values)) => {
                let mut by_name: HashMap<String, Wire> = values.into_iter().collect();
                let mut pairs = Vec::with_capacity(schema.fields().len());
                for field in schema.fields() {
                    match by_name.remove(&field.name) {
                        Some(wire) => pairs.push((field, wire)),
                        None if field.shape.is_optional() => pairs.push((field, Wire::Null)),
                        None => {
                            return Err(DecodingError::SchemaMismatch(format!(
                                "`{}` is missing required field `{}`",
                                schema.name(),
                                field.name
                            )))
                        }
                    }
                }
                Ok(pairs)
            }
            (format, _) => Err(DecodingError::Malformed(format!(
                "field layout does not match the {} format",
                format
            ))),
        }
    }
}

fn defined_twice(id: u32) -> DecodingError {
    DecodingError::Malformed(format!("identity {} defined twice", id))
}
