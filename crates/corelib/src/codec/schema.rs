//! Declared shapes and the immutable type registry.
//!
//! The registry is the explicit replacement for runtime type introspection:
//! every object type that may cross the wire is described once, at startup,
//! by a [`TypeSchema`], and every enum by an [`EnumSchema`].

use crate::error::RegistryError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// What a slot is declared to hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Any supported value; objects in such a slot always carry a discriminator.
    Any,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    /// The inner shape or null.
    Optional(Box<Shape>),
    List(Box<Shape>),
    Map(Box<Shape>, Box<Shape>),
    Enum(String),
    /// A registered object type or any of its registered subtypes.
    Object(String),
}

impl Shape {
    pub fn optional(inner: Shape) -> Self {
        Shape::Optional(Box::new(inner))
    }

    pub fn list(item: Shape) -> Self {
        Shape::List(Box::new(item))
    }

    pub fn map(key: Shape, value: Shape) -> Self {
        Shape::Map(Box::new(key), Box::new(value))
    }

    pub fn object(name: impl Into<String>) -> Self {
        Shape::Object(name.into())
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Shape::Enum(name.into())
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Shape::Optional(_) | Shape::Any)
    }

    fn referenced_types<'a>(&'a self, out: &mut Vec<&'a Shape>) {
        match self {
            Shape::Optional(inner) | Shape::List(inner) => inner.referenced_types(out),
            Shape::Map(key, value) => {
                key.referenced_types(out);
                value.referenced_types(out);
            }
            Shape::Enum(_) | Shape::Object(_) => out.push(self),
            _ => {}
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => write!(f, "any"),
            Shape::Bool => write!(f, "bool"),
            Shape::Int => write!(f, "int"),
            Shape::Float => write!(f, "float"),
            Shape::Str => write!(f, "string"),
            Shape::Bytes => write!(f, "bytes"),
            Shape::Optional(inner) => write!(f, "{}?", inner),
            Shape::List(item) => write!(f, "list<{}>", item),
            Shape::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            Shape::Enum(name) => write!(f, "enum {}", name),
            Shape::Object(name) => write!(f, "{}", name),
        }
    }
}

/// How a decoded instance comes into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Construction {
    /// Created empty, fields patched in afterwards. Supports cycles.
    #[default]
    Deferred,
    /// Needs every field before the instance exists. A cycle back into an
    /// instance of such a type cannot be resolved.
    Eager,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub shape: Shape,
}

/// Schema of one registered object type.
#[derive(Clone, Debug)]
pub struct TypeSchema {
    name: String,
    discriminator: String,
    extends: Option<String>,
    construction: Construction,
    fields: Vec<FieldSchema>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            discriminator: name.clone(),
            name,
            extends: None,
            construction: Construction::Deferred,
            fields: Vec::new(),
        }
    }

    /// Wire tag used when this type fills a broader slot. Defaults to the name.
    pub fn discriminator(mut self, tag: impl Into<String>) -> Self {
        self.discriminator = tag.into();
        self
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    pub fn construction(mut self, construction: Construction) -> Self {
        self.construction = construction;
        self
    }

    /// Add a field. Field order is irrelevant: fields are kept sorted by name.
    pub fn field(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            shape,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.discriminator
    }

    pub fn base(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn construction_mode(&self) -> Construction {
        self.construction
    }

    /// Fields in canonical (name-sorted) order, the ordinal wire order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldSchema> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.fields[i])
    }
}

/// Schema of one registered enum: its variants in declared order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumSchema {
    name: String,
    variants: Vec<String>,
}

impl EnumSchema {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn index_of(&self, variant: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|v| v == variant)
            .map(|i| i as u32)
    }

    pub fn variant_at(&self, index: u32) -> Option<&str> {
        self.variants.get(index as usize).map(String::as_str)
    }
}

/// Immutable set of registered object and enum types.
///
/// Cheap to clone; shared by every encode/decode pass.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    types: HashMap<String, TypeSchema>,
    by_tag: HashMap<String, String>,
    enums: HashMap<String, EnumSchema>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    pub fn object(&self, name: &str) -> Option<&TypeSchema> {
        self.inner.types.get(name)
    }

    pub fn enumeration(&self, name: &str) -> Option<&EnumSchema> {
        self.inner.enums.get(name)
    }

    /// Resolve a wire discriminator to its concrete schema.
    pub fn by_discriminator(&self, tag: &str) -> Option<&TypeSchema> {
        self.inner
            .by_tag
            .get(tag)
            .and_then(|name| self.inner.types.get(name))
    }

    /// True if `runtime` is `declared` or transitively extends it.
    pub fn is_assignable(&self, declared: &str, runtime: &str) -> bool {
        let mut current = Some(runtime);
        while let Some(name) = current {
            if name == declared {
                return true;
            }
            current = self.inner.types.get(name).and_then(TypeSchema::base);
        }
        false
    }
}

#[derive(Default)]
pub struct TypeRegistryBuilder {
    types: Vec<TypeSchema>,
    enums: Vec<EnumSchema>,
}

impl TypeRegistryBuilder {
    pub fn object(mut self, schema: TypeSchema) -> Self {
        self.types.push(schema);
        self
    }

    pub fn enumeration(mut self, schema: EnumSchema) -> Self {
        self.enums.push(schema);
        self
    }

    /// Validate the schema set and freeze it.
    pub fn build(self) -> Result<TypeRegistry, RegistryError> {
        let mut inner = RegistryInner::default();

        for schema in self.enums {
            if inner.enums.contains_key(&schema.name) {
                return Err(RegistryError::DuplicateType(schema.name));
            }
            inner.enums.insert(schema.name.clone(), schema);
        }

        for mut schema in self.types {
            if inner.types.contains_key(&schema.name) || inner.enums.contains_key(&schema.name) {
                return Err(RegistryError::DuplicateType(schema.name));
            }
            schema.fields.sort_by(|a, b| a.name.cmp(&b.name));
            let mut seen = HashSet::new();
            for field in &schema.fields {
                if field.name.starts_with('$') {
                    return Err(RegistryError::ReservedField(field.name.clone()));
                }
                if !seen.insert(field.name.as_str()) {
                    return Err(RegistryError::DuplicateField {
                        type_name: schema.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            if inner
                .by_tag
                .insert(schema.discriminator.clone(), schema.name.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateDiscriminator(schema.discriminator));
            }
            inner.types.insert(schema.name.clone(), schema);
        }

        for schema in inner.types.values() {
            if let Some(base) = &schema.extends {
                if !inner.types.contains_key(base) {
                    return Err(RegistryError::UnknownType {
                        from: schema.name.clone(),
                        missing: base.clone(),
                    });
                }
            }
            let mut referenced = Vec::new();
            for field in &schema.fields {
                field.shape.referenced_types(&mut referenced);
            }
            for shape in referenced {
                let known = match shape {
                    Shape::Object(name) => inner.types.contains_key(name),
                    Shape::Enum(name) => inner.enums.contains_key(name),
                    _ => true,
                };
                if !known {
                    return Err(RegistryError::UnknownType {
                        from: schema.name.clone(),
                        missing: shape.to_string(),
                    });
                }
            }
        }

        for name in inner.types.keys() {
            let mut visited = HashSet::new();
            let mut current = Some(name.as_str());
            while let Some(step) = current {
                if !visited.insert(step) {
                    return Err(RegistryError::InheritanceCycle(name.clone()));
                }
                current = inner.types.get(step).and_then(TypeSchema::base);
            }
        }

        Ok(TypeRegistry {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoo() -> TypeRegistry {
        TypeRegistry::builder()
            .object(TypeSchema::new("Animal").field("name", Shape::Str))
            .object(
                TypeSchema::new("Dog")
                    .extends("Animal")
                    .discriminator("dog")
                    .field("name", Shape::Str)
                    .field("good", Shape::Bool),
            )
            .object(TypeSchema::new("Puppy").extends("Dog"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fields_are_sorted_by_name() {
        let registry = TypeRegistry::builder()
            .object(
                TypeSchema::new("Point")
                    .field("y", Shape::Int)
                    .field("x", Shape::Int)
                    .field("label", Shape::Str),
            )
            .build()
            .unwrap();
        let names: Vec<_> = registry
            .object("Point")
            .unwrap()
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["label", "x", "y"]);
    }

    #[test]
    fn test_assignability_is_transitive() {
        let registry = zoo();
        assert!(registry.is_assignable("Animal", "Puppy"));
        assert!(registry.is_assignable("Dog", "Dog"));
        assert!(!registry.is_assignable("Dog", "Animal"));
    }

    #[test]
    fn test_discriminator_lookup() {
        let registry = zoo();
        assert_eq!(registry.by_discriminator("dog").unwrap().name(), "Dog");
        assert_eq!(registry.by_discriminator("Animal").unwrap().name(), "Animal");
        assert!(registry.by_discriminator("Dog").is_none());
    }

    #[test]
    fn test_rejects_unknown_field_type() {
        let err = TypeRegistry::builder()
            .object(TypeSchema::new("Owner").field("pet", Shape::object("Cat")))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType { .. }));
    }

    #[test]
    fn test_rejects_duplicate_discriminator() {
        let err = TypeRegistry::builder()
            .object(TypeSchema::new("A").discriminator("x"))
            .object(TypeSchema::new("B").discriminator("x"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateDiscriminator("x".into()));
    }

    #[test]
    fn test_rejects_reserved_field_names() {
        let err = TypeRegistry::builder()
            .object(TypeSchema::new("A").field("$id", Shape::Int))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::ReservedField("$id".into()));
    }

    #[test]
    fn test_rejects_inheritance_cycle() {
        let err = TypeRegistry::builder()
            .object(TypeSchema::new("A").extends("B"))
            .object(TypeSchema::new("B").extends("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::InheritanceCycle(_)));
    }

    #[test]
    fn test_enum_indices_follow_declaration_order() {
        let color = EnumSchema::new("Color", ["Red", "Green", "Blue"]);
        assert_eq!(color.index_of("Blue"), Some(2));
        assert_eq!(color.variant_at(0), Some("Red"));
        assert_eq!(color.variant_at(3), None);
    }
}
