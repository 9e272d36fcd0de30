//! Dynamic object-graph values.
//!
//! A [`Value`] is a tree of primitives, collections and [`ObjectRef`]s. Object
//! references are shared handles, so a graph built from values can contain
//! shared nodes and cycles. Identity is pointer identity of the handle.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A node of an object graph.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered key/value pairs. Keys may be any value.
    Map(Vec<(Value, Value)>),
    Enum { type_name: String, variant: String },
    Object(ObjectRef),
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn enum_variant(type_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Value::Enum {
            type_name: type_name.into(),
            variant: variant.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Enum { .. } => "enum",
            Value::Object(_) => "object",
        }
    }

    /// Compare two graphs by structure, including which nodes are shared.
    ///
    /// Two graphs are equal when there is a one-to-one mapping between their
    /// objects under which types, fields and primitive values agree. Cycles are
    /// handled; an object shared in one graph must be shared in the other.
    pub fn structurally_eq(&self, other: &Value) -> bool {
        GraphComparison::default().values(self, other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Field storage of one object instance.
#[derive(Debug, Default)]
pub struct Object {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

/// Shared handle to an object instance.
///
/// Cloning the handle does not clone the object. Fields may be patched after
/// creation, which is how cyclic graphs are built.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Object>>);

impl ObjectRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(Object {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        })))
    }

    /// Builder-style field assignment.
    pub fn with(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_name(&self) -> String {
        self.0.read().type_name.clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.read().fields.get(field).cloned()
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.write().fields.insert(field.into(), value.into());
    }

    pub fn remove(&self, field: &str) -> Option<Value> {
        self.0.write().fields.remove(field)
    }

    /// Snapshot of the current fields, sorted by name.
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.0.read().fields.clone()
    }

    pub(crate) fn replace_fields(&self, fields: BTreeMap<String, Value>) {
        self.0.write().fields = fields;
    }

    /// A shallow copy: a new instance holding the same field values.
    pub fn shallow_clone(&self) -> ObjectRef {
        let inner = self.0.read();
        ObjectRef(Arc::new(RwLock::new(Object {
            type_name: inner.type_name.clone(),
            fields: inner.fields.clone(),
        })))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation, stable while any handle is alive.
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    // Fields are not printed: graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}@{:#x})", self.type_name(), self.address())
    }
}

#[derive(Default)]
struct GraphComparison {
    left_to_right: HashMap<usize, usize>,
    right_to_left: HashMap<usize, usize>,
}

impl GraphComparison {
    fn values(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits() || x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::List(x), Value::List(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(l, r)| self.values(l, r))
            }
            (Value::Map(x), Value::Map(y)) => {
                x.len() == y.len()
                    && x
                        .iter()
                        .zip(y)
                        .all(|((lk, lv), (rk, rv))| self.values(lk, rk) && self.values(lv, rv))
            }
            (
                Value::Enum {
                    type_name: lt,
                    variant: lv,
                },
                Value::Enum {
                    type_name: rt,
                    variant: rv,
                },
            ) => lt == rt && lv == rv,
            (Value::Object(x), Value::Object(y)) => self.objects(x, y),
            _ => false,
        }
    }

    fn objects(&mut self, a: &ObjectRef, b: &ObjectRef) -> bool {
        let (left, right) = (a.address(), b.address());
        match (self.left_to_right.get(&left), self.right_to_left.get(&right)) {
            (Some(mapped), Some(back)) => return *mapped == right && *back == left,
            (None, None) => {}
            _ => return false,
        }
        self.left_to_right.insert(left, right);
        self.right_to_left.insert(right, left);

        if a.type_name() != b.type_name() {
            return false;
        }
        let (fa, fb) = (a.fields(), b.fields());
        fa.len() == fb.len()
            && fa
                .iter()
                .zip(fb.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && self.values(va, vb))
    }
}
