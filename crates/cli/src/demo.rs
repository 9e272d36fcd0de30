//! Demo wiring: a small type registry, an in-memory order store and the
//! operations the host exposes.

use anyhow::Context;
use corelib::codec::{ObjectRef, SerializationEngine, Shape, TypeRegistry, TypeSchema, Value};
use corelib::save::{SaveRouter, WritePolicy};
use dispatch::{
    save_operation, CallContext, DispatchConfig, Dispatcher, OperationError, OperationRegistry,
    Requirements, RoleAuthorizer,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ORDER: &str = "Order";
pub const NODE: &str = "Node";
pub const ADD_TARGET: &str = "Math.add";
pub const SAVE_TARGET: &str = "Orders.save";
pub const CLERK: &str = "clerk";
pub const WRITE_PERMISSION: &str = "orders.write";

pub fn engine() -> corelib::Result<SerializationEngine> {
    let registry = TypeRegistry::builder()
        .object(
            TypeSchema::new(ORDER)
                .field("id", Shape::Int)
                .field("total", Shape::Int)
                .field("is_new", Shape::optional(Shape::Bool))
                .field("is_deleted", Shape::optional(Shape::Bool)),
        )
        .object(
            TypeSchema::new(NODE)
                .field("label", Shape::Str)
                .field("next", Shape::optional(Shape::object(NODE))),
        )
        .build()?;
    Ok(SerializationEngine::new(registry))
}

/// Orders keyed by id.
#[derive(Clone, Default)]
pub struct OrderStore {
    orders: Arc<Mutex<BTreeMap<i64, i64>>>,
}

impl OrderStore {
    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    pub fn total(&self, id: i64) -> Option<i64> {
        self.orders.lock().get(&id).copied()
    }

    fn key(order: &ObjectRef) -> anyhow::Result<(i64, i64)> {
        let id = order.get("id").and_then(|v| v.as_int()).context("order without an id")?;
        let total = order.get("total").and_then(|v| v.as_int()).unwrap_or(0);
        Ok((id, total))
    }

    async fn insert(self, order: ObjectRef) -> anyhow::Result<ObjectRef> {
        let (id, total) = Self::key(&order)?;
        if self.orders.lock().insert(id, total).is_some() {
            anyhow::bail!("order {} already exists", id);
        }
        Ok(order)
    }

    async fn update(self, order: ObjectRef) -> anyhow::Result<ObjectRef> {
        let (id, total) = Self::key(&order)?;
        match self.orders.lock().get_mut(&id) {
            Some(slot) => *slot = total,
            None => anyhow::bail!("order {} not found", id),
        }
        Ok(order)
    }

    async fn delete(self, order: ObjectRef) -> anyhow::Result<()> {
        let (id, _) = Self::key(&order)?;
        self.orders.lock().remove(&id);
        Ok(())
    }

    pub fn router(&self) -> corelib::Result<SaveRouter<ObjectRef>> {
        let (inserts, updates, deletes) = (self.clone(), self.clone(), self.clone());
        let router = SaveRouter::builder(ORDER)
            .policy(WritePolicy::ReadWrite)
            .insert(move |order| inserts.clone().insert(order))
            .update(move |order| updates.clone().update(order))
            .delete(move |order| deletes.clone().delete(order))
            .build()?;
        Ok(router)
    }
}

async fn add(args: Value, _ctx: CallContext) -> Result<Value, OperationError> {
    let Value::List(items) = args else {
        return Err(OperationError::fault(format!("expected a list, found {}", args.kind())));
    };
    items
        .iter()
        .try_fold(0i64, |sum, item| match item.as_int() {
            Some(n) => sum.checked_add(n).ok_or_else(|| OperationError::fault("sum overflows")),
            None => Err(OperationError::fault(format!("cannot add {}", item.kind()))),
        })
        .map(Value::Int)
}

/// The host dispatcher: `Math.add` open to all, `Orders.save` for clerks.
pub fn dispatcher(config: DispatchConfig, store: &OrderStore) -> anyhow::Result<Dispatcher> {
    let router = Arc::new(store.router()?);
    let registry = OperationRegistry::builder()
        .operation(ADD_TARGET, Shape::list(Shape::Int), Requirements::none(), add)
        .operation(
            SAVE_TARGET,
            Shape::object(ORDER),
            Requirements::permission(WRITE_PERMISSION),
            save_operation(router),
        )
        .build()?;
    let authorizer = RoleAuthorizer::new().grant(CLERK, WRITE_PERMISSION);
    Ok(Dispatcher::new(engine()?, registry, authorizer).with_config(config))
}

pub fn new_order(id: i64, total: i64) -> ObjectRef {
    ObjectRef::new(ORDER)
        .with("id", id)
        .with("total", total)
        .with("is_new", true)
        .with("is_deleted", false)
}

/// A ring of `len` nodes, returned by its first node.
pub fn ring(len: usize) -> ObjectRef {
    let first = ObjectRef::new(NODE).with("label", "node-0");
    let mut last = first.clone();
    for i in 1..len {
        let node = ObjectRef::new(NODE).with("label", format!("node-{}", i));
        last.set("next", node.clone());
        last = node;
    }
    last.set("next", first.clone());
    first
}
