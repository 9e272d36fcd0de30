//! Persistence-state routing.
//!
//! # Routing table
//!
//! | is_new | is_deleted | routed op |
//! |--------|------------|-----------|
//! | true   | false      | Insert    |
//! | false  | false      | Update    |
//! | false  | true       | Delete    |
//! | true   | true       | none      |
//!
//! The last row is an entity created and deleted before it was ever
//! persisted: nothing to do, and not an error.
//!
//! # Missing operations
//!
//! A [`SaveRouter`] always has an Insert. A [`WritePolicy::ReadWrite`] router
//! must also have an Update, checked when the router is built. An
//! [`WritePolicy::AppendOnly`] router deliberately has none; routing to Update
//! on it fails with [`SaveError::Immutable`]. A missing Delete fails with
//! [`SaveError::DeleteNotImplemented`] when a delete is actually routed.

use crate::codec::{ObjectRef, Value};
use crate::error::RoutingConfigurationError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Field names used to carry persistence state on graph objects.
pub const IS_NEW_FIELD: &str = "is_new";
pub const IS_DELETED_FIELD: &str = "is_deleted";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PersistenceState {
    pub is_new: bool,
    pub is_deleted: bool,
}

impl PersistenceState {
    /// State of an entity created in memory and not yet persisted.
    pub fn created() -> Self {
        Self {
            is_new: true,
            is_deleted: false,
        }
    }

    /// State of an entity loaded from storage.
    pub fn fetched() -> Self {
        Self {
            is_new: false,
            is_deleted: false,
        }
    }

    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        })
    }
}

/// The routing rule. Depends on nothing but the two flags.
pub fn route(state: PersistenceState) -> Option<WriteOp> {
    match (state.is_new, state.is_deleted) {
        (true, false) => Some(WriteOp::Insert),
        (false, false) => Some(WriteOp::Update),
        (false, true) => Some(WriteOp::Delete),
        (true, true) => None,
    }
}

/// An entity that carries persistence state.
pub trait Persistable: Clone + Send + 'static {
    fn persistence(&self) -> PersistenceState;

    fn set_persistence(&mut self, state: PersistenceState);

    /// Independent copy of the entity's current contents.
    fn snapshot(&self) -> Self {
        self.clone()
    }
}

impl Persistable for ObjectRef {
    fn persistence(&self) -> PersistenceState {
        let flag = |name| self.get(name).and_then(|v| v.as_bool()).unwrap_or(false);
        PersistenceState {
            is_new: flag(IS_NEW_FIELD),
            is_deleted: flag(IS_DELETED_FIELD),
        }
    }

    fn set_persistence(&mut self, state: PersistenceState) {
        self.set(IS_NEW_FIELD, Value::Bool(state.is_new));
        self.set(IS_DELETED_FIELD, Value::Bool(state.is_deleted));
    }

    // Handles alias one instance; a snapshot must not.
    fn snapshot(&self) -> Self {
        self.shallow_clone()
    }
}

pub type WriteFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// One registered write operation.
pub type WriteFn<E, T> = Arc<dyn Fn(E) -> WriteFuture<T> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Insert and Update are mandatory.
    #[default]
    ReadWrite,
    /// Rows are never rewritten; Update is deliberately absent.
    AppendOnly,
}

#[derive(Debug)]
pub enum SaveOutcome<E> {
    /// Carries the entity as returned by Insert, with `is_new` cleared.
    Inserted(E),
    Updated(E),
    /// Carries the snapshot taken before Delete ran.
    Deleted(E),
    /// Created then deleted before persistence; nothing ran.
    Skipped,
}

impl<E> SaveOutcome<E> {
    pub fn operation(&self) -> Option<WriteOp> {
        match self {
            SaveOutcome::Inserted(_) => Some(WriteOp::Insert),
            SaveOutcome::Updated(_) => Some(WriteOp::Update),
            SaveOutcome::Deleted(_) => Some(WriteOp::Delete),
            SaveOutcome::Skipped => None,
        }
    }

    pub fn into_entity(self) -> Option<E> {
        match self {
            SaveOutcome::Inserted(e) | SaveOutcome::Updated(e) | SaveOutcome::Deleted(e) => Some(e),
            SaveOutcome::Skipped => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    /// Distinct from "denied" and "not found".
    #[error("delete is not implemented for `{entity}`")]
    DeleteNotImplemented { entity: String },
    #[error("`{entity}` is append-only and cannot be updated")]
    Immutable { entity: String },
    #[error("{operation} failed")]
    Failed {
        operation: WriteOp,
        #[source]
        source: anyhow::Error,
    },
}

/// Routes a save to the entity's insert, update or delete.
pub struct SaveRouter<E> {
    entity: String,
    policy: WritePolicy,
    insert: WriteFn<E, E>,
    update: Option<WriteFn<E, E>>,
    delete: Option<WriteFn<E, ()>>,
}

impl<E: Persistable> SaveRouter<E> {
    pub fn builder(entity: impl Into<String>) -> SaveRouterBuilder<E> {
        SaveRouterBuilder {
            entity: entity.into(),
            policy: WritePolicy::default(),
            insert: None,
            update: None,
            delete: None,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// The operation a save of `entity` would run.
    pub fn route_for(&self, entity: &E) -> Option<WriteOp> {
        route(entity.persistence())
    }

    pub async fn save(&self, entity: E) -> Result<SaveOutcome<E>, SaveError> {
        let state = entity.persistence();
        let Some(op) = route(state) else {
            debug!(entity = %self.entity, "save skipped: created and deleted before persistence");
            return Ok(SaveOutcome::Skipped);
        };
        debug!(entity = %self.entity, operation = %op, "routing save");

        match op {
            WriteOp::Insert => {
                let mut saved = (self.insert)(entity)
                    .await
                    .map_err(|source| SaveError::Failed {
                        operation: op,
                        source,
                    })?;
                let mut after = saved.persistence();
                after.is_new = false;
                saved.set_persistence(after);
                Ok(SaveOutcome::Inserted(saved))
            }
            WriteOp::Update => {
                let update = self.update.as_ref().ok_or_else(|| SaveError::Immutable {
                    entity: self.entity.clone(),
                })?;
                let saved = update(entity).await.map_err(|source| SaveError::Failed {
                    operation: op,
                    source,
                })?;
                Ok(SaveOutcome::Updated(saved))
            }
            WriteOp::Delete => {
                let delete = self
                    .delete
                    .as_ref()
                    .ok_or_else(|| SaveError::DeleteNotImplemented {
                        entity: self.entity.clone(),
                    })?;
                let snapshot = entity.snapshot();
                delete(entity).await.map_err(|source| SaveError::Failed {
                    operation: op,
                    source,
                })?;
                Ok(SaveOutcome::Deleted(snapshot))
            }
        }
    }
}

pub struct SaveRouterBuilder<E> {
    entity: String,
    policy: WritePolicy,
    insert: Option<WriteFn<E, E>>,
    update: Option<WriteFn<E, E>>,
    delete: Option<WriteFn<E, ()>>,
}

impl<E: Persistable> SaveRouterBuilder<E> {
    pub fn policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn insert<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<E>> + Send + 'static,
    {
        self.insert = Some(Arc::new(move |e| Box::pin(f(e))));
        self
    }

    pub fn update<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<E>> + Send + 'static,
    {
        self.update = Some(Arc::new(move |e| Box::pin(f(e))));
        self
    }

    pub fn delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.delete = Some(Arc::new(move |e| Box::pin(f(e))));
        self
    }

    pub fn build(self) -> Result<SaveRouter<E>, RoutingConfigurationError> {
        let missing = |operation| RoutingConfigurationError {
            entity: self.entity.clone(),
            operation,
        };
        let insert = self.insert.clone().ok_or_else(|| missing("insert"))?;
        if self.policy == WritePolicy::ReadWrite && self.update.is_none() {
            return Err(missing("update"));
        }
        Ok(SaveRouter {
            entity: self.entity,
            policy: self.policy,
            insert,
            update: self.update,
            delete: self.delete,
        })
    }
}
