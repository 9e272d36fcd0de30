//! Startup-built registry of callable operations.

use crate::auth::Requirements;
use crate::context::CallContext;
use crate::error::DispatchError;
use corelib::codec::{Shape, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// How an operation body ends when it does not return a value.
#[derive(Error, Debug)]
pub enum OperationError {
    /// The body observed its cancel signal and stopped.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl OperationError {
    pub fn fault<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        OperationError::Fault(anyhow::Error::msg(message))
    }
}

pub type OperationFuture = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

/// Operation body type.
pub type OperationFn = Arc<dyn Fn(Value, CallContext) -> OperationFuture + Send + Sync>;

/// One registered operation target.
#[derive(Clone)]
pub struct Operation {
    target: String,
    argument_shape: Shape,
    requirements: Requirements,
    callable: OperationFn,
}

impl Operation {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn argument_shape(&self) -> &Shape {
        &self.argument_shape
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    pub(crate) fn invoke(&self, arguments: Value, ctx: CallContext) -> OperationFuture {
        (self.callable)(arguments, ctx)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("target", &self.target)
            .field("argument_shape", &self.argument_shape)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

/// Immutable map from target id to operation.
#[derive(Clone, Debug, Default)]
pub struct OperationRegistry {
    operations: Arc<HashMap<String, Operation>>,
}

impl OperationRegistry {
    pub fn builder() -> OperationRegistryBuilder {
        OperationRegistryBuilder::default()
    }

    pub fn get(&self, target: &str) -> Option<&Operation> {
        self.operations.get(target)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct OperationRegistryBuilder {
    operations: Vec<Operation>,
}

impl OperationRegistryBuilder {
    pub fn operation<F, Fut>(
        mut self,
        target: impl Into<String>,
        argument_shape: Shape,
        requirements: Requirements,
        callable: F,
    ) -> Self
    where
        F: Fn(Value, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        let callable: OperationFn = Arc::new(move |args, ctx| Box::pin(callable(args, ctx)));
        self.operations.push(Operation {
            target: target.into(),
            argument_shape,
            requirements,
            callable,
        });
        self
    }

    pub fn build(self) -> Result<OperationRegistry, DispatchError> {
        let mut operations = HashMap::with_capacity(self.operations.len());
        for operation in self.operations {
            if operations.contains_key(&operation.target) {
                return Err(DispatchError::DuplicateTarget(operation.target));
            }
            operations.insert(operation.target.clone(), operation);
        }
        Ok(OperationRegistry {
            operations: Arc::new(operations),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo(args: Value, _ctx: CallContext) -> Result<Value, OperationError> {
        Ok(args)
    }

    #[test]
    fn test_duplicate_targets_are_rejected() {
        let err = OperationRegistry::builder()
            .operation("Echo.call", Shape::Any, Requirements::none(), echo)
            .operation("Echo.call", Shape::Any, Requirements::none(), echo)
            .build()
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTarget(t) if t == "Echo.call"));
    }

    #[test]
    fn test_lookup() {
        let registry = OperationRegistry::builder()
            .operation("Echo.call", Shape::Str, Requirements::permission("echo"), echo)
            .build()
            .unwrap();
        let operation = registry.get("Echo.call").unwrap();
        assert_eq!(operation.argument_shape(), &Shape::Str);
        assert!(!operation.requirements().is_empty());
        assert!(registry.get("Echo.other").is_none());
    }
}
