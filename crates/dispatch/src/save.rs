//! Save targets: a [`SaveRouter`] exposed as a dispatchable operation.
//!
//! Authorization happens once, against the requirements the Save target was
//! registered with. The Insert, Update or Delete it routes to is not
//! authorized again.

use crate::context::CallContext;
use crate::registry::{OperationError, OperationFuture};
use corelib::codec::{ObjectRef, Value};
use corelib::save::{SaveError, SaveOutcome, SaveRouter};
use std::sync::Arc;
use tracing::debug;

/// Adapt `router` into an operation body taking the entity as its argument.
///
/// Returns the saved entity (the pre-deletion snapshot for a delete) or null
/// when the entity needed no write.
pub fn save_operation(
    router: Arc<SaveRouter<ObjectRef>>,
) -> impl Fn(Value, CallContext) -> OperationFuture + Send + Sync + 'static {
    move |arguments, ctx| {
        let router = router.clone();
        let future: OperationFuture = Box::pin(async move {
            let Some(entity) = arguments.as_object().cloned() else {
                return Err(OperationError::fault(format!(
                    "`{}` expects an entity, found {}",
                    ctx.target(),
                    arguments.kind()
                )));
            };
            ctx.checkpoint()?;

            let outcome = router
                .save(entity)
                .await
                .map_err(|e: SaveError| OperationError::Fault(e.into()))?;
            debug!(entity = %router.entity(), operation = ?outcome.operation(), "save routed");

            Ok(match outcome {
                SaveOutcome::Skipped => Value::Null,
                saved => saved.into_entity().map(Value::Object).unwrap_or(Value::Null),
            })
        });
        future
    }
}
