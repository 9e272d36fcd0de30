//! Server side of the call path.
//!
//! ## Call lifecycle
//!
//! 1. Resolve the target in the [`OperationRegistry`]
//! 2. Authorize against the target's requirements; a denial ends the call
//! 3. Decode the arguments against the operation's argument shape
//! 4. Run the operation under the OR of caller disconnect and host shutdown
//! 5. Reduce the outcome to a response stamped with the request's
//!    correlation id and format

use crate::auth::{AuthDecision, Authorizer};
use crate::context::CallContext;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::registry::{OperationError, OperationRegistry};
use crate::transport::MAX_FRAME_BYTES;
use corelib::cancel::CancelSignal;
use corelib::codec::{SerializationEngine, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Dispatcher configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Send operation fault text to callers. When off, callers only see
    /// [`DispatchConfig::fault_message`].
    pub expose_fault_details: bool,
    pub fault_message: String,
    /// Message sent in place of a panic payload.
    pub panic_message: String,
    /// Largest frame accepted by [`crate::serve_connection`].
    pub max_frame_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            expose_fault_details: true,
            fault_message: "operation failed".to_string(),
            panic_message: "internal error".to_string(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("dualcall_dispatch_calls_total", "outcome" => outcome).increment(1);
}

/// Receives request envelopes and runs the matching operation.
pub struct Dispatcher {
    engine: SerializationEngine,
    registry: OperationRegistry,
    authorizer: Arc<dyn Authorizer>,
    shutdown: CancelSignal,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        engine: SerializationEngine,
        registry: OperationRegistry,
        authorizer: impl Authorizer + 'static,
    ) -> Self {
        Self {
            engine,
            registry,
            authorizer: Arc::new(authorizer),
            shutdown: CancelSignal::new(),
            config: DispatchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn engine(&self) -> &SerializationEngine {
        &self.engine
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Host-wide signal linked into every call.
    pub fn shutdown_signal(&self) -> &CancelSignal {
        &self.shutdown
    }

    /// Trigger shutdown. Running operations observe it through their context.
    pub fn shutdown(&self) {
        info!("dispatcher shutting down");
        self.shutdown.cancel();
    }

    /// Handle one request. `disconnect` fires when the caller goes away.
    pub async fn receive(
        &self,
        request: RequestEnvelope,
        disconnect: &CancelSignal,
    ) -> ResponseEnvelope {
        let span = info_span!(
            "receive",
            operation = %request.target,
            correlation_id = %request.correlation_id,
            format = %request.format,
        );
        self.dispatch(request, disconnect).instrument(span).await
    }

    async fn dispatch(&self, request: RequestEnvelope, disconnect: &CancelSignal) -> ResponseEnvelope {
        let Some(operation) = self.registry.get(&request.target) else {
            warn!("unknown operation target");
            record("unknown_target");
            let reason = format!("unknown operation target `{}`", request.target);
            return ResponseEnvelope::denied(&request, Some(reason));
        };

        let decision = self
            .authorizer
            .authorize(&request.target, operation.requirements(), &request.headers)
            .await;
        if let AuthDecision::Deny { reason } = decision {
            info!(reason = reason.as_deref().unwrap_or(""), "call denied");
            record("denied");
            return ResponseEnvelope::denied(&request, reason);
        }

        let arguments = match &request.arguments {
            None => Value::Null,
            Some(bytes) => {
                match self
                    .engine
                    .decode(bytes, operation.argument_shape(), request.format)
                {
                    Ok(arguments) => arguments,
                    Err(e) => {
                        warn!(error = %e, "arguments could not be decoded");
                        record("faulted");
                        let message = self.fault_text(format!("invalid arguments: {}", e));
                        return ResponseEnvelope::faulted(&request, message);
                    }
                }
            }
        };

        let cancel = CancelSignal::any([disconnect.clone(), self.shutdown.clone()]);
        let ctx = CallContext::new(
            &request.target,
            request.correlation_id.clone(),
            request.format,
            request.headers.clone(),
            cancel.signal().clone(),
        );

        // The operation runs as its own task so a panic is contained to it.
        // An abandoned call leaves the task running with its signal fired.
        let abandoned = cancel.signal().cancel_on_drop();
        let joined = tokio::spawn(operation.invoke(arguments, ctx).instrument(Span::current())).await;
        abandoned.disarm();

        match joined {
            Ok(Ok(value)) => match self.engine.encode(&value, request.format) {
                Ok(bytes) => {
                    debug!(bytes = bytes.len(), "operation completed");
                    record("completed");
                    ResponseEnvelope::completed(&request, bytes)
                }
                Err(e) => {
                    warn!(error = %e, "result could not be encoded");
                    record("faulted");
                    let message = self.fault_text(format!("result could not be encoded: {}", e));
                    ResponseEnvelope::faulted(&request, message)
                }
            },
            Ok(Err(OperationError::Cancelled)) => {
                debug!("operation cancelled");
                record("cancelled");
                ResponseEnvelope::cancelled(&request)
            }
            Ok(Err(OperationError::Fault(e))) if cancel.is_cancelled() => {
                debug!(error = %e, "operation failed after cancellation");
                record("cancelled");
                ResponseEnvelope::cancelled(&request)
            }
            Ok(Err(OperationError::Fault(e))) => {
                warn!(error = %e, "operation faulted");
                record("faulted");
                ResponseEnvelope::faulted(&request, self.fault_text(format!("{:#}", e)))
            }
            Err(e) if e.is_panic() => {
                error!("operation panicked");
                record("panicked");
                ResponseEnvelope::faulted(&request, self.config.panic_message.clone())
            }
            Err(_) => {
                record("cancelled");
                ResponseEnvelope::cancelled(&request)
            }
        }
    }

    fn fault_text(&self, detail: String) -> String {
        if self.config.expose_fault_details {
            detail
        } else {
            self.config.fault_message.clone()
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("targets", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"expose_fault_details": false}"#).unwrap();
        assert!(!config.expose_fault_details);
        assert_eq!(config.panic_message, "internal error");
        assert_eq!(config.max_frame_bytes, MAX_FRAME_BYTES);
    }
}
