//! Client side of the call path.

use crate::envelope::{Headers, RequestEnvelope};
use crate::error::DispatchError;
use crate::transport::Transport;
use corelib::cancel::CancelSignal;
use corelib::codec::{Format, SerializationEngine, Shape, Value};
use corelib::context::CorrelationId;
use tracing::{debug, debug_span, Instrument};

/// One outgoing call, built up before it is issued.
#[derive(Clone, Debug)]
pub struct Call {
    target: String,
    arguments: Option<(Value, Shape)>,
    expects: Shape,
    correlation_id: Option<CorrelationId>,
    format: Option<Format>,
    headers: Headers,
}

impl Call {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            arguments: None,
            expects: Shape::Any,
            correlation_id: None,
            format: None,
            headers: Headers::new(),
        }
    }

    /// Arguments and the slot shape they are encoded into.
    pub fn arguments(mut self, value: impl Into<Value>, shape: Shape) -> Self {
        self.arguments = Some((value.into(), shape));
        self
    }

    /// Shape the result is decoded into. Defaults to [`Shape::Any`].
    pub fn expects(mut self, shape: Shape) -> Self {
        self.expects = shape;
        self
    }

    /// Correlate with an existing id instead of generating one.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// The remote end's answer to a call.
#[derive(Debug)]
pub enum CallOutcome {
    Completed(Value),
    /// Authorization refused; the operation never ran.
    Denied { reason: Option<String> },
    /// The operation ran and failed.
    Faulted { message: String },
    /// The operation observed cancellation, or the caller stopped waiting.
    Cancelled,
}

impl CallOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            CallOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, CallOutcome::Denied { .. })
    }
}

/// Issues calls through a [`Transport`].
pub struct Client<T> {
    engine: SerializationEngine,
    transport: T,
    format: Format,
}

impl<T: Transport> Client<T> {
    pub fn new(engine: SerializationEngine, transport: T) -> Self {
        Self {
            engine,
            transport,
            format: Format::default(),
        }
    }

    /// Format used by calls that do not pick one.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Issue `call`, waiting for its response unless `cancel` fires first.
    ///
    /// Cancelling abandons the local wait only; whatever already reached the
    /// server keeps its own lifecycle.
    pub async fn issue(&self, call: Call, cancel: &CancelSignal) -> Result<CallOutcome, DispatchError> {
        let Call {
            target,
            arguments,
            expects,
            correlation_id,
            format,
            headers,
        } = call;
        let format = format.unwrap_or(self.format);
        let correlation_id = correlation_id.unwrap_or_else(CorrelationId::generate);

        let mut request = RequestEnvelope::new(target, correlation_id).with_format(format);
        request.headers = headers;
        if let Some((value, shape)) = &arguments {
            request.arguments = Some(self.engine.encode_as(value, shape, format)?);
        }

        let span = debug_span!(
            "issue",
            operation = %request.target,
            correlation_id = %request.correlation_id,
        );
        let sent = request.correlation_id.clone();

        async move {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("caller stopped waiting");
                    return Ok(CallOutcome::Cancelled);
                }
                response = self.transport.send(request) => response?,
            };

            if response.correlation_id != sent {
                return Err(DispatchError::CorrelationMismatch {
                    sent: sent.to_string(),
                    received: response.correlation_id.to_string(),
                });
            }
            if response.format != format {
                return Err(DispatchError::FormatMismatch {
                    sent: format,
                    received: response.format,
                });
            }

            if !response.authorized {
                debug!("call denied");
                return Ok(CallOutcome::Denied {
                    reason: response.error,
                });
            }
            if response.cancelled {
                return Ok(CallOutcome::Cancelled);
            }
            if let Some(message) = response.error {
                debug!(%message, "call faulted");
                return Ok(CallOutcome::Faulted { message });
            }

            let value = match response.result {
                Some(bytes) => self.engine.decode(&bytes, &expects, format)?,
                None => Value::Null,
            };
            Ok(CallOutcome::Completed(value))
        }
        .instrument(span)
        .await
    }
}
