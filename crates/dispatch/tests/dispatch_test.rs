//! Tests for the call path, in-process and over a framed stream.
//!
//! # Test Strategy
//!
//! 1. **Outcomes**: completed, denied, faulted, panicked, cancelled
//! 2. **Authorization**: short-circuit before decoding and execution
//! 3. **Cancellation**: disconnect, shutdown, caller abandoning the wait
//! 4. **Stream transport**: end-to-end calls, disconnect on EOF
//! 5. **Save targets**: routing through a dispatched Save

use corelib::cancel::CancelSignal;
use corelib::codec::{Format, ObjectRef, SerializationEngine, Shape, TypeRegistry, TypeSchema, Value};
use corelib::context::CorrelationId;
use corelib::save::SaveRouter;
use dispatch::envelope::PRINCIPAL_HEADER;
use dispatch::registry::OperationFuture;
use dispatch::{
    save_operation, serve_connection, AllowAll, Call, CallContext, CallOutcome, Client,
    DispatchConfig, Dispatcher, LocalTransport, OperationError, OperationRegistry,
    RequestEnvelope, Requirements, RoleAuthorizer, StreamTransport, TransportError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;

const BLOB_BYTES: usize = 64 * 1024;

/// Wait up to a second for `flag` to be set.
async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn engine() -> SerializationEngine {
    let registry = TypeRegistry::builder()
        .object(
            TypeSchema::new("Order")
                .field("id", Shape::Int)
                .field("total", Shape::Int)
                .field("is_new", Shape::optional(Shape::Bool))
                .field("is_deleted", Shape::optional(Shape::Bool)),
        )
        .build()
        .unwrap();
    SerializationEngine::new(registry)
}

fn ints() -> Shape {
    Shape::list(Shape::Int)
}

async fn add(args: Value, _ctx: CallContext) -> Result<Value, OperationError> {
    let Value::List(items) = args else {
        return Err(OperationError::fault("expected a list"));
    };
    Ok(Value::Int(items.iter().filter_map(Value::as_int).sum()))
}

/// Waits until cancelled, recording that it saw the signal.
fn blocking_operation(
    started: Arc<Notify>,
    observed: Arc<AtomicBool>,
) -> impl Fn(Value, CallContext) -> OperationFuture + Send + Sync + 'static {
    move |_args, ctx| {
        let started = started.clone();
        let observed = observed.clone();
        let future: OperationFuture = Box::pin(async move {
            started.notify_one();
            ctx.cancel_signal().cancelled().await;
            observed.store(true, Ordering::SeqCst);
            Err(OperationError::Cancelled)
        });
        future
    }
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    started: Arc<Notify>,
    observed: Arc<AtomicBool>,
}

fn fixture(config: DispatchConfig) -> Fixture {
    let started = Arc::new(Notify::new());
    let observed = Arc::new(AtomicBool::new(false));
    let registry = OperationRegistry::builder()
        .operation("Math.add", ints(), Requirements::none(), add)
        .operation("Gate.wait", Shape::Any, Requirements::none(), blocking_operation(started.clone(), observed.clone()))
        .operation("Blob.get", Shape::Any, Requirements::none(), |_args, _ctx| async {
            Ok(Value::str("x".repeat(BLOB_BYTES)))
        })
        .operation("Ledger.close", Shape::Any, Requirements::none(), |_args, _ctx| async {
            Err(OperationError::Fault(anyhow::anyhow!("ledger closed")))
        })
        .operation("Ledger.explode", Shape::Any, Requirements::none(), |_args, _ctx| async {
            if true {
                panic!("invariant broken");
            }
            Ok(Value::Null)
        })
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(engine(), registry, AllowAll).with_config(config);
    Fixture {
        dispatcher: Arc::new(dispatcher),
        started,
        observed,
    }
}

fn local_client(dispatcher: &Arc<Dispatcher>) -> Client<LocalTransport> {
    Client::new(engine(), LocalTransport::new(dispatcher.clone()))
}

fn add_call(a: i64, b: i64) -> Call {
    Call::new("Math.add")
        .arguments(Value::List(vec![a.into(), b.into()]), ints())
        .expects(Shape::Int)
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_local_call_completes_in_both_formats() {
    let f = fixture(DispatchConfig::default());
    let client = local_client(&f.dispatcher);
    for format in [Format::Ordinal, Format::Named] {
        let outcome = client
            .issue(add_call(2, 3).format(format), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(outcome.into_value().and_then(|v| v.as_int()), Some(5));
    }
}

#[tokio::test]
async fn test_response_echoes_correlation_id_and_format() {
    let f = fixture(DispatchConfig::default());
    let request = RequestEnvelope::new("Math.add", CorrelationId::from("corr-42"))
        .with_format(Format::Named)
        .with_arguments(b"[1, 2]".to_vec());
    let response = f.dispatcher.receive(request, &CancelSignal::new()).await;
    assert_eq!(response.correlation_id.as_str(), "corr-42");
    assert_eq!(response.format, Format::Named);
    assert_eq!(response.result.as_deref(), Some(&b"3"[..]));
}

#[tokio::test]
async fn test_fault_becomes_message_text() {
    let f = fixture(DispatchConfig::default());
    let outcome = local_client(&f.dispatcher)
        .issue(Call::new("Ledger.close"), &CancelSignal::new())
        .await
        .unwrap();
    match outcome {
        CallOutcome::Faulted { message } => assert!(message.contains("ledger closed")),
        other => panic!("expected a fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fault_details_can_be_hidden() {
    let config = DispatchConfig {
        expose_fault_details: false,
        ..DispatchConfig::default()
    };
    let f = fixture(config);
    let outcome = local_client(&f.dispatcher)
        .issue(Call::new("Ledger.close"), &CancelSignal::new())
        .await
        .unwrap();
    assert!(matches!(outcome, CallOutcome::Faulted { message } if message == "operation failed"));
}

#[tokio::test]
async fn test_panic_becomes_generic_fault() {
    let f = fixture(DispatchConfig::default());
    let outcome = local_client(&f.dispatcher)
        .issue(Call::new("Ledger.explode"), &CancelSignal::new())
        .await
        .unwrap();
    match outcome {
        CallOutcome::Faulted { message } => {
            assert_eq!(message, "internal error");
            assert!(!message.contains("invariant"));
        }
        other => panic!("expected a fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_arguments_fault() {
    let f = fixture(DispatchConfig::default());
    let request = RequestEnvelope::new("Math.add", CorrelationId::generate())
        .with_format(Format::Named)
        .with_arguments(b"{\"not\": \"a list\"}".to_vec());
    let response = f.dispatcher.receive(request, &CancelSignal::new()).await;
    assert!(response.authorized);
    assert!(response.result.is_none());
    assert!(response.error.unwrap().starts_with("invalid arguments"));
}

// ============================================================================
// Authorization
// ============================================================================

#[tokio::test]
async fn test_denied_call_never_runs() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let registry = OperationRegistry::builder()
        .operation("Vault.open", Shape::Any, Requirements::permission("vault.open"), move |_args, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
        .build()
        .unwrap();
    let authorizer = RoleAuthorizer::new().grant("alice", "vault.open");
    let dispatcher = Dispatcher::new(engine(), registry, authorizer);

    // Garbage arguments: a denial must come before any decoding.
    let request = RequestEnvelope::new("Vault.open", CorrelationId::generate())
        .with_arguments(vec![0xff, 0xff, 0xff])
        .with_header(PRINCIPAL_HEADER, "mallory");
    let response = dispatcher.receive(request, &CancelSignal::new()).await;
    assert!(!response.authorized);
    assert!(response.result.is_none());
    assert!(response.error.unwrap().contains("vault.open"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let request = RequestEnvelope::new("Vault.open", CorrelationId::generate())
        .with_header(PRINCIPAL_HEADER, "alice");
    let response = dispatcher.receive(request, &CancelSignal::new()).await;
    assert!(response.authorized);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_target_is_unauthorized() {
    let f = fixture(DispatchConfig::default());
    let outcome = local_client(&f.dispatcher)
        .issue(Call::new("Nope.call"), &CancelSignal::new())
        .await
        .unwrap();
    match outcome {
        CallOutcome::Denied { reason } => assert!(reason.unwrap().contains("Nope.call")),
        other => panic!("expected a denial, got {:?}", other),
    }
}

// ============================================================================
// Cancellation
// ============================================================================

async fn run_blocking_call(f: &Fixture, disconnect: CancelSignal) -> tokio::task::JoinHandle<dispatch::ResponseEnvelope> {
    let dispatcher = f.dispatcher.clone();
    let request = RequestEnvelope::new("Gate.wait", CorrelationId::generate());
    let call = tokio::spawn(async move { dispatcher.receive(request, &disconnect).await });
    f.started.notified().await;
    call
}

#[tokio::test]
async fn test_disconnect_cancels_running_operation() {
    let f = fixture(DispatchConfig::default());
    let disconnect = CancelSignal::new();
    let call = run_blocking_call(&f, disconnect.clone()).await;

    disconnect.cancel();
    let response = call.await.unwrap();
    assert!(response.cancelled);
    assert!(response.error.is_none());
    assert!(f.observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_cancels_running_operation() {
    let f = fixture(DispatchConfig::default());
    let disconnect = CancelSignal::new();
    let call = run_blocking_call(&f, disconnect.clone()).await;

    f.dispatcher.shutdown();
    let response = call.await.unwrap();
    assert!(response.cancelled);
    assert!(f.observed.load(Ordering::SeqCst));
    assert!(!disconnect.is_cancelled());
}

#[tokio::test]
async fn test_caller_can_stop_waiting() {
    let f = fixture(DispatchConfig::default());
    let client = local_client(&f.dispatcher);
    let cancel = CancelSignal::new();

    let started = f.started.clone();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        started.notified().await;
        trigger.cancel();
    });

    let outcome = client.issue(Call::new("Gate.wait"), &cancel).await.unwrap();
    assert!(matches!(outcome, CallOutcome::Cancelled));
}

#[tokio::test]
async fn test_abandoned_call_runs_to_its_own_end() {
    let f = fixture(DispatchConfig::default());
    let client = local_client(&f.dispatcher);
    let cancel = CancelSignal::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let outcome = client.issue(Call::new("Gate.wait"), &cancel).await.unwrap();
    assert!(matches!(outcome, CallOutcome::Cancelled));
    // The operation is not torn down: it sees its signal fire and returns.
    assert!(eventually(&f.observed).await);
}

// ============================================================================
// Stream Transport
// ============================================================================

#[tokio::test]
async fn test_stream_end_to_end() {
    let f = fixture(DispatchConfig::default());
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve_connection(f.dispatcher.clone(), server_side));

    let client = Client::new(engine(), StreamTransport::new(client_side)).with_format(Format::Named);
    for (a, b) in [(1, 2), (40, 2)] {
        let outcome = client.issue(add_call(a, b), &CancelSignal::new()).await.unwrap();
        assert_eq!(outcome.into_value().and_then(|v| v.as_int()), Some(a + b));
    }

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stream_eof_cancels_running_call() {
    let f = fixture(DispatchConfig::default());
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(serve_connection(f.dispatcher.clone(), server_side));

    let client = Client::new(engine(), StreamTransport::new(client_side));
    let cancel = CancelSignal::new();
    let started = f.started.clone();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        started.notified().await;
        trigger.cancel();
    });
    let outcome = client.issue(Call::new("Gate.wait"), &cancel).await.unwrap();
    assert!(matches!(outcome, CallOutcome::Cancelled));
    assert!(!f.observed.load(Ordering::SeqCst));

    // Closing the connection is what the server sees as the caller leaving.
    drop(client);
    server.await.unwrap().unwrap();
    assert!(f.observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stream_survives_call_abandoned_mid_response() {
    let f = fixture(DispatchConfig::default());
    // A tiny pipe keeps the large response in transit for many writes.
    let (client_side, server_side) = tokio::io::duplex(16);
    let server = tokio::spawn(serve_connection(f.dispatcher.clone(), server_side));
    let client = Client::new(engine(), StreamTransport::new(client_side));

    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        trigger.cancel();
    });
    let blob = client
        .issue(Call::new("Blob.get").expects(Shape::Str), &cancel)
        .await
        .unwrap();
    match blob {
        CallOutcome::Cancelled => {}
        CallOutcome::Completed(Value::Str(text)) => assert_eq!(text.len(), BLOB_BYTES),
        other => panic!("unexpected outcome {:?}", other),
    }

    let outcome = client.issue(add_call(2, 3), &CancelSignal::new()).await.unwrap();
    assert_eq!(outcome.into_value().and_then(|v| v.as_int()), Some(5));

    drop(client);
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unparseable_request_closes_connection() {
    let f = fixture(DispatchConfig::default());
    let (mut client_side, server_side) = tokio::io::duplex(1024);
    let server = tokio::spawn(serve_connection(f.dispatcher.clone(), server_side));

    let garbage = b"not an envelope";
    client_side.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
    client_side.write_all(garbage).await.unwrap();

    let result = server.await.unwrap();
    assert!(matches!(result, Err(TransportError::Json(_))));
    let mut rest = Vec::new();
    assert_eq!(client_side.read_to_end(&mut rest).await.unwrap(), 0);
}

// ============================================================================
// Save Targets
// ============================================================================

#[derive(Default)]
struct WriteLog {
    inserts: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

fn save_dispatcher(log: Arc<WriteLog>) -> Arc<Dispatcher> {
    let (l1, l2, l3) = (log.clone(), log.clone(), log);
    let router = SaveRouter::<ObjectRef>::builder("Order")
        .insert(move |order| {
            let log = l1.clone();
            async move {
                log.inserts.fetch_add(1, Ordering::SeqCst);
                Ok(order)
            }
        })
        .update(move |order| {
            let log = l2.clone();
            async move {
                log.updates.fetch_add(1, Ordering::SeqCst);
                Ok(order)
            }
        })
        .delete(move |_order| {
            let log = l3.clone();
            async move {
                log.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .unwrap();

    let registry = OperationRegistry::builder()
        .operation(
            "Order.save",
            Shape::object("Order"),
            Requirements::permission("orders.write"),
            save_operation(Arc::new(router)),
        )
        .build()
        .unwrap();
    // The clerk may write orders but holds no separate delete permission.
    let authorizer = RoleAuthorizer::new().grant("clerk", "orders.write");
    Arc::new(Dispatcher::new(engine(), registry, authorizer))
}

fn order(is_new: bool, is_deleted: bool) -> ObjectRef {
    ObjectRef::new("Order")
        .with("id", 9i64)
        .with("total", 120i64)
        .with("is_new", is_new)
        .with("is_deleted", is_deleted)
}

fn save_call(entity: ObjectRef, principal: &str) -> Call {
    Call::new("Order.save")
        .arguments(entity, Shape::object("Order"))
        .expects(Shape::optional(Shape::object("Order")))
        .header(PRINCIPAL_HEADER, principal)
}

#[tokio::test]
async fn test_save_authorized_once_then_routed() {
    let log = Arc::new(WriteLog::default());
    let client = local_client(&save_dispatcher(log.clone()));

    let outcome = client
        .issue(save_call(order(false, true), "clerk"), &CancelSignal::new())
        .await
        .unwrap();
    let snapshot = outcome.into_value().unwrap();
    let snapshot = snapshot.as_object().unwrap();
    assert_eq!(snapshot.get("is_deleted").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(log.deletes.load(Ordering::SeqCst), 1);

    let outcome = client
        .issue(save_call(order(true, false), "clerk"), &CancelSignal::new())
        .await
        .unwrap();
    let saved = outcome.into_value().unwrap();
    assert_eq!(saved.as_object().unwrap().get("is_new").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(log.inserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_save_denied_runs_no_write() {
    let log = Arc::new(WriteLog::default());
    let client = local_client(&save_dispatcher(log.clone()));

    let outcome = client
        .issue(save_call(order(false, false), "visitor"), &CancelSignal::new())
        .await
        .unwrap();
    assert!(outcome.is_denied());
    assert_eq!(log.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_save_new_and_deleted_returns_null() {
    let log = Arc::new(WriteLog::default());
    let client = local_client(&save_dispatcher(log.clone()));

    let outcome = client
        .issue(save_call(order(true, true), "clerk"), &CancelSignal::new())
        .await
        .unwrap();
    assert!(outcome.into_value().unwrap().is_null());
    assert_eq!(log.inserts.load(Ordering::SeqCst), 0);
    assert_eq!(log.deletes.load(Ordering::SeqCst), 0);
}
