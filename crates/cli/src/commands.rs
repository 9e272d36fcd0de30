//! Subcommands. Each returns the lines it wants printed.

use crate::config::HostConfig;
use crate::demo::{self, OrderStore, ADD_TARGET, CLERK, NODE, SAVE_TARGET};
use anyhow::Context;
use clap::Subcommand;
use corelib::cancel::CancelSignal;
use corelib::codec::{Format, ObjectRef, Shape, Value};
use corelib::context::CorrelationId;
use corelib::save::{route, PersistenceState, IS_NEW_FIELD};
use dispatch::envelope::PRINCIPAL_HEADER;
use dispatch::{serve_connection, Call, CallOutcome, Client, LocalTransport, StreamTransport, Transport};
use events::{EventDispatcher, Resolution, WaitOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

pub type CommandResult = anyhow::Result<Vec<String>>;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show which write a save performs for a persistence state.
    Route {
        #[arg(long)]
        new: bool,
        #[arg(long)]
        deleted: bool,
    },

    /// Encode a ring of nodes in both wire formats and decode it back.
    Codec {
        #[arg(long, default_value_t = 4)]
        nodes: usize,
    },

    /// Issue demo calls against an in-process host.
    Call {
        #[arg(long, default_value_t = 2)]
        a: i64,
        #[arg(long, default_value_t = 3)]
        b: i64,
        /// Principal sent with the save calls.
        #[arg(long, default_value = CLERK)]
        principal: String,
        /// Go through a framed byte stream instead of calling in process.
        #[arg(long)]
        stream: bool,
    },

    /// Schedule fire-and-forget items and drain them.
    Events {
        #[arg(long, default_value_t = 3)]
        items: usize,
        /// How many of the items fail.
        #[arg(long, default_value_t = 0)]
        failures: usize,
    },
}

impl Command {
    pub async fn execute(&self, host: &HostConfig) -> CommandResult {
        match self {
            Command::Route { new, deleted } => Ok(vec![route_line(*new, *deleted)]),
            Command::Codec { nodes } => codec(*nodes),
            Command::Call {
                a,
                b,
                principal,
                stream,
            } => call(host, *a, *b, principal, *stream).await,
            Command::Events { items, failures } => drain_events(host, *items, *failures).await,
        }
    }
}

fn route_line(is_new: bool, is_deleted: bool) -> String {
    let operation = route(PersistenceState { is_new, is_deleted })
        .map(|op| op.to_string())
        .unwrap_or_else(|| "skip".to_string());
    format!("is_new={} is_deleted={} -> {}", is_new, is_deleted, operation)
}

fn next_node(node: &ObjectRef) -> Option<ObjectRef> {
    node.get("next").and_then(|v| v.as_object().cloned())
}

fn codec(nodes: usize) -> CommandResult {
    let nodes = nodes.max(1);
    let engine = demo::engine()?;
    let graph = Value::Object(demo::ring(nodes));

    let mut lines = Vec::new();
    for format in [Format::Ordinal, Format::Named] {
        let bytes = engine.encode(&graph, format)?;
        let decoded = engine.decode(&bytes, &Shape::object(NODE), format)?;
        let first = decoded.as_object().context("decoded root is not a node")?.clone();

        let mut node = first.clone();
        for _ in 0..nodes {
            node = next_node(&node).context("ring broken after decoding")?;
        }
        lines.push(format!(
            "{}: {} bytes, {} nodes, ring closes: {}, equal: {}",
            format,
            bytes.len(),
            nodes,
            node.ptr_eq(&first),
            decoded.structurally_eq(&graph)
        ));
    }
    Ok(lines)
}

fn describe(target: &str, outcome: CallOutcome) -> String {
    match outcome {
        CallOutcome::Completed(Value::Object(entity)) => {
            let is_new = entity.get(IS_NEW_FIELD).and_then(|v| v.as_bool()).unwrap_or(false);
            let id = entity.get("id").and_then(|v| v.as_int()).unwrap_or_default();
            format!("{}: saved {} {} (is_new={})", target, entity.type_name(), id, is_new)
        }
        CallOutcome::Completed(Value::Int(n)) => format!("{} = {}", target, n),
        CallOutcome::Completed(value) => format!("{} returned {}", target, value.kind()),
        CallOutcome::Denied { reason } => {
            format!("{}: denied ({})", target, reason.as_deref().unwrap_or("no reason given"))
        }
        CallOutcome::Faulted { message } => format!("{}: faulted ({})", target, message),
        CallOutcome::Cancelled => format!("{}: cancelled", target),
    }
}

async fn run_calls<T: Transport>(client: &Client<T>, a: i64, b: i64, principal: &str) -> CommandResult {
    let cancel = CancelSignal::new();
    let mut lines = Vec::new();

    let sum = Call::new(ADD_TARGET)
        .arguments(Value::List(vec![Value::Int(a), Value::Int(b)]), Shape::list(Shape::Int))
        .expects(Shape::Int);
    lines.push(describe(ADD_TARGET, client.issue(sum, &cancel).await?));

    let order = demo::new_order(1, a + b);
    let insert = Call::new(SAVE_TARGET)
        .arguments(order, Shape::object(demo::ORDER))
        .expects(Shape::optional(Shape::object(demo::ORDER)))
        .correlation_id(CorrelationId::generate())
        .header(PRINCIPAL_HEADER, principal);
    let outcome = client.issue(insert, &cancel).await?;

    // The saved entity comes back as fetched, so saving it again updates.
    let saved = match &outcome {
        CallOutcome::Completed(Value::Object(entity)) => Some(entity.clone()),
        _ => None,
    };
    lines.push(describe(SAVE_TARGET, outcome));

    if let Some(entity) = saved {
        entity.set("total", (a + b) * 2);
        let update = Call::new(SAVE_TARGET)
            .arguments(entity, Shape::object(demo::ORDER))
            .expects(Shape::optional(Shape::object(demo::ORDER)))
            .header(PRINCIPAL_HEADER, principal);
        lines.push(describe(SAVE_TARGET, client.issue(update, &cancel).await?));
    }
    Ok(lines)
}

async fn call(host: &HostConfig, a: i64, b: i64, principal: &str, stream: bool) -> CommandResult {
    let store = OrderStore::default();
    let dispatcher = Arc::new(demo::dispatcher(host.dispatch.clone(), &store)?);

    let mut lines = if stream {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve_connection(dispatcher.clone(), server_io));
        let client = Client::new(demo::engine()?, StreamTransport::new(client_io)).with_format(host.format);
        let lines = run_calls(&client, a, b, principal).await?;
        drop(client);
        server.await.context("connection task failed")??;
        lines
    } else {
        let client = Client::new(demo::engine()?, LocalTransport::new(dispatcher.clone())).with_format(host.format);
        run_calls(&client, a, b, principal).await?
    };

    dispatcher.shutdown();
    lines.push(format!("orders stored: {}", store.len()));
    Ok(lines)
}

/// Scope handed to one demo item: its label and the shared journal.
struct ItemScope {
    label: String,
    journal: Arc<Mutex<Vec<String>>>,
}

async fn drain_events(host: &HostConfig, items: usize, failures: usize) -> CommandResult {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let shared = journal.clone();
    let dispatcher = EventDispatcher::new(move |label: &str| ItemScope {
        label: label.to_string(),
        journal: shared.clone(),
    });

    let correlation_id = CorrelationId::generate();
    let handles: Vec<_> = (0..items)
        .map(|i| {
            let fails = i < failures;
            dispatcher.schedule(
                format!("audit-{}", i),
                correlation_id.clone(),
                CancelSignal::new(),
                move |scope: ItemScope, ctx| async move {
                    if fails {
                        anyhow::bail!("{} could not be written", scope.label);
                    }
                    scope.journal.lock().push(format!("{} ({})", scope.label, ctx.id()));
                    Ok(())
                },
            )
        })
        .collect();
    info!(items, "scheduled demo items");

    let mut lines = Vec::new();
    match dispatcher.wait_all(host.events.drain_timeout()).await {
        WaitOutcome::Drained => lines.push("drained".to_string()),
        WaitOutcome::TimedOut { remaining } => {
            lines.push(format!("timed out with {} pending", remaining.len()));
            dispatcher.shutdown();
        }
    }
    for handle in &handles {
        let resolution = match handle.resolution().await {
            Resolution::Succeeded => "succeeded".to_string(),
            Resolution::Failed(error) => error.to_string(),
            Resolution::Cancelled => "cancelled".to_string(),
        };
        lines.push(format!("{}: {}", handle.id(), resolution));
    }
    lines.push(format!("journal entries: {}", journal.lock().len()));
    Ok(lines)
}
