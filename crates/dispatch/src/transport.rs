//! Transports carrying envelopes between a [`Client`](crate::Client) and a
//! [`Dispatcher`].
//!
//! ## Stream framing
//!
//! `[4-byte length prefix as u32 big-endian] + [JSON envelope]`, at most
//! [`MAX_FRAME_BYTES`] per frame. [`serve_connection`] runs calls from one
//! connection concurrently and fires the connection's disconnect signal when
//! the peer closes its side. A frame that does not parse as a request ends
//! the connection.

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::error::TransportError;
use crate::server::Dispatcher;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use corelib::cancel::CancelSignal;
use corelib::context::CorrelationId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Largest frame accepted by default: 16 MiB.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Moves one request to a dispatcher and brings its response back.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError>;
}

/// In-process transport: calls straight into a [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct LocalTransport {
    dispatcher: Arc<Dispatcher>,
    disconnect: CancelSignal,
}

impl LocalTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            disconnect: CancelSignal::new(),
        }
    }

    /// The signal calls through this transport see as "caller disconnected".
    pub fn disconnect_signal(&self) -> &CancelSignal {
        &self.disconnect
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        Ok(self.dispatcher.receive(request, &self.disconnect).await)
    }
}

/// Waiters for responses, keyed by the correlation id of their request.
type Pending = Arc<DashMap<CorrelationId, oneshot::Sender<ResponseEnvelope>>>;

/// Client side of a framed byte stream.
///
/// The stream belongs to a reader task and a writer task. Calls may overlap;
/// each response goes to the waiter registered under its correlation id, and
/// responses nobody waits for any more are dropped. Dropping the transport
/// shuts down the write side, which the server sees as a disconnect.
pub struct StreamTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Pending,
    closed: CancelSignal,
    reader: JoinHandle<()>,
    max_frame_bytes: usize,
}

impl StreamTransport {
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_max_frame_bytes(stream, MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes<S>(stream: S, limit: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = CancelSignal::new();

        let (write_pending, write_closed) = (pending.clone(), closed.clone());
        tokio::spawn(async move {
            if let Err(e) = write_requests(writer, rx, limit).await {
                debug!(error = %e, "request writer stopped");
                close(&write_closed, &write_pending);
            }
        });

        let (read_pending, read_closed) = (pending.clone(), closed.clone());
        let reader = tokio::spawn(async move {
            match read_responses(reader, &read_pending, limit).await {
                Ok(()) => debug!("server closed the connection"),
                Err(e) => warn!(error = %e, "response reader stopped"),
            }
            close(&read_closed, &read_pending);
        });

        Self {
            outgoing,
            pending,
            closed,
            reader,
            max_frame_bytes: limit,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Calls still waiting for their response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Mark the connection closed, then wake every waiter with a closed channel.
fn close(closed: &CancelSignal, pending: &Pending) {
    closed.cancel();
    pending.clear();
}

/// Unregisters a waiter when its call returns or is dropped.
struct Waiter<'a> {
    pending: &'a Pending,
    correlation_id: CorrelationId,
    response: oneshot::Receiver<ResponseEnvelope>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        // Only this call's entry: a later call may already reuse the id.
        self.response.close();
        self.pending
            .remove_if(&self.correlation_id, |_, waiter| waiter.is_closed());
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let payload = request.to_json()?;
        if payload.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                limit: self.max_frame_bytes,
            });
        }

        let (tx, rx) = oneshot::channel();
        match self.pending.entry(request.correlation_id.clone()) {
            Entry::Occupied(_) => {
                return Err(TransportError::CorrelationInFlight(request.correlation_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        let mut waiter = Waiter {
            pending: &self.pending,
            correlation_id: request.correlation_id.clone(),
            response: rx,
        };

        // Checked after registering so a concurrent close cannot strand the waiter.
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outgoing
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed)?;
        (&mut waiter.response)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

async fn write_requests<W>(
    mut writer: W,
    mut requests: mpsc::UnboundedReceiver<Vec<u8>>,
    limit: usize,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(payload) = requests.recv().await {
        write_frame(&mut writer, &payload, limit).await?;
    }
    writer.shutdown().await?;
    Ok(())
}

async fn read_responses<R>(mut reader: R, pending: &Pending, limit: usize) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = read_frame(&mut reader, limit).await? {
        let response = ResponseEnvelope::from_json(&frame)?;
        match pending.remove(&response.correlation_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response);
            }
            // Late answer to a call whose caller stopped waiting.
            None => debug!(correlation_id = %response.correlation_id, "discarding stale response"),
        }
    }
    Ok(())
}

/// Serve calls from one connection until the peer closes it.
pub async fn serve_connection<S>(dispatcher: Arc<Dispatcher>, stream: S) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let limit = dispatcher.config().max_frame_bytes;
    let disconnect = CancelSignal::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ResponseEnvelope>();

    let responses = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            write_frame(&mut writer, &response.to_json()?, limit).await?;
        }
        Ok::<_, TransportError>(())
    });

    debug!("client connected");
    let mut calls: Vec<JoinHandle<()>> = Vec::new();

    let result = loop {
        let frame = match read_frame(&mut reader, limit).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("client disconnected");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let request = match RequestEnvelope::from_json(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable request frame, closing connection");
                break Err(e.into());
            }
        };

        let dispatcher = dispatcher.clone();
        let disconnect = disconnect.clone();
        let tx = tx.clone();
        calls.retain(|call| !call.is_finished());
        calls.push(tokio::spawn(async move {
            let response = dispatcher.receive(request, &disconnect).await;
            // The writer is gone only if the connection already failed.
            let _ = tx.send(response);
        }));
    };

    disconnect.cancel();
    for call in calls {
        if let Err(e) = call.await {
            warn!(error = %e, "call task failed");
        }
    }
    drop(tx);

    match responses.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "response writer stopped"),
        Err(e) => warn!(error = %e, "response writer task failed"),
    }
    result
}

pub(crate) async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let size = match reader.read_u32().await {
        Ok(size) => size as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if size > limit {
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    let mut frame = vec![0u8; size];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8], limit: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > limit {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            limit,
        });
    }
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
