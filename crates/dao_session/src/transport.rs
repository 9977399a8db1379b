//! Duplex transports a session runs over.
//!
//! A transport is split into an [`Inbound`] stream of complete message
//! payloads and a shared [`Outbound`] handle. The end of the inbound stream
//! is the close signal: it ends when either side closes or the underlying
//! connection drops.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::TransportError;

/// A stream of inbound payloads, one complete message per item.
pub type Inbound = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// The writing half of a transport.
pub trait Outbound: Send + Sync {
    /// Queue one payload. Fails with [`TransportError::Closed`] once closed.
    fn write(&self, payload: String) -> Result<(), TransportError>;

    /// Close the transport. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// One accepted connection.
pub struct Transport {
    pub inbound: Inbound,
    pub outbound: Arc<dyn Outbound>,
}

/// Close flag shared by both halves of a transport.
#[derive(Debug)]
struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    fn close(&self) {
        self.tx.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

fn is_set(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Wrap a payload source so that it ends as soon as the transport is closed.
fn until_closed<S>(source: S, mut closed: watch::Receiver<bool>) -> Inbound
where
    S: Stream<Item = Result<String, TransportError>> + Send + 'static,
{
    Box::pin(stream! {
        let mut source = Box::pin(source);
        loop {
            if is_set(&closed) {
                break;
            }
            let item = tokio::select! {
                changed = closed.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                item = source.next() => item,
            };
            match item {
                Some(item) => yield item,
                None => break,
            }
        }
    })
}

/// Outbound half backed by an unbounded channel.
struct QueuedOutbound {
    tx: mpsc::UnboundedSender<String>,
    signal: Arc<CloseSignal>,
}

impl Outbound for QueuedOutbound {
    fn write(&self, payload: String) -> Result<(), TransportError> {
        if self.signal.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.signal.close();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

/// Create an in-memory transport and the client end that drives it.
pub fn channel() -> (Transport, ClientEnd) {
    let signal = CloseSignal::new();
    let (client_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
    let (server_tx, client_rx) = mpsc::unbounded_channel::<String>();

    let source = stream! {
        while let Some(payload) = server_rx.recv().await {
            yield Ok(payload);
        }
    };

    let transport = Transport {
        inbound: until_closed(source, signal.subscribe()),
        outbound: Arc::new(QueuedOutbound {
            tx: server_tx,
            signal: Arc::clone(&signal),
        }),
    };
    let client = ClientEnd {
        tx: client_tx,
        rx: client_rx,
        closed: signal.subscribe(),
        signal,
    };
    (transport, client)
}

/// The client side of an in-memory [`channel`] transport.
pub struct ClientEnd {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
    signal: Arc<CloseSignal>,
}

impl ClientEnd {
    pub fn send(&self, message: &Value) -> Result<(), TransportError> {
        self.send_raw(message.to_string())
    }

    pub fn send_raw(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        if self.signal.is_closed() {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(payload.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Receive the next envelope written by the server.
    ///
    /// Envelopes queued before a close are still delivered; `None` means the
    /// transport is closed and drained.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            if is_set(&self.closed) {
                return None;
            }
            tokio::select! {
                payload = self.rx.recv() => return payload.map(decode_envelope),
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Receive an envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok().map(decode_envelope)
    }

    pub fn close(&self) {
        self.signal.close();
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Wait until either side has closed the transport.
    pub async fn closed(&mut self) {
        while !is_set(&self.closed) {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

fn decode_envelope(payload: String) -> Value {
    serde_json::from_str(&payload).unwrap_or(Value::String(payload))
}

/// Adapt a byte stream pair into a transport that carries one JSON document
/// per line.
///
/// Must be called from within a tokio runtime: a writer task is spawned that
/// drains queued payloads and shuts the writer down once the transport closes.
pub fn lines<R, W>(reader: R, writer: W) -> Transport
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let signal = CloseSignal::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut closed = signal.subscribe();
    tokio::spawn(async move {
        let mut writer = writer;
        loop {
            // Drain queued envelopes before honouring a close.
            let payload = tokio::select! {
                biased;
                payload = rx.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
                changed = closed.changed() => {
                    if changed.is_err() || is_set(&closed) {
                        break;
                    }
                    continue;
                }
            };
            if let Err(e) = write_line(&mut writer, &payload).await {
                debug!(error = %e, "Failed to write line to transport");
                break;
            }
        }
        while let Ok(payload) = rx.try_recv() {
            if write_line(&mut writer, &payload).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut reader = BufReader::new(reader).lines();
    let source = stream! {
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    yield Ok(line);
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(TransportError::Io(e));
                    break;
                }
            }
        }
    };

    Transport {
        inbound: until_closed(source, signal.subscribe()),
        outbound: Arc::new(QueuedOutbound { tx, signal }),
    }
}

async fn write_line<W>(writer: &mut W, payload: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
