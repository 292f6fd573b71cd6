//! The message broker: accepts client connections and routes published
//! frames to every current subscriber of their topic.
//!
//! All routing state lives in a single registry behind a mutex; each
//! connection gets a reader task and a writer task, and routing is a
//! non-blocking send onto each subscriber's queue, so per-publisher order
//! is preserved naturally (one reader task per connection, one queue per
//! subscriber).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{UnboundedSender, unbounded_channel},
};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, trace, warn};

use crate::{Error, Frame, Result, pattern_matches};

/// Maximum messages buffered per parked durable subscriber. Oldest
/// messages are dropped once the retention is full.
pub const RETAINED_LIMIT: usize = 256;

/// Maximum accepted frame length in bytes.
const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone)]
struct Subscription {
    pattern: String,
    durable: bool,
}

struct ClientEntry {
    subs: Vec<Subscription>,
    tx: UnboundedSender<Frame>,
}

struct Parked {
    subs: Vec<Subscription>,
    buffer: VecDeque<Frame>,
}

#[derive(Default)]
struct Registry {
    clients: HashMap<String, ClientEntry>,
    parked: HashMap<String, Parked>,
}

impl Registry {
    /// Deliver a published payload to every live subscriber whose pattern
    /// matches, and buffer it for every parked durable subscription.
    fn route(&mut self, topic: &str, payload: &Value) {
        for (id, entry) in &self.clients {
            if entry.subs.iter().any(|s| pattern_matches(&s.pattern, topic)) {
                let frame = Frame::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                };
                if entry.tx.send(frame).is_err() {
                    trace!(client = %id, "subscriber queue gone during route");
                }
            }
        }
        for parked in self.parked.values_mut() {
            if parked
                .subs
                .iter()
                .any(|s| s.durable && pattern_matches(&s.pattern, topic))
            {
                if parked.buffer.len() >= RETAINED_LIMIT {
                    parked.buffer.pop_front();
                }
                parked.buffer.push_back(Frame::Message {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }

    /// Attach a connecting client, resuming any parked durable
    /// subscriptions. Returns buffered frames to replay, in order.
    fn attach(&mut self, client_id: &str, tx: UnboundedSender<Frame>) -> VecDeque<Frame> {
        let (subs, buffer) = match self.parked.remove(client_id) {
            Some(parked) => (parked.subs, parked.buffer),
            None => (Vec::new(), VecDeque::new()),
        };
        self.clients
            .insert(client_id.to_string(), ClientEntry { subs, tx });
        buffer
    }

    /// Detach a disconnecting client, parking its durable subscriptions.
    fn detach(&mut self, client_id: &str) {
        if let Some(entry) = self.clients.remove(client_id) {
            let durable: Vec<Subscription> =
                entry.subs.into_iter().filter(|s| s.durable).collect();
            if !durable.is_empty() {
                self.parked.insert(
                    client_id.to_string(),
                    Parked {
                        subs: durable,
                        buffer: VecDeque::new(),
                    },
                );
            }
        }
    }

    fn subscribe(&mut self, client_id: &str, pattern: String, durable: bool) {
        if let Some(entry) = self.clients.get_mut(client_id) {
            if entry.subs.iter().any(|s| s.pattern == pattern) {
                return;
            }
            entry.subs.push(Subscription { pattern, durable });
        }
    }
}

/// The broker: owns the listening socket and the routing registry.
pub struct Broker {
    listener: TcpListener,
    registry: Arc<Mutex<Registry>>,
}

impl Broker {
    /// Bind the broker to an address (use port 0 to pick a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Mutex::new(Registry::default())),
        })
    }

    /// The bound address, for launchers that bind port 0.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        debug!(addr = ?self.listener.local_addr(), "broker listening");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("broker shutdown requested");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    trace!(%peer, "broker accepted connection");
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, registry).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// Serve one client connection: handshake, then route its frames until it
/// disconnects.
async fn serve_connection(stream: TcpStream, registry: Arc<Mutex<Registry>>) -> Result<()> {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let (mut sink, mut frames) = framed.split();

    // First frame must identify the client.
    let client_id = match frames.next().await {
        Some(line) => match serde_json::from_str::<Frame>(&line?)? {
            Frame::Hello { client_id } => client_id,
            other => {
                return Err(Error::Protocol(format!(
                    "expected hello, got {:?}",
                    other
                )));
            }
        },
        None => return Ok(()),
    };
    debug!(client = %client_id, "client attached");

    let (tx, mut rx) = unbounded_channel::<Frame>();
    let replay = registry.lock().attach(&client_id, tx);

    // Writer task: drains the subscriber queue onto the socket. Buffered
    // durable messages go out first, in their original order.
    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        for frame in replay {
            if send_frame(&mut sink, &frame).await.is_err() {
                return;
            }
        }
        while let Some(frame) = rx.recv().await {
            if let Err(e) = send_frame(&mut sink, &frame).await {
                warn!(client = %writer_id, error = %e, "write failed, dropping client");
                return;
            }
        }
    });

    // Reader loop: subscriptions and publishes.
    while let Some(line) = frames.next().await {
        let frame: Frame = match serde_json::from_str(&line?) {
            Ok(f) => f,
            Err(e) => {
                warn!(client = %client_id, error = %e, "undecodable frame, skipping");
                continue;
            }
        };
        match frame {
            Frame::Subscribe {
                pattern, durable, ..
            } => {
                trace!(client = %client_id, %pattern, durable, "subscribe");
                registry.lock().subscribe(&client_id, pattern, durable);
            }
            Frame::Publish { topic, payload, .. } => {
                trace!(client = %client_id, %topic, "publish");
                registry.lock().route(&topic, &payload);
            }
            Frame::Hello { .. } | Frame::Message { .. } => {
                trace!(client = %client_id, "ignoring unexpected frame");
            }
        }
    }

    registry.lock().detach(&client_id);
    writer.abort();
    debug!(client = %client_id, "client detached");
    Ok(())
}

async fn send_frame(
    sink: &mut (impl SinkExt<String, Error = tokio_util::codec::LinesCodecError> + Unpin),
    frame: &Frame,
) -> Result<()> {
    let line = serde_json::to_string(frame)?;
    sink.send(line).await?;
    Ok(())
}
