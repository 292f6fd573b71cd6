//! Client connection to the broker.
//!
//! [`BusClient`] owns the inbound message stream; [`BusHandle`] is the
//! cheap clonable side for publishing and subscribing from any task.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::{Duration, sleep},
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, trace, warn};

use crate::{Error, Frame, QoS, Result};

/// Maximum number of broker connection attempts before giving up.
pub const CONNECT_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between connection attempts, in milliseconds.
pub const CONNECT_RETRY_DELAY_MS: u64 = 200;

const MAX_FRAME_LEN: usize = 1 << 20;

/// Clonable publish/subscribe side of a bus connection.
#[derive(Clone)]
pub struct BusHandle {
    out: UnboundedSender<Frame>,
}

impl BusHandle {
    /// Publish a JSON payload to a topic.
    pub fn publish(&self, topic: &str, payload: Value, qos: QoS) -> Result<()> {
        self.out
            .send(Frame::Publish {
                topic: topic.to_string(),
                payload,
                qos,
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribe to a topic or the `#` wildcard. A `durable` subscription
    /// is buffered by the broker across disconnects of this client id.
    pub fn subscribe(&self, pattern: &str, qos: QoS, durable: bool) -> Result<()> {
        self.out
            .send(Frame::Subscribe {
                pattern: pattern.to_string(),
                qos,
                durable,
            })
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// A connection to the broker, identified by a stable client id.
pub struct BusClient {
    handle: BusHandle,
    inbound: UnboundedReceiver<(String, Value)>,
}

impl BusClient {
    /// Connect to the broker, retrying a bounded number of times with a
    /// fixed delay so that processes launched alongside the broker win the
    /// startup race.
    pub async fn connect(addr: &str, client_id: &str) -> Result<Self> {
        let mut last_err: Option<std::io::Error> = None;
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(%addr, client = %client_id, attempt, "connected to broker");
                    return Self::attach(stream, client_id).await;
                }
                Err(e) => {
                    trace!(%addr, attempt, error = %e, "broker connect failed");
                    last_err = Some(e);
                    if attempt < CONNECT_MAX_ATTEMPTS {
                        sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(Error::Connect {
            addr: addr.to_string(),
            attempts: CONNECT_MAX_ATTEMPTS,
            last: match last_err {
                Some(e) => e,
                None => std::io::Error::other("no connect attempt made"),
            },
        })
    }

    async fn attach(stream: TcpStream, client_id: &str) -> Result<Self> {
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let hello = serde_json::to_string(&Frame::Hello {
            client_id: client_id.to_string(),
        })?;
        framed.send(hello).await?;

        let (out_tx, mut out_rx) = unbounded_channel::<Frame>();
        let (in_tx, in_rx) = unbounded_channel::<(String, Value)>();

        let id = client_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(frame) = outgoing else { break };
                        let line = match serde_json::to_string(&frame) {
                            Ok(l) => l,
                            Err(e) => {
                                warn!(client = %id, error = %e, "unencodable frame, dropping");
                                continue;
                            }
                        };
                        if let Err(e) = framed.send(line).await {
                            warn!(client = %id, error = %e, "bus write failed");
                            break;
                        }
                    }
                    incoming = framed.next() => {
                        let Some(line) = incoming else {
                            debug!(client = %id, "broker closed connection");
                            break;
                        };
                        let line = match line {
                            Ok(l) => l,
                            Err(e) => {
                                warn!(client = %id, error = %e, "bus read failed");
                                break;
                            }
                        };
                        match serde_json::from_str::<Frame>(&line) {
                            Ok(Frame::Message { topic, payload }) => {
                                if in_tx.send((topic, payload)).is_err() {
                                    break;
                                }
                            }
                            Ok(other) => {
                                trace!(client = %id, frame = ?other, "unexpected frame from broker");
                            }
                            Err(e) => {
                                warn!(client = %id, error = %e, "undecodable frame from broker");
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            handle: BusHandle { out: out_tx },
            inbound: in_rx,
        })
    }

    /// A clonable handle for publishing and subscribing.
    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }

    /// Receive the next delivered `(topic, payload)` pair. Returns `None`
    /// once the connection is gone.
    pub async fn recv(&mut self) -> Option<(String, Value)> {
        self.inbound.recv().await
    }
}
