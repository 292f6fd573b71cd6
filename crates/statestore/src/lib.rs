//! The state store process: a single-writer typed key/value map.
//!
//! Writes arrive as [`StateCommand`]s on the `STATE` topic; every
//! successful mutation rebroadcasts the **entire** map so readers can
//! wholesale-replace their caches and stay consistent even when they
//! missed intermediate updates.

use ghostwriter_bus::{BusClient, QoS};
use ghostwriter_protocol::{
    AppCommand, Reply, StateBroadcast, StateCommand, StateMap, StateValue, decode_command, topic,
};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that can terminate the state store process.
#[derive(Error, Debug)]
pub enum Error {
    /// The bus connection failed or went away.
    #[error(transparent)]
    Bus(#[from] ghostwriter_bus::Error),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The authoritative map plus the mutation rules around it.
///
/// Pure state machine: [`Store::apply`] returns the payloads to publish so
/// the command semantics are testable without a broker.
#[derive(Debug, Default)]
pub struct Store {
    map: StateMap,
}

impl Store {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the current map.
    pub fn map(&self) -> &StateMap {
        &self.map
    }

    /// Apply one command and return the payloads to publish on `STATE`,
    /// in order.
    pub fn apply(&mut self, cmd: StateCommand) -> Vec<Value> {
        match cmd {
            // A whole-map get also re-emits the canonical broadcast, so
            // late-joining readers can prime their caches by asking.
            StateCommand::Get { key: None } => vec![
                reply(Reply::result(map_json(&self.map))),
                self.broadcast(),
            ],
            StateCommand::Get { key: Some(key) } => match self.map.get(&key) {
                Some(value) => {
                    let result =
                        serde_json::to_value(value).unwrap_or_else(|_| json!(null));
                    vec![reply(Reply::result(result))]
                }
                None => vec![reply(Reply::err(format!("unknown key '{}'", key)))],
            },
            StateCommand::Add {
                key,
                value,
                value_type,
            } => match StateValue::coerce(&value, value_type) {
                Ok(coerced) => {
                    debug!(%key, ?coerced, "state add");
                    self.map.insert(key.clone(), coerced);
                    vec![
                        reply(Reply::ok_with_message(format!("added '{}'", key))),
                        self.broadcast(),
                    ]
                }
                Err(e) => {
                    warn!(%key, error = %e, "state add rejected");
                    vec![reply(Reply::err(e.to_string()))]
                }
            },
            StateCommand::Del { key } => {
                if self.map.remove(&key).is_some() {
                    debug!(%key, "state del");
                    vec![
                        reply(Reply::ok_with_message(format!("deleted '{}'", key))),
                        self.broadcast(),
                    ]
                } else {
                    vec![reply(Reply::ok_with_warning(format!(
                        "key '{}' was not present",
                        key
                    )))]
                }
            }
            StateCommand::Help => vec![reply(Reply::info(help()))],
        }
    }

    /// The full-map broadcast payload for the current map.
    pub fn broadcast(&self) -> Value {
        broadcast_payload(self.map.clone())
    }
}

fn broadcast_payload(map: StateMap) -> Value {
    // StateBroadcast serialization is infallible (string keys, JSON values).
    serde_json::to_value(StateBroadcast { state_data: map }).unwrap_or_else(|_| json!({}))
}

fn map_json(map: &StateMap) -> Value {
    serde_json::to_value(map).unwrap_or_else(|_| json!({}))
}

fn reply(r: Reply) -> Value {
    serde_json::to_value(r).unwrap_or_else(|_| json!({}))
}

/// Route one `STATE` frame. Replies and broadcasts yield `None`; a frame
/// tagged as a command but malformed yields a structured error instead of
/// being dropped.
fn handle_frame(store: &mut Store, payload: Value) -> Option<Vec<Value>> {
    match decode_command::<StateCommand>(payload) {
        None => None,
        Some(Err(e)) => Some(vec![reply(Reply::err(format!("bad state command: {}", e)))]),
        Some(Ok(cmd)) => Some(store.apply(cmd)),
    }
}

fn help() -> Value {
    json!({
        "commands": {
            "get": {"key": "optional; omit for the full map"},
            "add": {"key": "required", "value": "required", "type": "int|float|str|bool"},
            "del": {"key": "required"},
            "help": {},
        }
    })
}

/// Run the state store against a broker until `CLOSE` arrives on `APP` or
/// `shutdown` is cancelled.
///
/// `seed` is applied before serving, broadcasting the initial map once.
pub async fn run(addr: &str, seed: StateMap, shutdown: CancellationToken) -> Result<()> {
    let mut client = BusClient::connect(addr, "statestore").await?;
    let handle = client.handle();
    handle.subscribe(topic::STATE, QoS::AtLeastOnce, true)?;
    handle.subscribe(topic::APP, QoS::AtLeastOnce, false)?;

    let mut store = Store::new();
    store.map = seed;
    if !store.map().is_empty() {
        handle.publish(topic::STATE, store.broadcast(), QoS::AtLeastOnce)?;
    }
    info!(keys = store.map().len(), "state store serving");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = client.recv() => {
                let Some((t, payload)) = received else { break };
                match t.as_str() {
                    topic::APP => {
                        if let Ok(AppCommand::Close) = serde_json::from_value(payload) {
                            info!("close requested, state store exiting");
                            break;
                        }
                    }
                    topic::STATE => {
                        let Some(outputs) = handle_frame(&mut store, payload) else {
                            continue;
                        };
                        for out in outputs {
                            if let Err(e) = handle.publish(topic::STATE, out, QoS::AtLeastOnce) {
                                warn!(error = %e, "state publish failed");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}
