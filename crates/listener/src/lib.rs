//! The input listener process.
//!
//! Owns eight hotkey slots. Each slot binds one raw input press (keyboard
//! key, mouse button, or gamepad button) and publishes a
//! `hotkey_triggered` event on `LISTENER` when it fires. Binding happens
//! by recording: a `register` command arms a slot and the next press from
//! the requested source becomes its binding.
//!
//! Raw input capture is platform-specific and injected as an opaque
//! [`RawEvent`] stream over a crossbeam channel; gamepad enumeration is a
//! [`DeviceScanner`]. The listener itself stays platform-free.

use std::{io::Error as IoError, path::PathBuf};

use crossbeam_channel::{Receiver, Sender};
use ghostwriter_bus::{BusClient, QoS};
use ghostwriter_protocol::{
    AppCommand, GamepadInfo, InputSource, ListenerCommand, Reply, decode_command, topic,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod persist;
mod table;

pub use table::{Binding, HotkeyTable, SLOT_MAX, SLOT_MIN, Verdict};

/// The main error type for the listener process.
#[derive(Error, Debug)]
pub enum Error {
    /// The bus connection failed or went away.
    #[error(transparent)]
    Bus(#[from] ghostwriter_bus::Error),

    /// The bindings file could not be read or written.
    #[error("bindings file error: {0}")]
    Io(#[from] IoError),

    /// The bindings file held undecodable JSON.
    #[error("bindings file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One raw input press or release from the capture backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Where the event came from.
    pub source: InputSource,
    /// Source-specific identifier (key name, button name).
    pub value: String,
    /// Device name, for gamepad events.
    pub gamepad_name: Option<String>,
    /// True for press, false for release.
    pub pressed: bool,
}

/// Gamepad enumeration, implemented by the platform backend.
pub trait DeviceScanner: Send {
    /// Enumerate currently attached gamepads. Called freshly on every
    /// registration attempt and every `get_gamepads` query.
    fn gamepads(&mut self) -> Vec<GamepadInfo>;
}

/// Configuration for [`run`].
pub struct ListenerConfig {
    /// Broker address.
    pub addr: String,
    /// Path of the JSON bindings file.
    pub bindings_path: PathBuf,
}

/// Run the listener until `CLOSE` arrives on `APP` or `shutdown` is
/// cancelled.
///
/// `events` is the raw input stream from the capture backend. When
/// `verdicts` is present, one [`Verdict`] is sent back per received event,
/// in order, so a backend that can withhold events from the OS knows what
/// to do with each; suppression stays best-effort either way.
pub async fn run(
    cfg: ListenerConfig,
    mut scanner: Box<dyn DeviceScanner>,
    events: Receiver<RawEvent>,
    verdicts: Option<Sender<Verdict>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut client = BusClient::connect(&cfg.addr, "listener").await?;
    let handle = client.handle();
    handle.subscribe(topic::LISTENER, QoS::AtLeastOnce, true)?;
    handle.subscribe(topic::APP, QoS::AtLeastOnce, false)?;

    // Restore persisted bindings, revalidating gamepad bindings against
    // the devices actually present.
    let mut table = HotkeyTable::new();
    let saved = persist::load(&cfg.bindings_path)?;
    let present: Vec<String> = scanner.gamepads().into_iter().map(|g| g.name).collect();
    for out in restore_bindings(&mut table, saved, &present) {
        publish(&handle, out);
    }
    if table.take_dirty() {
        persist::save(&cfg.bindings_path, table.bindings())?;
    }
    info!(
        bindings = table.bindings().count(),
        "listener serving"
    );

    // Bridge the blocking crossbeam stream onto the runtime.
    let (raw_tx, mut raw_rx) = unbounded_channel::<RawEvent>();
    std::thread::spawn(move || {
        for ev in events {
            if raw_tx.send(ev).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            raw = raw_rx.recv() => {
                let Some(ev) = raw else { break };
                let (out, verdict) = table.handle_event(&ev);
                for payload in out {
                    publish(&handle, payload);
                }
                if let Some(tx) = &verdicts
                    && tx.send(verdict).is_err()
                {
                    debug!("verdict channel gone, backend detached");
                }
                if table.take_dirty() {
                    persist::save(&cfg.bindings_path, table.bindings())?;
                }
            }
            received = client.recv() => {
                let Some((t, payload)) = received else { break };
                match t.as_str() {
                    topic::APP => {
                        if let Ok(AppCommand::Close) = serde_json::from_value(payload) {
                            info!("close requested, listener exiting");
                            break;
                        }
                    }
                    topic::LISTENER => {
                        let Some(outputs) = route_command(&mut table, scanner.as_mut(), payload)
                        else {
                            continue;
                        };
                        for out in outputs {
                            publish(&handle, out);
                        }
                        if table.take_dirty() {
                            persist::save(&cfg.bindings_path, table.bindings())?;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// Restore saved bindings into the table. A gamepad binding whose device
/// is no longer attached is dropped and reported, never restored blind.
fn restore_bindings(
    table: &mut HotkeyTable,
    saved: std::collections::BTreeMap<u8, Binding>,
    present: &[String],
) -> Vec<Value> {
    let mut out = Vec::new();
    for (slot, binding) in saved {
        let missing_device = binding.source == InputSource::Gamepad
            && !binding
                .gamepad_name
                .as_ref()
                .is_some_and(|name| present.contains(name));
        if missing_device {
            let name = binding.gamepad_name.as_deref().unwrap_or("?");
            warn!(slot, device = name, "bound gamepad not present, clearing slot");
            out.extend(table.invalidate(slot, format!("gamepad '{}' not present", name)));
        } else {
            table.restore(slot, binding);
        }
    }
    out
}

/// Route one `LISTENER` frame. Replies and events yield `None`; a frame
/// tagged as a command but malformed is answered with a structured error.
fn route_command(
    table: &mut HotkeyTable,
    scanner: &mut dyn DeviceScanner,
    payload: Value,
) -> Option<Vec<Value>> {
    match decode_command::<ListenerCommand>(payload) {
        None => None,
        Some(Err(e)) => Some(vec![table::reply(Reply::err(format!(
            "bad listener command: {}",
            e
        )))]),
        Some(Ok(cmd)) => Some(handle_command(table, scanner, cmd)),
    }
}

fn handle_command(
    table: &mut HotkeyTable,
    scanner: &mut dyn DeviceScanner,
    cmd: ListenerCommand,
) -> Vec<Value> {
    match cmd {
        ListenerCommand::Register {
            slot,
            input,
            suppress,
        } => {
            let gamepad_present = !scanner.gamepads().is_empty();
            table.register(slot, input, suppress, gamepad_present)
        }
        ListenerCommand::Unregister { slot } => table.unregister(slot),
        ListenerCommand::GetGamepads => {
            let gamepads = scanner.gamepads();
            vec![table::event(
                ghostwriter_protocol::ListenerEvent::Gamepads { gamepads },
            )]
        }
        ListenerCommand::Help => vec![table::reply(Reply::info(HotkeyTable::help()))],
    }
}

fn publish(handle: &ghostwriter_bus::BusHandle, payload: Value) {
    if let Err(e) = handle.publish(topic::LISTENER, payload, QoS::AtLeastOnce) {
        warn!(error = %e, "listener publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScanner(Vec<GamepadInfo>);

    impl DeviceScanner for FixedScanner {
        fn gamepads(&mut self) -> Vec<GamepadInfo> {
            self.0.clone()
        }
    }

    fn pad(name: &str) -> GamepadInfo {
        GamepadInfo {
            index: 0,
            name: name.into(),
        }
    }

    #[test]
    fn get_gamepads_returns_fresh_scan() {
        let mut table = HotkeyTable::new();
        let mut scanner = FixedScanner(vec![pad("Pad A")]);
        let out = handle_command(&mut table, &mut scanner, ListenerCommand::GetGamepads);
        assert_eq!(out[0]["event"], "gamepads");
        assert_eq!(out[0]["gamepads"][0]["name"], "Pad A");
    }

    #[test]
    fn restore_drops_missing_gamepad_bindings() {
        let mut table = HotkeyTable::new();
        let saved: std::collections::BTreeMap<u8, Binding> = [
            (
                1u8,
                Binding {
                    source: InputSource::Keyboard,
                    value: "f9".into(),
                    gamepad_name: None,
                    suppress: false,
                },
            ),
            (
                2u8,
                Binding {
                    source: InputSource::Gamepad,
                    value: "south".into(),
                    gamepad_name: Some("Gone Pad".into()),
                    suppress: false,
                },
            ),
        ]
        .into_iter()
        .collect();

        let out = restore_bindings(&mut table, saved, &["Other Pad".into()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["event"], "hotkey_registration_error");
        assert_eq!(out[0]["slot"], 2);
        assert!(table.binding(1).is_some());
        assert!(table.binding(2).is_none());
    }

    #[test]
    fn malformed_command_gets_structured_error() {
        let mut table = HotkeyTable::new();
        let mut scanner = FixedScanner(Vec::new());

        let missing_slot = route_command(
            &mut table,
            &mut scanner,
            serde_json::json!({"cmd": "register"}),
        );
        let out = missing_slot.expect("tagged frame must be answered");
        assert!(out[0]["error"].is_string());

        // Our own events and replies are not commands.
        let event = serde_json::json!({"event": "hotkey_triggered", "slot": 1});
        assert!(route_command(&mut table, &mut scanner, event).is_none());
    }

    #[test]
    fn gamepad_register_consults_scanner() {
        let mut table = HotkeyTable::new();
        let mut empty = FixedScanner(Vec::new());
        let out = handle_command(
            &mut table,
            &mut empty,
            ListenerCommand::Register {
                slot: 1,
                input: InputSource::Gamepad,
                suppress: false,
            },
        );
        assert!(out[0]["error"].is_string());

        let mut present = FixedScanner(vec![pad("Pad A")]);
        let out = handle_command(
            &mut table,
            &mut present,
            ListenerCommand::Register {
                slot: 1,
                input: InputSource::Gamepad,
                suppress: false,
            },
        );
        assert!(out[0]["message"].is_string());
    }
}
