//! Shared wire protocol types for the ghostwriter processes.
//!
//! Every process talks to the others exclusively through JSON payloads on
//! named bus topics. This crate defines those payloads as tagged unions so
//! each process decodes a frame once at the bus boundary and dispatches with
//! an exhaustive match. The JSON shapes on the wire are part of the external
//! interface and must stay stable:
//!
//! - `TYPER`: [`TyperCommand`] in, [`Reply`] out
//! - `STATE`: [`StateCommand`] in, [`Reply`] out, plus unsolicited
//!   [`StateBroadcast`] full-map updates
//! - `LISTENER`: [`ListenerCommand`] in, [`Reply`] and [`ListenerEvent`] out
//! - `APP`: [`AppCommand`] broadcast for coordinated shutdown
//! - `BROKER`: [`BrokerCommand`] addressed to the broker itself
//!
//! Responses are published on the same topic as the commands that caused
//! them, so consumers must treat an undecodable frame as "not addressed to
//! me" rather than an error.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Well-known bus topic names.
pub mod topic {
    /// Playback engine commands and replies.
    pub const TYPER: &str = "TYPER";
    /// State store commands, replies, and full-map broadcasts.
    pub const STATE: &str = "STATE";
    /// Input listener commands, replies, and hotkey events.
    pub const LISTENER: &str = "LISTENER";
    /// Application-wide lifecycle broadcasts.
    pub const APP: &str = "APP";
    /// Broker-directed lifecycle commands.
    pub const BROKER: &str = "BROKER";
}

/// Commands accepted by the playback engine on the `TYPER` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum TyperCommand {
    /// Replace the loaded token sequence with the contents of a file.
    LoadFile {
        /// Path of the UTF-8 text file to load.
        file: String,
    },
    /// Return the remaining-token preview.
    Data,
    /// Start playback (requires a loaded sequence).
    Play,
    /// Stop playback and restore the original sequence.
    Stop,
    /// Toggle between playing and paused.
    Pause,
    /// Grant one advance-to-newline credit.
    AdvanceNewline,
    /// Grant one advance-one-token credit.
    AdvanceToken,
    /// Return a machine-readable capability description.
    Help,
}

/// Commands accepted by the state store on the `STATE` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum StateCommand {
    /// Fetch a single key, or the entire map when `key` is omitted.
    Get {
        /// Key to fetch; `None` returns the whole map.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Create or overwrite a key, coercing the value to the declared type.
    Add {
        /// Key to store under.
        key: String,
        /// Raw value as it appeared on the wire.
        value: Value,
        /// Declared type the value is coerced to (defaults to `str`).
        #[serde(rename = "type", default)]
        value_type: ValueType,
    },
    /// Remove a key. Removing an absent key is not an error.
    Del {
        /// Key to remove.
        key: String,
    },
    /// Return a machine-readable capability description.
    Help,
}

/// Commands accepted by the input listener on the `LISTENER` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ListenerCommand {
    /// Arm a slot: the next press from `input` becomes its binding.
    Register {
        /// Slot number to (re)bind.
        slot: u8,
        /// Which input source the next press is captured from.
        input: InputSource,
        /// Withhold the triggering event from the OS when possible.
        #[serde(default)]
        suppress: bool,
    },
    /// Clear a slot's binding unconditionally.
    Unregister {
        /// Slot number to clear.
        slot: u8,
    },
    /// Enumerate currently attached gamepad devices (fresh scan).
    GetGamepads,
    /// Return a machine-readable capability description.
    Help,
}

/// Application-wide lifecycle messages on the `APP` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum AppCommand {
    /// Every process stops accepting commands and disconnects.
    #[serde(rename = "CLOSE")]
    Close,
}

/// Commands addressed to the broker itself on the `BROKER` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum BrokerCommand {
    /// Ask the broker to initiate a system-wide shutdown: it fans out
    /// [`AppCommand::Close`] on `APP` and then exits itself.
    #[serde(rename = "SHUTDOWN")]
    Shutdown,
}

/// The raw input sources a hotkey can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// A keyboard key press.
    Keyboard,
    /// A mouse button press or scroll.
    Mouse,
    /// A gamepad button press.
    Gamepad,
}

impl InputSource {
    /// Wire name of the source, matching its serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Gamepad => "gamepad",
        }
    }
}

/// Asynchronous events published by the listener on the `LISTENER` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// A bound slot matched an incoming press.
    HotkeyTriggered {
        /// Slot that fired.
        slot: u8,
        /// Source the binding listens on.
        source: InputSource,
        /// Source-specific identifier that matched.
        value: String,
        /// Gamepad device name, when the source is a gamepad.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamepad_name: Option<String>,
    },
    /// A recording completed and the slot is now bound.
    HotkeyRegistered {
        /// Slot that was bound.
        slot: u8,
        /// Source of the captured press.
        source: InputSource,
        /// Captured identifier.
        value: String,
        /// Gamepad device name, when the source is a gamepad.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gamepad_name: Option<String>,
    },
    /// A slot's binding was cleared.
    HotkeyCleared {
        /// Slot that was cleared.
        slot: u8,
    },
    /// A registration attempt failed; the previous binding is untouched.
    HotkeyRegistrationError {
        /// Slot the registration targeted.
        slot: u8,
        /// Why the registration failed.
        error: String,
    },
    /// Result of a [`ListenerCommand::GetGamepads`] scan.
    Gamepads {
        /// Devices present at scan time.
        gamepads: Vec<GamepadInfo>,
    },
}

/// One enumerated gamepad device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamepadInfo {
    /// Position in the enumeration order at scan time.
    pub index: usize,
    /// Device name as reported by the platform. Not guaranteed unique
    /// across identical controller models.
    pub name: String,
}

/// Playback engine status, stored in the state store under `play_status`.
///
/// This is the single authoritative tri-state; processes derive any boolean
/// convenience flags from it rather than tracking their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    /// No session in progress; `play` starts from the first token.
    #[default]
    Stopped,
    /// The consumption worker is actively consuming tokens.
    Playing,
    /// A session exists but consumption is gated on credits or `pause`.
    Paused,
}

impl PlayStatus {
    /// Wire name of the status, matching its serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type for a state store value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// UTF-8 string (the default when no type is declared).
    #[default]
    Str,
    /// Boolean; the string forms `true`/`1`/`yes` are accepted as true.
    Bool,
}

impl ValueType {
    /// Wire name of the type, matching its serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value held by the state store.
///
/// Untagged on the wire: `5` is an int, `5.0` a float, `true` a bool,
/// `"5"` a string. Variant order matters for deserialization (bool before
/// int before float).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    Str(String),
}

/// Error produced when a raw wire value cannot be coerced to its declared
/// type. The store leaves its map untouched when coercion fails.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("failed to convert value to {target}: {detail}")]
pub struct CoerceError {
    /// The declared target type.
    pub target: ValueType,
    /// Human-readable failure detail.
    pub detail: String,
}

impl StateValue {
    /// Coerce a raw JSON value to the declared type.
    ///
    /// Mirrors the store's documented rules: `int` and `float` accept both
    /// numeric and numeric-string forms; `bool` accepts booleans, the string
    /// forms `true`/`1`/`yes` (case-insensitive, anything else is false),
    /// and nonzero numbers; `str` accepts strings as-is and renders any
    /// other value to its JSON text.
    pub fn coerce(raw: &Value, target: ValueType) -> Result<Self, CoerceError> {
        let fail = |detail: String| CoerceError { target, detail };
        match target {
            ValueType::Int => match raw {
                Value::Number(n) => n
                    .as_i64()
                    .map(Self::Int)
                    .ok_or_else(|| fail(format!("{} is not an integer", n))),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Int)
                    .map_err(|e| fail(format!("'{}': {}", s, e))),
                Value::Bool(b) => Ok(Self::Int(i64::from(*b))),
                other => Err(fail(format!("unsupported value {}", other))),
            },
            ValueType::Float => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| fail(format!("{} is not a float", n))),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Self::Float)
                    .map_err(|e| fail(format!("'{}': {}", s, e))),
                other => Err(fail(format!("unsupported value {}", other))),
            },
            ValueType::Bool => match raw {
                Value::Bool(b) => Ok(Self::Bool(*b)),
                Value::String(s) => {
                    let truthy = matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
                    Ok(Self::Bool(truthy))
                }
                Value::Number(n) => Ok(Self::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                other => Err(fail(format!("unsupported value {}", other))),
            },
            ValueType::Str => match raw {
                Value::String(s) => Ok(Self::Str(s.clone())),
                other => Ok(Self::Str(other.to_string())),
            },
        }
    }

    /// Interpret this value as a bool, for settings consumers.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret this value as an integer, for settings consumers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret this value as a string slice, for settings consumers.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// The full key/value map owned by the state store.
///
/// Ordered so that broadcasts and test assertions are deterministic.
pub type StateMap = BTreeMap<String, StateValue>;

/// Unsolicited full-map broadcast sent after every successful mutation.
///
/// Late-joining or desynced consumers self-heal by wholesale-replacing
/// their cached copy with `state_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBroadcast {
    /// The entire authoritative map after the mutation.
    #[serde(rename = "state-data")]
    pub state_data: StateMap,
}

/// Decode a command payload from a topic that also carries replies and
/// broadcasts.
///
/// Commands are tagged with a `cmd` field; frames without one (replies,
/// broadcasts, events) yield `None` and are not addressed to the handler.
/// A frame that carries `cmd` but fails to decode yields the decode error,
/// so handlers can answer malformed commands with a structured error
/// instead of dropping them.
pub fn decode_command<T: DeserializeOwned>(
    payload: Value,
) -> Option<Result<T, serde_json::Error>> {
    payload.get("cmd")?;
    Some(serde_json::from_value(payload))
}

/// Generic command response published on the same topic as the command.
///
/// The field set mirrors the wire convention: `result` for payloads,
/// `message` for human-readable success detail, `error` / `warning` for the
/// two failure severities, `info` for help output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Command result payload, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Human-readable success detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when the command failed; state is unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the command succeeded with a caveat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Capability description returned by `help` commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

impl Reply {
    /// A bare `{"result": "ok"}` success.
    pub fn ok() -> Self {
        Self {
            result: Some(Value::String("ok".into())),
            ..Self::default()
        }
    }

    /// Success with a human-readable message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    /// Success with a caveat.
    pub fn ok_with_warning(warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
            ..Self::ok()
        }
    }

    /// Success carrying an arbitrary result payload.
    pub fn result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// A structured error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: Some(Value::String("error".into())),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A help response carrying a capability description.
    pub fn info(info: Value) -> Self {
        Self {
            info: Some(info),
            ..Self::default()
        }
    }
}
