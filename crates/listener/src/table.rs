//! The slot table: bindings, recording mode, and trigger matching.
//!
//! Pure state machine. Every mutation returns the `LISTENER` payloads to
//! publish, so the recording and eviction rules are testable without a
//! broker or a real input backend.

use ghostwriter_protocol::{InputSource, ListenerEvent, Reply};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::RawEvent;

/// Lowest valid slot number.
pub const SLOT_MIN: u8 = 1;
/// Highest valid slot number.
pub const SLOT_MAX: u8 = 8;

/// One persisted hotkey binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Source the binding listens on.
    pub source: InputSource,
    /// Source-specific identifier (key name, button name).
    pub value: String,
    /// Device name, for gamepad bindings. Matching is by name; two
    /// identical controllers are indistinguishable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamepad_name: Option<String>,
    /// Withhold the triggering event from the OS when possible.
    #[serde(default)]
    pub suppress: bool,
}

impl Binding {
    fn matches(&self, ev: &RawEvent) -> bool {
        self.source == ev.source
            && self.value == ev.value
            && match self.source {
                InputSource::Gamepad => self.gamepad_name == ev.gamepad_name,
                _ => true,
            }
    }
}

/// An armed recording: the next matching press becomes the binding.
#[derive(Debug, Clone)]
struct Pending {
    slot: u8,
    source: InputSource,
    suppress: bool,
}

/// What the input backend should do with the event that was just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the event through to the OS.
    Pass,
    /// Withhold the event from the OS (a suppressing binding matched, or
    /// the event was consumed by a recording).
    Suppress,
}

/// The fixed-size slot table plus at most one pending recording.
#[derive(Debug, Default)]
pub struct HotkeyTable {
    slots: [Option<Binding>; SLOT_MAX as usize],
    pending: Option<Pending>,
    dirty: bool,
}

impl HotkeyTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current bindings, slot number first.
    pub fn bindings(&self) -> impl Iterator<Item = (u8, &Binding)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_ref().map(|b| (i as u8 + SLOT_MIN, b)))
    }

    /// The binding for one slot, if any.
    pub fn binding(&self, slot: u8) -> Option<&Binding> {
        Self::index(slot).and_then(|i| self.slots[i].as_ref())
    }

    fn index(slot: u8) -> Option<usize> {
        (SLOT_MIN..=SLOT_MAX)
            .contains(&slot)
            .then(|| (slot - SLOT_MIN) as usize)
    }

    /// Arm a recording for `slot`. `gamepad_present` reflects a fresh
    /// device scan; a gamepad registration with no device fails
    /// immediately, leaving any previous binding intact.
    pub fn register(
        &mut self,
        slot: u8,
        source: InputSource,
        suppress: bool,
        gamepad_present: bool,
    ) -> Vec<Value> {
        if Self::index(slot).is_none() {
            return vec![reply(Reply::err(format!(
                "slot {} out of range {}..={}",
                slot, SLOT_MIN, SLOT_MAX
            )))];
        }
        if source == InputSource::Gamepad && !gamepad_present {
            warn!(slot, "gamepad registration with no device present");
            return vec![
                reply(Reply::err("no gamepad device present")),
                event(ListenerEvent::HotkeyRegistrationError {
                    slot,
                    error: "no gamepad device present".into(),
                }),
            ];
        }
        if let Some(prev) = self.pending.replace(Pending {
            slot,
            source,
            suppress,
        }) {
            debug!(superseded = prev.slot, slot, "recording replaced");
        }
        vec![reply(Reply::ok_with_message(format!(
            "recording slot {}: press the desired {} input",
            slot,
            source.as_str()
        )))]
    }

    /// Clear a slot. Clearing an empty slot succeeds with a warning.
    pub fn unregister(&mut self, slot: u8) -> Vec<Value> {
        let Some(i) = Self::index(slot) else {
            return vec![reply(Reply::err(format!(
                "slot {} out of range {}..={}",
                slot, SLOT_MIN, SLOT_MAX
            )))];
        };
        if self.pending.as_ref().is_some_and(|p| p.slot == slot) {
            self.pending = None;
        }
        if self.slots[i].take().is_some() {
            self.dirty = true;
            vec![
                reply(Reply::ok()),
                event(ListenerEvent::HotkeyCleared { slot }),
            ]
        } else {
            vec![reply(Reply::ok_with_warning(format!(
                "slot {} was not bound",
                slot
            )))]
        }
    }

    /// Restore a binding read from disk, without publishing anything.
    pub fn restore(&mut self, slot: u8, binding: Binding) {
        if let Some(i) = Self::index(slot) {
            self.slots[i] = Some(binding);
        }
    }

    /// Drop a slot and report why, for startup revalidation failures.
    pub fn invalidate(&mut self, slot: u8, error: impl Into<String>) -> Vec<Value> {
        if let Some(i) = Self::index(slot) {
            self.slots[i] = None;
            self.dirty = true;
        }
        vec![event(ListenerEvent::HotkeyRegistrationError {
            slot,
            error: error.into(),
        })]
    }

    /// Feed one raw input press. Returns the payloads to publish and the
    /// suppress verdict for the backend. Releases never match.
    pub fn handle_event(&mut self, ev: &RawEvent) -> (Vec<Value>, Verdict) {
        if !ev.pressed {
            return (Vec::new(), Verdict::Pass);
        }

        // A recording consumes the first press from its source.
        if self.pending.as_ref().is_some_and(|p| p.source == ev.source) {
            let pending = match self.pending.take() {
                Some(p) => p,
                None => return (Vec::new(), Verdict::Pass),
            };
            let binding = Binding {
                source: ev.source,
                value: ev.value.clone(),
                gamepad_name: ev.gamepad_name.clone(),
                suppress: pending.suppress,
            };
            let mut out = Vec::new();
            // The same physical input can only be bound once; capturing it
            // for a new slot clears the old one.
            let duplicates: Vec<u8> = self
                .bindings()
                .filter(|(slot, existing)| {
                    *slot != pending.slot
                        && existing.source == binding.source
                        && existing.value == binding.value
                        && existing.gamepad_name == binding.gamepad_name
                })
                .map(|(slot, _)| slot)
                .collect();
            for slot in duplicates {
                out.extend(self.invalidate_silent(slot));
            }
            debug!(slot = pending.slot, value = %binding.value, "hotkey recorded");
            out.push(event(ListenerEvent::HotkeyRegistered {
                slot: pending.slot,
                source: binding.source,
                value: binding.value.clone(),
                gamepad_name: binding.gamepad_name.clone(),
            }));
            if let Some(i) = Self::index(pending.slot) {
                self.slots[i] = Some(binding);
                self.dirty = true;
            }
            return (out, Verdict::Suppress);
        }

        // Trigger mode: every matching slot fires, in slot order.
        let mut out = Vec::new();
        let mut suppress = false;
        for (slot, binding) in self.bindings() {
            if binding.matches(ev) {
                suppress |= binding.suppress;
                out.push(event(ListenerEvent::HotkeyTriggered {
                    slot,
                    source: binding.source,
                    value: binding.value.clone(),
                    gamepad_name: binding.gamepad_name.clone(),
                }));
            }
        }
        let verdict = if suppress {
            Verdict::Suppress
        } else {
            Verdict::Pass
        };
        (out, verdict)
    }

    fn invalidate_silent(&mut self, slot: u8) -> Vec<Value> {
        if let Some(i) = Self::index(slot) {
            self.slots[i] = None;
            self.dirty = true;
        }
        vec![event(ListenerEvent::HotkeyCleared { slot })]
    }

    /// True when the bindings changed since the last call; the caller
    /// rewrites the persistence file when set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Capability description for the `help` command.
    pub fn help() -> Value {
        json!({
            "commands": {
                "register": {
                    "slot": format!("{}..={}", SLOT_MIN, SLOT_MAX),
                    "input": "keyboard|mouse|gamepad",
                    "suppress": "optional bool",
                },
                "unregister": {"slot": format!("{}..={}", SLOT_MIN, SLOT_MAX)},
                "get_gamepads": {},
                "help": {},
            }
        })
    }
}

pub(crate) fn event(ev: ListenerEvent) -> Value {
    serde_json::to_value(ev).unwrap_or_else(|_| json!({}))
}

pub(crate) fn reply(r: Reply) -> Value {
    serde_json::to_value(r).unwrap_or_else(|_| json!({}))
}
