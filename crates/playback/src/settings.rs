//! The engine's read-only cache of state store configuration.
//!
//! Rebuilt wholesale from every `STATE` full-map broadcast; the engine
//! never mutates it locally (status changes go through the store like any
//! other writer).

use ghostwriter_protocol::{StateMap, StateValue};

/// Default typing speed in milliseconds per keystroke.
pub const DEFAULT_SPEED_MS: u64 = 50;

/// Typing configuration as of the latest `STATE` broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Delay between keystrokes, in milliseconds.
    pub speed_ms: u64,
    /// Pause automatically after typing a newline.
    pub pause_on_new_line: bool,
    /// Pause automatically when the target window loses focus.
    pub pause_on_window_not_focused: bool,
    /// Refocus the target window when resuming from pause.
    pub refocus_window_on_resume: bool,
    /// Enter the session paused instead of playing.
    pub start_playback_paused: bool,
    /// Tap Home after each newline (for editors that auto-indent).
    pub auto_home_on_newline: bool,
    /// Hold Ctrl while pressing Enter.
    pub control_on_newline: bool,
    /// Fold runs of four spaces into a tab when loading files.
    pub replace_quad_spaces_with_tab: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            speed_ms: DEFAULT_SPEED_MS,
            pause_on_new_line: false,
            pause_on_window_not_focused: false,
            refocus_window_on_resume: false,
            start_playback_paused: false,
            auto_home_on_newline: false,
            control_on_newline: false,
            replace_quad_spaces_with_tab: false,
        }
    }
}

impl Settings {
    /// Build settings from a full state map. Missing or mistyped keys fall
    /// back to their defaults so a partial map never breaks playback.
    pub fn from_map(map: &StateMap) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, fallback: bool| {
            map.get(key).and_then(StateValue::as_bool).unwrap_or(fallback)
        };
        Self {
            speed_ms: map
                .get("speed")
                .and_then(StateValue::as_i64)
                .and_then(|n| u64::try_from(n).ok())
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_SPEED_MS),
            pause_on_new_line: flag("pause_on_new_line", defaults.pause_on_new_line),
            pause_on_window_not_focused: flag(
                "pause_on_window_not_focused",
                defaults.pause_on_window_not_focused,
            ),
            refocus_window_on_resume: flag(
                "refocus_window_on_resume",
                defaults.refocus_window_on_resume,
            ),
            start_playback_paused: flag("start_playback_paused", defaults.start_playback_paused),
            auto_home_on_newline: flag("auto_home_on_newline", defaults.auto_home_on_newline),
            control_on_newline: flag("control_on_newline", defaults.control_on_newline),
            replace_quad_spaces_with_tab: flag(
                "replace_quad_spaces_with_tab",
                defaults.replace_quad_spaces_with_tab,
            ),
        }
    }

    /// The seed map the launcher installs at startup.
    pub fn seed() -> StateMap {
        let defaults = Self::default();
        [
            (
                "speed".to_string(),
                StateValue::Int(defaults.speed_ms as i64),
            ),
            (
                "pause_on_new_line".to_string(),
                StateValue::Bool(defaults.pause_on_new_line),
            ),
            (
                "pause_on_window_not_focused".to_string(),
                StateValue::Bool(defaults.pause_on_window_not_focused),
            ),
            (
                "refocus_window_on_resume".to_string(),
                StateValue::Bool(defaults.refocus_window_on_resume),
            ),
            (
                "start_playback_paused".to_string(),
                StateValue::Bool(defaults.start_playback_paused),
            ),
            (
                "auto_home_on_newline".to_string(),
                StateValue::Bool(defaults.auto_home_on_newline),
            ),
            (
                "control_on_newline".to_string(),
                StateValue::Bool(defaults.control_on_newline),
            ),
            (
                "replace_quad_spaces_with_tab".to_string(),
                StateValue::Bool(defaults.replace_quad_spaces_with_tab),
            ),
            (
                "play_status".to_string(),
                StateValue::Str(ghostwriter_protocol::PlayStatus::Stopped.as_str().into()),
            ),
        ]
        .into_iter()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_map_reads_known_keys() {
        let map: StateMap = serde_json::from_value(json!({
            "speed": 120,
            "pause_on_new_line": true,
            "control_on_newline": true,
        }))
        .unwrap();
        let s = Settings::from_map(&map);
        assert_eq!(s.speed_ms, 120);
        assert!(s.pause_on_new_line);
        assert!(s.control_on_newline);
        assert!(!s.auto_home_on_newline);
    }

    #[test]
    fn bad_speed_falls_back_to_default() {
        for bad in [json!({"speed": 0}), json!({"speed": -3}), json!({"speed": "fast"})] {
            let map: StateMap = serde_json::from_value(bad).unwrap();
            assert_eq!(Settings::from_map(&map).speed_ms, DEFAULT_SPEED_MS);
        }
    }

    #[test]
    fn seed_matches_defaults() {
        let seeded = Settings::from_map(&Settings::seed());
        assert_eq!(seeded, Settings::default());
        assert_eq!(
            Settings::seed()["play_status"],
            StateValue::Str("stopped".into())
        );
    }
}
