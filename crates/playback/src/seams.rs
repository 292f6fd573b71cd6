//! Platform seams: keystroke injection and window focus.
//!
//! The engine never touches the OS directly. The binary wires real (or
//! stub) implementations in; tests wire recording fakes.

use thiserror::Error;

/// A platform injection failure. Injection errors are logged and the
/// session continues; they never abort playback.
#[derive(Error, Debug)]
#[error("injection failed: {0}")]
pub struct InjectError(pub String);

/// Synthesizes input events into the focused application.
pub trait Injector: Send {
    /// Type one literal character.
    fn inject_char(&mut self, c: char) -> Result<(), InjectError>;

    /// Tap one named key (canonical lowercase name, e.g. `enter`, `home`).
    fn press_key(&mut self, key: &str) -> Result<(), InjectError>;

    /// Press the keys in order, hold, then release in the same order.
    fn chord(&mut self, keys: &[String]) -> Result<(), InjectError>;

    /// One scroll wheel tick; positive scrolls up, negative down.
    fn scroll(&mut self, direction: i8) -> Result<(), InjectError>;
}

/// Answers questions about window focus and performs refocusing.
pub trait WindowOracle: Send {
    /// Title of the currently focused window, when one can be determined.
    fn focused_window(&mut self) -> Option<String>;

    /// Bring the window with this title to the foreground. Best effort.
    fn focus(&mut self, title: &str) -> bool;
}

/// Injector that logs instead of synthesizing events, for hosts without a
/// platform backend.
#[derive(Debug, Default)]
pub struct NullInjector;

impl Injector for NullInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        tracing::info!(ch = %c.escape_default(), "inject char");
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<(), InjectError> {
        tracing::info!(key, "press key");
        Ok(())
    }

    fn chord(&mut self, keys: &[String]) -> Result<(), InjectError> {
        tracing::info!(chord = %keys.join("+"), "press chord");
        Ok(())
    }

    fn scroll(&mut self, direction: i8) -> Result<(), InjectError> {
        tracing::info!(direction, "scroll tick");
        Ok(())
    }
}

/// Oracle that reports no focus information and cannot refocus.
#[derive(Debug, Default)]
pub struct NullOracle;

impl WindowOracle for NullOracle {
    fn focused_window(&mut self) -> Option<String> {
        None
    }

    fn focus(&mut self, title: &str) -> bool {
        tracing::info!(title, "refocus requested (no window backend)");
        false
    }
}
