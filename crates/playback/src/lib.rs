//! The playback engine process ("typer").
//!
//! Consumes a loaded token sequence by injecting keystrokes at a
//! configured speed, governed by a three-state status
//! (stopped/playing/paused), one-shot advance credits, and implicit
//! pauses (focus loss, pause markers, newline pauses). All control
//! arrives as commands on the `TYPER` bus topic; configuration arrives as
//! `STATE` full-map broadcasts.
//!
//! Platform input synthesis and window focus are behind the [`Injector`]
//! and [`WindowOracle`] seams; this crate contains no OS-specific code.

mod engine;
mod seams;
mod service;
mod settings;

pub use engine::{Engine, Outbound, RESUME_SETTLE_SECS, START_DELAY_SECS};
pub use seams::{InjectError, Injector, NullInjector, NullOracle, WindowOracle};
pub use service::{Error, Result, TyperConfig, run};
pub use settings::{DEFAULT_SPEED_MS, Settings};
