//! Command line surface of the `ghostwriter` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ghostwriter_protocol::InputSource;
use logging::LogArgs;

/// Default TCP port the broker listens on.
pub const DEFAULT_PORT: u16 = 4227;

/// Bus-coordinated text playback and hotkey processes.
#[derive(Debug, Parser)]
#[command(name = "ghostwriter", version, about)]
pub struct Cli {
    /// Logging flags shared by every subcommand.
    #[command(flatten)]
    pub logs: LogArgs,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the broker and all worker processes, then wait for Ctrl-C.
    Run(RunArgs),
    /// Run a single worker role (spawned internally by `run`).
    #[command(hide = true)]
    Role(RoleArgs),
    /// Send one control command and print the responses.
    Ctl(CtlArgs),
    /// Subscribe to every topic and print each frame as it passes.
    Inspect(InspectArgs),
}

/// Arguments for `run`.
#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Broker port; 0 picks a free port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path of the hotkey bindings file.
    #[arg(long)]
    pub bindings: Option<PathBuf>,
}

/// Arguments for the hidden `role` subcommand.
#[derive(Debug, clap::Args)]
pub struct RoleArgs {
    /// Which worker to run.
    #[arg(value_enum)]
    pub role: Role,

    /// Broker address to connect to (host:port).
    #[arg(long)]
    pub addr: String,

    /// Path of the hotkey bindings file (listener role only).
    #[arg(long)]
    pub bindings: Option<PathBuf>,
}

/// The worker processes `run` manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// The message broker.
    Broker,
    /// The state store.
    State,
    /// The input listener.
    Listener,
    /// The playback engine.
    Typer,
}

impl Role {
    /// Argument spelling of the role, as passed to child processes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::State => "state",
            Self::Listener => "listener",
            Self::Typer => "typer",
        }
    }
}

/// Arguments for `ctl`.
#[derive(Debug, clap::Args)]
pub struct CtlArgs {
    /// Broker address (host:port).
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub addr: String,

    /// The command to send.
    #[command(subcommand)]
    pub action: Action,
}

/// Arguments for `inspect`.
#[derive(Debug, clap::Args)]
pub struct InspectArgs {
    /// Broker address (host:port).
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub addr: String,
}

/// The control vocabulary.
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Start playback of the loaded sequence.
    Play,
    /// Toggle between playing and paused.
    Pause,
    /// Stop playback and rewind to the first token.
    Stop,
    /// Load a text file into the playback engine.
    LoadFile {
        /// Path of the UTF-8 text file.
        file: String,
    },
    /// Print the remaining-token preview.
    Data,
    /// Grant one advance-to-newline credit.
    AdvanceNewline,
    /// Grant one advance-one-token credit.
    AdvanceToken,
    /// State store operations.
    State {
        /// The store operation.
        #[command(subcommand)]
        op: StateOp,
    },
    /// Arm a hotkey slot; the next press becomes its binding.
    Register {
        /// Slot number (1-8).
        slot: u8,
        /// Input source to capture from.
        #[arg(value_enum)]
        input: InputArg,
        /// Withhold the triggering event from the OS when possible.
        #[arg(long)]
        suppress: bool,
    },
    /// Clear a hotkey slot.
    Unregister {
        /// Slot number (1-8).
        slot: u8,
    },
    /// List currently attached gamepads.
    Gamepads,
    /// Ask every process to shut down.
    Close,
}

/// State store operations for `ctl state`.
#[derive(Debug, Subcommand)]
pub enum StateOp {
    /// Fetch one key, or the whole map when no key is given.
    Get {
        /// Key to fetch.
        key: Option<String>,
    },
    /// Create or overwrite a key.
    Add {
        /// Key to store under.
        key: String,
        /// Value, coerced to the declared type.
        value: String,
        /// Declared type of the value.
        #[arg(long, value_enum, default_value_t = TypeArg::Str)]
        r#type: TypeArg,
    },
    /// Remove a key.
    Del {
        /// Key to remove.
        key: String,
    },
}

/// CLI spelling of an input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputArg {
    /// A keyboard key press.
    Keyboard,
    /// A mouse button press or scroll.
    Mouse,
    /// A gamepad button press.
    Gamepad,
}

impl From<InputArg> for InputSource {
    fn from(arg: InputArg) -> Self {
        match arg {
            InputArg::Keyboard => Self::Keyboard,
            InputArg::Mouse => Self::Mouse,
            InputArg::Gamepad => Self::Gamepad,
        }
    }
}

/// CLI spelling of a state value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// UTF-8 string.
    Str,
    /// Boolean.
    Bool,
}

impl TypeArg {
    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        }
    }
}
