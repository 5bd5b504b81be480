//! polyrepl — startup orchestration and the interactive REPL.
//!
//! The binary resolves command-line options ([`config`]), installs logging
//! ([`logging`]), and hands everything to [`orchestrator::start_repl`], which
//! picks a theme, constructs the kernel, optionally loads a notebook, runs a
//! [`session::Session`], and releases everything through a
//! [`lifecycle::Lifecycle`] exactly once.

pub mod config;
pub mod console;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod session;
pub mod theme;

pub use config::{
    Cli, DEFAULT_KERNEL_ENV, Environment, MapEnvironment, ProcessEnvironment, StartupOptions,
    parse_from, resolve,
};
pub use console::{Console, ConsoleLine, RecordingConsole, TerminalConsole};
pub use lifecycle::{DisposeError, Lifecycle, Shutdown, TeardownReport};
pub use orchestrator::{Collaborators, Outcome, Startup, StartupError, start_repl};
pub use session::{EditorLineSource, LineSource, ScriptedLines, Session, SessionHandle};
pub use theme::{BuiltinThemes, Theme, ThemeSelector};
