//! Kernel contracts — the pluggable execution engine behind a session.
//!
//! A kernel is selected by language name and owns whatever evaluator backs
//! that language. The REPL only talks to it through the [`Kernel`] trait:
//! submit code, move into a directory, shut down. Construction goes through
//! a [`KernelFactory`] so tests can swap in fakes.
//!
//! ```text
//! KernelConfig ──► KernelFactory::construct ──► Arc<dyn Kernel>
//!                                                 │
//!                                 submit(language, code) ──► Submission
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// The languages a session can use as its default kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum KernelName {
    #[default]
    #[cfg_attr(feature = "cli", value(name = "csharp"))]
    CSharp,
    #[cfg_attr(feature = "cli", value(name = "fsharp"))]
    FSharp,
    Pwsh,
    Sql,
}

impl KernelName {
    /// Every supported kernel, in the order they are listed to users.
    pub const ALL: [KernelName; 4] = [
        KernelName::CSharp,
        KernelName::FSharp,
        KernelName::Pwsh,
        KernelName::Sql,
    ];

    /// The lowercase name used on the command line and in notebooks.
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelName::CSharp => "csharp",
            KernelName::FSharp => "fsharp",
            KernelName::Pwsh => "pwsh",
            KernelName::Sql => "sql",
        }
    }

    /// Comma-separated list of supported names, for error messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(KernelName::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for KernelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no supported kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown kernel '{0}' (expected one of: {supported})", supported = KernelName::supported())]
pub struct UnknownKernel(pub String);

impl FromStr for KernelName {
    type Err = UnknownKernel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKernel(s.to_string()))
    }
}

/// Configuration for kernel construction.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Language submissions use unless a cell says otherwise.
    pub default_kernel: KernelName,
    /// Directory the kernel evaluates in.
    pub working_dir: PathBuf,
}

impl KernelConfig {
    pub fn new(default_kernel: KernelName, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_kernel,
            working_dir: working_dir.into(),
        }
    }
}

/// Errors raised by kernels and kernel factories.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The executable backing a language is not installed.
    #[error("no host found for {kernel}: '{program}' is not on PATH")]
    HostNotFound { kernel: KernelName, program: String },

    /// The language is not one this kernel registers.
    #[error("kernel does not support language '{0}'")]
    UnsupportedLanguage(String),

    /// The working directory could not be used.
    #[error("invalid working directory {}: {reason}", path.display())]
    WorkingDirectory { path: PathBuf, reason: String },

    /// The kernel was shut down and accepts no more work.
    #[error("kernel has been shut down")]
    ShutDown,

    #[error("failed to start {kernel} host: {source}")]
    Spawn {
        kernel: KernelName,
        #[source]
        source: std::io::Error,
    },
}

/// The result of evaluating one submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Submission {
    /// Exit code reported by the evaluator. 0 means success.
    pub code: i32,
    /// Standard output.
    pub out: String,
    /// Standard error / diagnostics.
    pub err: String,
}

impl Submission {
    pub fn success(out: impl Into<String>) -> Self {
        Self {
            code: 0,
            out: out.into(),
            err: String::new(),
        }
    }

    pub fn failure(code: i32, err: impl Into<String>) -> Self {
        Self {
            code,
            out: String::new(),
            err: err.into(),
        }
    }

    /// True if the submission succeeded.
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// A language execution engine.
///
/// Kernels are shared behind `Arc` between the session that drives them and
/// the lifecycle that releases them, so every method takes `&self`.
#[async_trait]
pub trait Kernel: Send + Sync {
    /// The language used when a submission names none.
    fn default_language(&self) -> KernelName;

    /// Language names this kernel can evaluate (its sub-kernels).
    ///
    /// Notebook loaders use this to decide which `#!name` markers start a
    /// new cell.
    fn languages(&self) -> Vec<String>;

    /// True if `language` is one of [`Kernel::languages`].
    fn supports(&self, language: &str) -> bool {
        self.languages().iter().any(|l| l == language)
    }

    /// Evaluate `code` in `language`.
    async fn submit(&self, language: &str, code: &str) -> Result<Submission, KernelError>;

    /// Make `path` the directory later submissions evaluate in.
    fn change_directory(&self, path: &Path) -> Result<(), KernelError>;

    /// Release the kernel. Idempotent; later submissions fail with
    /// [`KernelError::ShutDown`].
    fn shutdown(&self) -> Result<(), KernelError>;
}

/// Builds kernels from configuration.
#[async_trait]
pub trait KernelFactory: Send + Sync {
    async fn construct(&self, config: &KernelConfig) -> Result<Arc<dyn Kernel>, KernelError>;
}
