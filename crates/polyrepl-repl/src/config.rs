//! Startup configuration: command-line parsing and validation.
//!
//! [`Cli`] is what clap parses; [`resolve`] turns it into [`StartupOptions`],
//! filling defaults from an injected [`Environment`]. Every check happens
//! here, so anything holding a `StartupOptions` can trust it.
//!
//! Default kernel precedence:
//!
//! 1. `--default-kernel`
//! 2. `$POLYREPL_DEFAULT_KERNEL`
//! 3. `csharp`

use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use polyrepl_kernel::{KernelConfig, KernelName};

/// Environment variable consulted when `--default-kernel` is absent.
pub const DEFAULT_KERNEL_ENV: &str = "POLYREPL_DEFAULT_KERNEL";

/// Raw command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "polyrepl", version, about = "A multi-language notebook REPL")]
pub struct Cli {
    /// Enable file logging to the specified directory
    #[arg(long = "log-path", value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// The default language for the kernel [env: POLYREPL_DEFAULT_KERNEL] [default: csharp]
    #[arg(long = "default-kernel", value_enum, value_name = "KERNEL")]
    pub default_kernel: Option<KernelName>,

    /// After starting the REPL, run all of the cells in the specified notebook file
    #[arg(long, value_name = "PATH")]
    pub notebook: Option<PathBuf>,

    /// Exit the REPL when the specified notebook has run
    #[arg(long = "exit-after-run")]
    pub exit_after_run: bool,

    /// Working directory to which to change after launching the kernel
    #[arg(long = "working-dir", value_name = "PATH")]
    pub working_dir: Option<PathBuf>,
}

/// What an option's path must refer to.
#[derive(Debug, Clone, Copy)]
enum PathKind {
    File,
    Directory,
}

fn check_path(
    option: &str,
    given: &Path,
    resolved: &Path,
    kind: PathKind,
) -> Result<(), clap::Error> {
    let problem = match kind {
        PathKind::File if resolved.is_file() => return Ok(()),
        PathKind::Directory if resolved.is_dir() => return Ok(()),
        _ if !resolved.exists() => "path does not exist",
        PathKind::File => "not a file",
        PathKind::Directory => "not a directory",
    };
    Err(usage_error(
        ErrorKind::ValueValidation,
        format!(
            "invalid value '{}' for '{option} <PATH>': {problem}",
            given.display()
        ),
    ))
}

/// Source of environment variables and the current directory.
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
    fn current_dir(&self) -> io::Result<PathBuf>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }
}

/// An in-memory environment, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl Environment for MapEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        self.cwd
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no current directory"))
    }
}

/// Validated startup configuration. Built only by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupOptions {
    default_kernel: KernelName,
    working_dir: PathBuf,
    notebook: Option<PathBuf>,
    /// `--notebook` exactly as typed, for display.
    notebook_as_given: Option<PathBuf>,
    exit_after_run: bool,
    log_path: Option<PathBuf>,
}

impl StartupOptions {
    pub fn default_kernel(&self) -> KernelName {
        self.default_kernel
    }

    /// Existing directory the kernel moves into after launch.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Existing notebook file to run at startup.
    pub fn notebook(&self) -> Option<&Path> {
        self.notebook.as_deref()
    }

    /// The notebook path as it appeared on the command line.
    pub fn notebook_as_given(&self) -> Option<&Path> {
        self.notebook_as_given.as_deref()
    }

    pub fn exit_after_run(&self) -> bool {
        self.exit_after_run
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// The subset of options kernel construction needs.
    pub fn kernel_config(&self) -> KernelConfig {
        KernelConfig::new(self.default_kernel, self.working_dir.clone())
    }
}

/// Validate parsed arguments against `env`.
///
/// Errors are clap usage errors, so callers can print them (and exit) the
/// same way as a parse failure.
pub fn resolve(cli: Cli, env: &dyn Environment) -> Result<StartupOptions, clap::Error> {
    let default_kernel = match cli.default_kernel {
        Some(kernel) => kernel,
        None => match env.var(DEFAULT_KERNEL_ENV) {
            Some(value) => value.parse::<KernelName>().map_err(|_| {
                usage_error(
                    ErrorKind::InvalidValue,
                    format!(
                        "invalid value '{value}' in ${DEFAULT_KERNEL_ENV} [possible values: {}]",
                        KernelName::supported()
                    ),
                )
            })?,
            None => KernelName::default(),
        },
    };

    let cwd = || {
        env.current_dir().map_err(|e| {
            usage_error(ErrorKind::Io, format!("cannot determine current directory: {e}"))
        })
    };
    let absolute = |path: &Path| -> Result<PathBuf, clap::Error> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(cwd()?.join(path))
        }
    };

    let working_dir = match &cli.working_dir {
        Some(dir) => {
            let resolved = absolute(dir)?;
            check_path("--working-dir", dir, &resolved, PathKind::Directory)?;
            resolved
        }
        None => {
            let current = cwd()?;
            if !current.is_dir() {
                return Err(usage_error(
                    ErrorKind::Io,
                    format!("current directory {} does not exist", current.display()),
                ));
            }
            current
        }
    };

    let notebook = match &cli.notebook {
        Some(file) => {
            let resolved = absolute(file)?;
            check_path("--notebook", file, &resolved, PathKind::File)?;
            Some(resolved)
        }
        None => None,
    };

    Ok(StartupOptions {
        default_kernel,
        working_dir,
        notebook,
        notebook_as_given: cli.notebook,
        exit_after_run: cli.exit_after_run,
        log_path: cli.log_path,
    })
}

/// Parse `args` (including the binary name) and resolve them against `env`.
pub fn parse_from<I, T>(args: I, env: &dyn Environment) -> Result<StartupOptions, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    resolve(cli, env)
}

fn usage_error(kind: ErrorKind, message: String) -> clap::Error {
    Cli::command().error(kind, message)
}
