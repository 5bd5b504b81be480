//! Process-backed kernel: each language is a sub-kernel that evaluates a
//! submission by running the language's command-line host.
//!
//! | Language | Host |
//! |----------|------|
//! | `csharp` | `dotnet script eval <code>` |
//! | `fsharp` | `dotnet fsi --quiet --readline-` (code on stdin) |
//! | `pwsh`   | `pwsh -NoProfile -NonInteractive -Command -` (code on stdin) |
//! | `sql`    | `sqlite3` (code on stdin, in-memory database) |
//!
//! Submissions are independent processes; no state carries over between
//! them. Only the default language's host must exist at construction time;
//! the others are looked up when first used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::kernel::{Kernel, KernelConfig, KernelError, KernelFactory, KernelName, Submission};

/// How code reaches the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    /// Appended as the last argument.
    Argument,
    /// Written to stdin, followed by `terminator`.
    Stdin { terminator: &'static str },
}

/// Command line for one language host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: &'static str,
    args: &'static [&'static str],
    input: Input,
}

impl HostCommand {
    /// The host used for `kernel`.
    pub fn for_kernel(kernel: KernelName) -> Self {
        match kernel {
            KernelName::CSharp => Self {
                program: "dotnet",
                args: &["script", "eval"],
                input: Input::Argument,
            },
            KernelName::FSharp => Self {
                program: "dotnet",
                args: &["fsi", "--quiet", "--readline-"],
                input: Input::Stdin { terminator: "\n;;\n" },
            },
            KernelName::Pwsh => Self {
                program: "pwsh",
                args: &["-NoProfile", "-NonInteractive", "-Command", "-"],
                input: Input::Stdin { terminator: "\n" },
            },
            KernelName::Sql => Self {
                program: "sqlite3",
                args: &[],
                input: Input::Stdin { terminator: "\n" },
            },
        }
    }

    pub fn program(&self) -> &str {
        self.program
    }
}

/// A composite kernel hosting every [`KernelName`] as a sub-kernel.
pub struct ProcessKernel {
    default_language: KernelName,
    cwd: Mutex<PathBuf>,
    shut_down: AtomicBool,
}

impl ProcessKernel {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            default_language: config.default_kernel,
            cwd: Mutex::new(config.working_dir.clone()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Current working directory for submissions.
    pub fn cwd(&self) -> PathBuf {
        match self.cwd.lock() {
            Ok(cwd) => cwd.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn resolve(&self, language: &str) -> Result<KernelName, KernelError> {
        language
            .parse::<KernelName>()
            .map_err(|_| KernelError::UnsupportedLanguage(language.to_string()))
    }
}

#[async_trait]
impl Kernel for ProcessKernel {
    fn default_language(&self) -> KernelName {
        self.default_language
    }

    fn languages(&self) -> Vec<String> {
        KernelName::ALL.iter().map(|k| k.as_str().to_string()).collect()
    }

    async fn submit(&self, language: &str, code: &str) -> Result<Submission, KernelError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(KernelError::ShutDown);
        }
        let kernel = self.resolve(language)?;
        let host = HostCommand::for_kernel(kernel);
        let program = which::which(host.program).map_err(|_| KernelError::HostNotFound {
            kernel,
            program: host.program.to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(host.args)
            .current_dir(self.cwd())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match host.input {
            Input::Argument => {
                cmd.arg(code).stdin(Stdio::null());
            }
            Input::Stdin { .. } => {
                cmd.stdin(Stdio::piped());
            }
        }

        tracing::debug!(%kernel, bytes = code.len(), "submitting to host");
        let mut child = cmd.spawn().map_err(|source| KernelError::Spawn { kernel, source })?;

        if let Input::Stdin { terminator } = host.input {
            if let Some(mut stdin) = child.stdin.take() {
                let payload = format!("{code}{terminator}");
                stdin
                    .write_all(payload.as_bytes())
                    .await
                    .map_err(|source| KernelError::Spawn { kernel, source })?;
                // Closing stdin lets the host see EOF and exit.
                drop(stdin);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| KernelError::Spawn { kernel, source })?;

        Ok(Submission {
            code: output.status.code().unwrap_or(1),
            out: String::from_utf8_lossy(&output.stdout).into_owned(),
            err: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn change_directory(&self, path: &Path) -> Result<(), KernelError> {
        if !path.is_dir() {
            return Err(KernelError::WorkingDirectory {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let mut cwd = match self.cwd.lock() {
            Ok(cwd) => cwd,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cwd = path.to_path_buf();
        Ok(())
    }

    fn shutdown(&self) -> Result<(), KernelError> {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!(kernel = %self.default_language, "process kernel shut down");
        }
        Ok(())
    }
}

/// Constructs [`ProcessKernel`]s, checking that the default host exists.
#[derive(Debug, Default, Clone)]
pub struct ProcessKernelFactory;

#[async_trait]
impl KernelFactory for ProcessKernelFactory {
    async fn construct(&self, config: &KernelConfig) -> Result<Arc<dyn Kernel>, KernelError> {
        let host = HostCommand::for_kernel(config.default_kernel);
        if which::which(host.program()).is_err() {
            return Err(KernelError::HostNotFound {
                kernel: config.default_kernel,
                program: host.program().to_string(),
            });
        }
        tracing::info!(kernel = %config.default_kernel, "constructing process kernel");
        Ok(Arc::new(ProcessKernel::new(config)))
    }
}
