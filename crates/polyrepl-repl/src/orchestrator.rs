//! Startup orchestration: from validated options to a finished session.
//!
//! ```text
//! theme + splash ─► construct kernel ─► register kernel ─► cd working dir
//!      ─► [load notebook] ─► build session ─► register session ─► run
//!      ─► teardown (or earlier, if the cancellation token fires)
//! ```
//!
//! The cancellation token is bound to the lifecycle before any kernel work,
//! so a signal at any point releases whatever has been registered. Nothing
//! is rolled back; a signal during kernel construction abandons it.

use std::sync::Arc;

use polyrepl_kernel::{
    DibLoader, DocumentLoader, KernelError, KernelFactory, LoadError, ProcessKernelFactory,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::StartupOptions;
use crate::console::{Console, TerminalConsole};
use crate::lifecycle::Lifecycle;
use crate::session::{EditorLineSource, LineSource, Session};
use crate::theme::{theme_for, BuiltinThemes, ThemeSelector};

/// Fatal startup failures. Neither is retried.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("kernel construction failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("notebook load failed: {0}")]
    Load(#[from] LoadError),
}

/// How orchestration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The run loop finished on its own.
    Completed,
    /// The cancellation token fired first.
    Cancelled,
}

/// Result of a startup that did not fail.
#[derive(Debug)]
pub struct Startup {
    /// The (already torn down) lifecycle. Later registrations are released
    /// immediately.
    pub lifecycle: Lifecycle,
    pub outcome: Outcome,
}

/// The external pieces the orchestrator drives.
pub struct Collaborators {
    pub kernels: Arc<dyn KernelFactory>,
    pub loader: Arc<dyn DocumentLoader>,
    pub themes: Arc<dyn ThemeSelector>,
    pub console: Arc<dyn Console>,
    pub lines: Box<dyn LineSource>,
}

impl Collaborators {
    /// Process-backed kernels, `.dib` notebooks, built-in themes, the
    /// terminal, and a rustyline editor.
    pub fn standard() -> std::io::Result<Self> {
        Ok(Self {
            kernels: Arc::new(ProcessKernelFactory),
            loader: Arc::new(DibLoader),
            themes: Arc::new(BuiltinThemes),
            console: Arc::new(TerminalConsole),
            lines: Box::new(EditorLineSource::new()?),
        })
    }
}

/// Run the full startup → run → shutdown sequence.
///
/// `on_exit` receives the run loop's exit code; it is not called if
/// orchestration fails or is cancelled before the session runs. Teardown has
/// always run by the time this returns, including on error.
pub async fn start_repl(
    options: &StartupOptions,
    collaborators: Collaborators,
    cancel: CancellationToken,
    on_exit: impl FnOnce(i32) + Send,
) -> Result<Startup, StartupError> {
    let lifecycle = Lifecycle::new();
    lifecycle.bind_cancellation(cancel.clone());

    let result = orchestrate(options, collaborators, &lifecycle, &cancel, on_exit).await;

    lifecycle.teardown();
    // A cancellation watcher may still be mid-teardown on another thread.
    lifecycle.torn_down().await;
    match result {
        Ok(outcome) => {
            tracing::info!(?outcome, "repl finished");
            Ok(Startup { lifecycle, outcome })
        }
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            Err(e)
        }
    }
}

async fn orchestrate(
    options: &StartupOptions,
    collaborators: Collaborators,
    lifecycle: &Lifecycle,
    cancel: &CancellationToken,
    on_exit: impl FnOnce(i32) + Send,
) -> Result<Outcome, StartupError> {
    let Collaborators {
        kernels,
        loader,
        themes,
        console,
        lines,
    } = collaborators;

    let theme = theme_for(themes.as_ref(), options.default_kernel());
    console.render_splash(&theme);

    tracing::info!(kernel = %options.default_kernel(), "constructing kernel");
    let config = options.kernel_config();
    let kernel = tokio::select! {
        kernel = kernels.construct(&config) => kernel?,
        _ = cancel.cancelled() => {
            tracing::info!("cancelled during kernel construction");
            return Ok(Outcome::Cancelled);
        }
    };

    lifecycle.register_shutdown(format!("kernel:{}", kernel.default_language()), kernel.clone());
    kernel.change_directory(options.working_dir())?;

    let notebook = match options.notebook() {
        Some(path) => {
            let document = tokio::select! {
                document = loader.parse(path, kernel.as_ref()) => document?,
                _ = cancel.cancelled() => {
                    tracing::info!("cancelled while loading notebook");
                    return Ok(Outcome::Cancelled);
                }
            };
            if document.has_executable() {
                let shown = options.notebook_as_given().unwrap_or(path);
                console.announce(&format!("📓 Running notebook: {}", shown.display()));
            }
            Some(document)
        }
        None => None,
    };

    let mut session = Session::new(kernel, console, theme, lines, cancel.child_token());
    lifecycle.register_shutdown("session", Arc::new(session.handle()));

    if cancel.is_cancelled() {
        return Ok(Outcome::Cancelled);
    }

    session
        .run(notebook.as_ref(), options.exit_after_run(), on_exit)
        .await;

    Ok(if cancel.is_cancelled() {
        Outcome::Cancelled
    } else {
        Outcome::Completed
    })
}
