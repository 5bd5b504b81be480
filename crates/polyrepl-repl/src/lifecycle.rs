//! Resource lifecycle: at-most-once, reverse-order release.
//!
//! Everything the REPL acquires at startup (kernel, session) is registered
//! here as a release closure. [`Lifecycle::teardown`] runs them newest-first
//! exactly once, no matter how many paths ask for it: normal completion,
//! an external cancellation, or the last handle being dropped.
//!
//! ```text
//! register(kernel)  register(session)        teardown()
//!   [kernel]  ──►  [kernel, session]  ──►  session, kernel  (reverse)
//!                                          teardown() again: no-op
//! ```
//!
//! The registry does not know about dependencies; callers register in
//! acquisition order so that reverse order releases dependents first.

use std::sync::{Arc, Mutex, MutexGuard};

use polyrepl_kernel::{Kernel, KernelError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A release step failed. Other resources are still released.
#[derive(Debug, Error)]
pub enum DisposeError {
    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("{0}")]
    Other(String),
}

/// A resource with a synchronous release step.
pub trait Shutdown: Send + Sync {
    fn shutdown(&self) -> Result<(), DisposeError>;
}

impl Shutdown for dyn Kernel {
    fn shutdown(&self) -> Result<(), DisposeError> {
        Kernel::shutdown(self).map_err(DisposeError::from)
    }
}

type Release = Box<dyn FnOnce() -> Result<(), DisposeError> + Send>;

struct Entry {
    label: String,
    release: Release,
}

impl Entry {
    fn run(self, report: &mut TeardownReport) {
        match (self.release)() {
            Ok(()) => {
                tracing::debug!(resource = %self.label, "released");
                report.released.push(self.label);
            }
            Err(e) => {
                tracing::warn!(resource = %self.label, error = %e, "release failed");
                report.failures.push((self.label, e));
            }
        }
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    /// Labels already handed to their release step, oldest first.
    released: Vec<String>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    done: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed || state.entries.is_empty() {
            return;
        }
        tracing::debug!(
            pending = state.entries.len(),
            "lifecycle dropped without teardown; releasing"
        );
        let mut report = TeardownReport::default();
        for entry in std::mem::take(&mut state.entries).into_iter().rev() {
            entry.run(&mut report);
        }
        state.closed = true;
    }
}

/// What a teardown released.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Labels of resources released successfully, in release order.
    pub released: Vec<String>,
    /// Resources whose release failed, in release order.
    pub failures: Vec<(String, DisposeError)>,
}

impl TeardownReport {
    /// True if this call released nothing (e.g. teardown already ran).
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.failures.is_empty()
    }
}

/// Shared handle to the process's disposal registry.
///
/// Clones refer to the same registry.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Lifecycle")
            .field(
                "pending",
                &state.entries.iter().map(|e| e.label.as_str()).collect::<Vec<_>>(),
            )
            .field("closed", &state.closed)
            .finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                done: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a resource's release step.
    ///
    /// After teardown has run the registry is closed: `release` runs
    /// immediately instead, so late acquisitions are still released once.
    pub fn register<F>(&self, label: impl Into<String>, release: F)
    where
        F: FnOnce() -> Result<(), DisposeError> + Send + 'static,
    {
        let entry = Entry {
            label: label.into(),
            release: Box::new(release),
        };
        {
            let mut state = self.state();
            if !state.closed {
                tracing::debug!(resource = %entry.label, "registered");
                state.entries.push(entry);
                return;
            }
            state.released.push(entry.label.clone());
        }
        tracing::debug!(resource = %entry.label, "registry closed; releasing immediately");
        entry.run(&mut TeardownReport::default());
    }

    /// Register something that knows how to shut itself down.
    pub fn register_shutdown<S>(&self, label: impl Into<String>, resource: Arc<S>)
    where
        S: Shutdown + ?Sized + 'static,
    {
        self.register(label, move || resource.shutdown())
    }

    /// Number of resources waiting for teardown.
    pub fn pending(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.state().closed
    }

    /// Labels of every resource released so far, in the order their release
    /// steps ran. Failed releases are included.
    pub fn release_order(&self) -> Vec<String> {
        self.state().released.clone()
    }

    /// Release every registered resource, newest first.
    ///
    /// Only the first call does anything; later or concurrent calls return
    /// an empty report. A failing release is logged and recorded, and the
    /// remaining resources are still released.
    pub fn teardown(&self) -> TeardownReport {
        let entries = {
            let mut state = self.state();
            if state.closed {
                return TeardownReport::default();
            }
            state.closed = true;
            std::mem::take(&mut state.entries)
        };

        let order: Vec<String> = entries.iter().rev().map(|e| e.label.clone()).collect();
        let mut report = TeardownReport::default();
        for entry in entries.into_iter().rev() {
            entry.run(&mut report);
        }
        self.state().released.extend(order);
        self.inner.done.cancel();

        tracing::info!(
            released = report.released.len(),
            failed = report.failures.len(),
            "teardown complete"
        );
        report
    }

    /// Resolves once [`Lifecycle::teardown`] has finished.
    pub async fn torn_down(&self) {
        self.inner.done.cancelled().await;
    }

    /// Tear down when `token` is cancelled.
    ///
    /// The spawned task ends quietly if teardown runs some other way first.
    pub fn bind_cancellation(&self, token: CancellationToken) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("cancellation received; tearing down");
                    lifecycle.teardown();
                }
                _ = lifecycle.torn_down() => {}
            }
        })
    }
}
