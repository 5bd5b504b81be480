//! polyrepl entry point.
//!
//! ```bash
//! polyrepl --default-kernel fsharp
//! polyrepl --notebook demo.dib --exit-after-run
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use polyrepl_repl::{Collaborators, ProcessEnvironment, logging, parse_from, start_repl};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let options = match parse_from(std::env::args_os(), &ProcessEnvironment) {
        Ok(options) => options,
        Err(e) => e.exit(),
    };

    let _log_guard = logging::init(options.log_path())?;
    tracing::debug!(?options, "resolved startup options");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                cancel.cancel();
            }
        });
    }

    let exit_code = Arc::new(AtomicI32::new(0));
    let collaborators = Collaborators::standard().context("Failed to start line editor")?;
    let captured = exit_code.clone();
    start_repl(&options, collaborators, cancel, move |code| {
        captured.store(code, Ordering::SeqCst);
    })
    .await
    .context("polyrepl failed to start")?;

    let code = exit_code.load(Ordering::SeqCst);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
