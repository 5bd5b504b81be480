//! The session — one kernel, one console, one run loop.
//!
//! A session optionally runs a notebook first, then (unless told to exit)
//! reads lines and submits them to the kernel until EOF, `/quit`, or its
//! stop token fires. The final exit code is handed to a caller-supplied
//! callback exactly once.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use directories::BaseDirs;
use polyrepl_kernel::{Document, Kernel, Submission};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::console::Console;
use crate::lifecycle::{DisposeError, Shutdown};
use crate::theme::Theme;

/// Exit code captured when a notebook element fails.
pub const NOTEBOOK_FAILURE_CODE: i32 = 1;

/// Source of interactive input.
#[async_trait]
pub trait LineSource: Send {
    /// Read one line. `None` means end of input.
    async fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Fixed lines, for tests and scripted runs.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: VecDeque<String>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn read_line(&mut self, _prompt: &str) -> Option<String> {
        self.lines.pop_front()
    }
}

struct ReadRequest {
    prompt: String,
    reply: oneshot::Sender<Option<String>>,
}

/// Line editing via rustyline, on a dedicated thread.
///
/// The editor blocks while reading, so it lives on its own thread and the
/// async side talks to it over channels. History is loaded at startup and
/// saved when the source is dropped; drop waits for the save unless the
/// editor is still blocked on a read nobody will collect.
pub struct EditorLineSource {
    requests: Option<mpsc::Sender<ReadRequest>>,
    thread: Option<JoinHandle<()>>,
    /// Set while a read request is outstanding on the editor thread.
    reading: Arc<AtomicBool>,
}

impl EditorLineSource {
    /// Editor with history under the user's data directory.
    pub fn new() -> std::io::Result<Self> {
        Self::with_history(history_path())
    }

    /// Editor with history at `history`, or none.
    pub fn with_history(history: Option<PathBuf>) -> std::io::Result<Self> {
        let (requests, rx) = mpsc::channel();
        let reading = Arc::new(AtomicBool::new(false));
        let thread = {
            let reading = reading.clone();
            std::thread::Builder::new()
                .name("polyrepl-readline".to_string())
                .spawn(move || editor_thread(rx, history, &reading))?
        };
        Ok(Self {
            requests: Some(requests),
            thread: Some(thread),
            reading,
        })
    }
}

impl Drop for EditorLineSource {
    fn drop(&mut self) {
        // Closing the channel ends the editor loop, which then saves history.
        self.requests.take();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.reading.load(Ordering::SeqCst) {
            tracing::debug!("line editor still reading; not waiting for history save");
            return;
        }
        if thread.join().is_err() {
            tracing::warn!("line editor thread panicked");
        }
    }
}

#[async_trait]
impl LineSource for EditorLineSource {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        let requests = self.requests.as_ref()?;
        let (reply, response) = oneshot::channel();
        let request = ReadRequest {
            prompt: prompt.to_string(),
            reply,
        };
        self.reading.store(true, Ordering::SeqCst);
        if requests.send(request).is_err() {
            self.reading.store(false, Ordering::SeqCst);
            return None;
        }
        response.await.ok().flatten()
    }
}

/// History file under the XDG data directory.
fn history_path() -> Option<PathBuf> {
    BaseDirs::new().map(|d| d.data_dir().join("polyrepl").join("history.txt"))
}

fn editor_thread(
    requests: mpsc::Receiver<ReadRequest>,
    history: Option<PathBuf>,
    reading: &AtomicBool,
) {
    let mut editor: Editor<(), DefaultHistory> = match Editor::new() {
        Ok(editor) => editor,
        Err(e) => {
            tracing::error!("failed to create line editor: {}", e);
            return;
        }
    };
    if let Some(path) = &history {
        // Missing history on first run is expected
        let _ = editor.load_history(path);
    }

    while let Ok(request) = requests.recv() {
        let line = loop {
            match editor.readline(&request.prompt) {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    break Some(line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => break None,
                Err(e) => {
                    tracing::error!("line editor failed: {}", e);
                    break None;
                }
            }
        };
        reading.store(false, Ordering::SeqCst);
        let _ = request.reply.send(line);
    }

    if let Some(path) = &history {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = editor.save_history(path) {
            tracing::debug!("failed to save history: {}", e);
        }
    }
}

/// What the loop does after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit(Option<i32>),
}

/// Release handle for a session, registered with the lifecycle.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    stop: CancellationToken,
}

impl SessionHandle {
    /// Stop the session's run loop. Idempotent.
    pub fn shutdown(&self) -> Result<(), DisposeError> {
        if !self.stop.is_cancelled() {
            tracing::debug!("stopping session");
            self.stop.cancel();
        }
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Shutdown for SessionHandle {
    fn shutdown(&self) -> Result<(), DisposeError> {
        SessionHandle::shutdown(self)
    }
}

/// An interactive session bound to one kernel.
pub struct Session {
    kernel: Arc<dyn Kernel>,
    console: Arc<dyn Console>,
    theme: Theme,
    lines: Box<dyn LineSource>,
    /// Language plain input is submitted to.
    language: String,
    exit_code: i32,
    stop: CancellationToken,
}

impl Session {
    /// Create a session. It stops when `stop` (or its handle) is cancelled.
    pub fn new(
        kernel: Arc<dyn Kernel>,
        console: Arc<dyn Console>,
        theme: Theme,
        lines: Box<dyn LineSource>,
        stop: CancellationToken,
    ) -> Self {
        let language = kernel.default_language().as_str().to_string();
        Self {
            kernel,
            console,
            theme,
            lines,
            language,
            exit_code: 0,
            stop,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            stop: self.stop.clone(),
        }
    }

    /// The language plain input goes to.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Run the notebook (if any), then the interactive loop unless
    /// `exit_after_run` applies, and report the exit code to `on_exit`.
    ///
    /// Returns early if the session is stopped; `on_exit` still receives the
    /// code captured so far.
    pub async fn run(
        &mut self,
        notebook: Option<&Document>,
        exit_after_run: bool,
        on_exit: impl FnOnce(i32),
    ) {
        let stop = self.stop.clone();
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                tracing::info!("session stopped before run completed");
            }
            _ = self.drive(notebook, exit_after_run) => {}
        }
        tracing::debug!(code = self.exit_code, "session finished");
        on_exit(self.exit_code);
    }

    async fn drive(&mut self, notebook: Option<&Document>, exit_after_run: bool) {
        if let Some(document) = notebook {
            self.run_notebook(document).await;
            if exit_after_run {
                return;
            }
        }

        loop {
            let prompt = self.prompt();
            let Some(line) = self.lines.read_line(&prompt).await else {
                break;
            };
            if let Flow::Quit(code) = self.process_line(&line).await {
                if let Some(code) = code {
                    self.exit_code = code;
                }
                break;
            }
        }
    }

    async fn run_notebook(&mut self, document: &Document) {
        let mut failed = 0usize;
        for (index, element) in document.executable().enumerate() {
            tracing::debug!(cell = index + 1, language = %element.language, "running cell");
            match self.kernel.submit(&element.language, &element.contents).await {
                Ok(result) => {
                    if !result.ok() {
                        failed += 1;
                    }
                    self.show(&result);
                }
                Err(e) => {
                    failed += 1;
                    self.console.write_error(&format!("cell {}: {}", index + 1, e));
                }
            }
        }
        if failed > 0 {
            tracing::info!(failed, "notebook finished with errors");
            self.exit_code = NOTEBOOK_FAILURE_CODE;
        }
    }

    fn prompt(&self) -> String {
        if self.language == self.kernel.default_language().as_str() {
            self.theme.prompt.to_string()
        } else {
            format!("{}> ", self.language)
        }
    }

    fn show(&self, result: &Submission) {
        if !result.out.is_empty() {
            self.console.write_output(&result.out);
        }
        if !result.err.is_empty() {
            self.console.write_error(&result.err);
        }
    }

    async fn process_line(&mut self, line: &str) -> Flow {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            return Flow::Continue;
        }
        if trimmed.starts_with('/') {
            return self.handle_meta_command(trimmed);
        }
        if let Some(name) = trimmed.strip_prefix("#!") {
            if !name.contains(char::is_whitespace) {
                self.switch_language(name);
                return Flow::Continue;
            }
        }

        match self.kernel.submit(&self.language, line).await {
            Ok(result) => self.show(&result),
            Err(e) => self.console.write_error(&format!("Error: {e}")),
        }
        Flow::Continue
    }

    fn switch_language(&mut self, name: &str) {
        if self.kernel.supports(name) {
            self.language = name.to_string();
            self.console.write_output(&format!("Switched to {name}"));
        } else {
            self.console.write_error(&format!(
                "Unknown kernel: {name} (available: {})",
                self.kernel.languages().join(", ")
            ));
        }
    }

    fn handle_meta_command(&mut self, cmd: &str) -> Flow {
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().copied().unwrap_or("");

        match command {
            "/quit" | "/q" | "/exit" => match parts.get(1) {
                None => Flow::Quit(None),
                Some(code) => match code.parse::<i32>() {
                    Ok(code) => Flow::Quit(Some(code)),
                    Err(_) => {
                        self.console
                            .write_error(&format!("Invalid exit code: {code}"));
                        Flow::Continue
                    }
                },
            },
            "/help" | "/h" | "/?" => {
                self.console.write_output(HELP_TEXT);
                Flow::Continue
            }
            "/kernels" => {
                let listing: Vec<String> = self
                    .kernel
                    .languages()
                    .into_iter()
                    .map(|l| {
                        if l == self.language {
                            format!("* {l}")
                        } else {
                            format!("  {l}")
                        }
                    })
                    .collect();
                self.console.write_output(&listing.join("\n"));
                Flow::Continue
            }
            _ => {
                self.console.write_error(&format!(
                    "Unknown command: {command}\nType /help for available commands."
                ));
                Flow::Continue
            }
        }
    }
}

const HELP_TEXT: &str = r#"polyrepl

Commands:
  /help, /h, /?         Show this help
  /quit, /q, /exit [N]  Exit the REPL (optionally with exit code N)
  /kernels              List kernels (* marks the active one)

Input:
  #!<kernel>            Switch the active kernel, e.g. #!fsharp
  anything else         Submitted to the active kernel
"#;
