//! End-to-end startup tests: options → orchestrator → teardown.
//!
//! Kernels, loaders, and input are fakes; cancellation is an injected token
//! so races with kernel construction can be reproduced deterministically.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::error::ErrorKind;
use polyrepl_kernel::{DibLoader, DocumentLoader, KernelName};
use polyrepl_repl::{
    BuiltinThemes, Collaborators, DEFAULT_KERNEL_ENV, LineSource, MapEnvironment, Outcome,
    RecordingConsole, ScriptedLines, StartupError, StartupOptions, parse_from, start_repl,
};
use polyrepl_testutil::{FakeKernelFactory, FakeLoader};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

fn env_in(dir: &Path) -> MapEnvironment {
    MapEnvironment::new().with_current_dir(dir)
}

fn options(dir: &Path, args: &[&str]) -> StartupOptions {
    let argv = std::iter::once("polyrepl").chain(args.iter().copied());
    parse_from(argv, &env_in(dir)).expect("options should resolve")
}

struct Harness {
    factory: Arc<FakeKernelFactory>,
    console: Arc<RecordingConsole>,
    codes: Arc<Mutex<Vec<i32>>>,
}

impl Harness {
    fn new(factory: FakeKernelFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            console: Arc::new(RecordingConsole::new()),
            codes: Arc::default(),
        }
    }

    fn collaborators(
        &self,
        loader: Arc<dyn DocumentLoader>,
        lines: Box<dyn LineSource>,
    ) -> Collaborators {
        Collaborators {
            kernels: self.factory.clone(),
            loader,
            themes: Arc::new(BuiltinThemes),
            console: self.console.clone(),
            lines,
        }
    }

    fn on_exit(&self) -> impl FnOnce(i32) + Send + 'static {
        let codes = self.codes.clone();
        move |code| codes.lock().unwrap().push(code)
    }

    fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

/// Input that never arrives; signals when the loop starts waiting.
struct PendingLines {
    waiting: Arc<Notify>,
}

#[async_trait]
impl LineSource for PendingLines {
    async fn read_line(&mut self, _prompt: &str) -> Option<String> {
        self.waiting.notify_one();
        std::future::pending().await
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn resolution_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("demo.dib"), "1").unwrap();
    let env = env_in(dir.path()).with_var(DEFAULT_KERNEL_ENV, "pwsh");
    let args = ["polyrepl", "--notebook", "demo.dib", "--exit-after-run"];

    let first = parse_from(args, &env).unwrap();
    let second = parse_from(args, &env).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.default_kernel(), KernelName::Pwsh);
}

#[test]
fn missing_notebook_fails_before_any_kernel_work() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse_from(
        ["polyrepl", "--default-kernel", "sql", "--notebook", "./missing.dib"],
        &env_in(dir.path()),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValueValidation);
    assert!(err.to_string().contains("missing.dib"), "got: {err}");
    assert_ne!(err.exit_code(), 0);
}

#[test]
fn unsupported_kernel_lists_supported_names() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse_from(["polyrepl", "--default-kernel", "ruby"], &env_in(dir.path()))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    let msg = err.to_string();
    for name in ["csharp", "fsharp", "pwsh", "sql"] {
        assert!(msg.contains(name), "expected {name} in: {msg}");
    }
    assert_ne!(err.exit_code(), 0);
}

// ============================================================================
// Normal runs
// ============================================================================

#[tokio::test]
async fn fsharp_without_notebook_enters_interactive_mode() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &["--default-kernel", "fsharp"]);
    let loader = Arc::new(FakeLoader::with_cells("fsharp", 1));
    let harness = Harness::new(FakeKernelFactory::new(KernelName::FSharp));
    let collaborators = harness.collaborators(
        loader.clone(),
        Box::new(ScriptedLines::new(["printfn \"hi\""])),
    );

    let startup = start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    let kernel = harness.factory.kernel();
    assert_eq!(startup.outcome, Outcome::Completed);
    assert_eq!(harness.console.splashes(), vec!["F#"]);
    assert_eq!(harness.factory.constructed(), 1);
    assert_eq!(harness.factory.configs()[0].default_kernel, KernelName::FSharp);
    assert!(loader.parsed().is_empty());
    assert_eq!(
        kernel.submissions(),
        vec![("fsharp".to_string(), "printfn \"hi\"".to_string())]
    );
    assert_eq!(kernel.cwd().as_deref(), Some(dir.path()));
    assert_eq!(harness.codes(), vec![0]);
    assert_eq!(kernel.shutdowns(), 1);
    assert!(startup.lifecycle.is_torn_down());
    assert_eq!(startup.lifecycle.release_order(), vec!["session", "kernel:fsharp"]);
}

#[tokio::test]
async fn notebook_with_exit_after_run_skips_interactive_mode() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("demo.dib"),
        "#!markdown\n# Demo\n\n#!csharp\nvar x = 1;\n\n#!csharp\nx + 1\n\n#!pwsh\nGet-Date\n",
    )
    .unwrap();
    let opts = options(dir.path(), &["--notebook", "demo.dib", "--exit-after-run"]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let collaborators = harness.collaborators(
        Arc::new(DibLoader),
        Box::new(ScriptedLines::new(["never read"])),
    );

    let startup = start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    let kernel = harness.factory.kernel();
    assert_eq!(startup.outcome, Outcome::Completed);
    assert_eq!(
        harness.console.announcements(),
        vec!["📓 Running notebook: demo.dib"]
    );
    let languages: Vec<String> = kernel.submissions().into_iter().map(|(l, _)| l).collect();
    assert_eq!(languages, vec!["csharp", "csharp", "pwsh"]);
    assert_eq!(harness.codes(), vec![0]);
    assert_eq!(kernel.shutdowns(), 1);
}

#[tokio::test]
async fn empty_notebook_is_not_announced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.dib"), "#!markdown\nJust prose.\n").unwrap();
    let opts = options(dir.path(), &["--notebook", "notes.dib"]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let collaborators =
        harness.collaborators(Arc::new(DibLoader), Box::new(ScriptedLines::new(["1"])));

    start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    assert!(harness.console.announcements().is_empty());
    assert_eq!(harness.factory.kernel().submissions().len(), 1);
}

#[tokio::test]
async fn notebook_is_parsed_with_constructed_kernel() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("demo.dib"), "ignored").unwrap();
    let opts = options(
        dir.path(),
        &["--default-kernel", "sql", "--notebook", "demo.dib", "--exit-after-run"],
    );
    let loader = Arc::new(FakeLoader::with_cells("sql", 2));
    let harness = Harness::new(FakeKernelFactory::new(KernelName::Sql));
    let collaborators = harness.collaborators(loader.clone(), Box::new(ScriptedLines::default()));

    start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    assert_eq!(
        loader.parsed(),
        vec![(dir.path().join("demo.dib"), "sql".to_string())]
    );
    // sql has no theme of its own.
    assert_eq!(harness.console.splashes(), vec!["C#"]);
    assert_eq!(harness.factory.kernel().submissions().len(), 2);
}

#[tokio::test]
async fn explicit_quit_code_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &[]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let collaborators = harness.collaborators(
        Arc::new(DibLoader),
        Box::new(ScriptedLines::new(["/exit 4"])),
    );

    start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    assert_eq!(harness.codes(), vec![4]);
}

#[tokio::test]
async fn late_registration_on_returned_lifecycle_releases_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &[]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let collaborators =
        harness.collaborators(Arc::new(DibLoader), Box::new(ScriptedLines::default()));

    let startup = start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap();

    let released = Arc::new(Mutex::new(false));
    let flag = released.clone();
    startup.lifecycle.register("extra", move || {
        *flag.lock().unwrap() = true;
        Ok(())
    });
    assert!(*released.lock().unwrap());
    assert!(startup.lifecycle.teardown().is_empty());
    assert_eq!(harness.factory.kernel().shutdowns(), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn kernel_construction_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &[]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp).failing());
    let collaborators =
        harness.collaborators(Arc::new(DibLoader), Box::new(ScriptedLines::new(["1"])));

    let err = start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap_err();

    assert!(matches!(err, StartupError::Kernel(_)), "got: {err:?}");
    assert_eq!(harness.console.splashes(), vec!["C#"]);
    assert!(harness.codes().is_empty());
    assert_eq!(harness.factory.kernel().shutdowns(), 0);
}

#[tokio::test]
async fn notebook_load_failure_still_releases_kernel() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.dib"), "x").unwrap();
    let opts = options(dir.path(), &["--notebook", "broken.dib"]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let collaborators = harness.collaborators(
        Arc::new(FakeLoader::failing()),
        Box::new(ScriptedLines::new(["1"])),
    );

    let err = start_repl(&opts, collaborators, CancellationToken::new(), harness.on_exit())
        .await
        .unwrap_err();

    let kernel = harness.factory.kernel();
    assert!(matches!(err, StartupError::Load(_)), "got: {err:?}");
    assert!(kernel.submissions().is_empty());
    assert!(harness.codes().is_empty());
    assert_eq!(kernel.shutdowns(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancellation_during_kernel_construction_abandons_it() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &[]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp).gated());
    let collaborators =
        harness.collaborators(Arc::new(DibLoader), Box::new(ScriptedLines::new(["1"])));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(start_repl_owned(
        opts,
        collaborators,
        cancel.clone(),
        harness.on_exit(),
    ));
    harness.factory.started().await;
    cancel.cancel();
    let startup = task.await.unwrap().unwrap();

    assert_eq!(startup.outcome, Outcome::Cancelled);
    assert_eq!(harness.factory.constructed(), 0);
    assert_eq!(harness.factory.kernel().shutdowns(), 0);
    assert!(harness.codes().is_empty());
    assert!(startup.lifecycle.is_torn_down());
}

#[tokio::test]
async fn cancellation_racing_construction_releases_at_most_once() {
    for _ in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), &[]);
        let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp).gated());
        let collaborators =
            harness.collaborators(Arc::new(DibLoader), Box::new(ScriptedLines::new(["1"])));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(start_repl_owned(
            opts,
            collaborators,
            cancel.clone(),
            harness.on_exit(),
        ));
        harness.factory.started().await;
        harness.factory.release();
        cancel.cancel();
        let startup = task.await.unwrap().unwrap();

        let kernel = harness.factory.kernel();
        assert!(kernel.shutdowns() <= 1);
        assert_eq!(kernel.shutdowns(), harness.factory.constructed());
        assert!(startup.lifecycle.teardown().is_empty());
    }
}

#[tokio::test]
async fn cancellation_during_interactive_mode_tears_down_once() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &[]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::CSharp));
    let waiting = Arc::new(Notify::new());
    let collaborators = harness.collaborators(
        Arc::new(DibLoader),
        Box::new(PendingLines {
            waiting: waiting.clone(),
        }),
    );
    let cancel = CancellationToken::new();

    let task = tokio::spawn(start_repl_owned(
        opts,
        collaborators,
        cancel.clone(),
        harness.on_exit(),
    ));
    waiting.notified().await;
    cancel.cancel();
    let startup = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session should stop on cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(startup.outcome, Outcome::Cancelled);
    assert_eq!(harness.codes(), vec![0]);
    assert_eq!(harness.factory.kernel().shutdowns(), 1);
    assert_eq!(startup.lifecycle.release_order(), vec!["session", "kernel:csharp"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_on_worker_threads_stops_session_before_kernel() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), &["--default-kernel", "pwsh"]);
    let harness = Harness::new(FakeKernelFactory::new(KernelName::Pwsh));
    let waiting = Arc::new(Notify::new());
    let collaborators = harness.collaborators(
        Arc::new(DibLoader),
        Box::new(PendingLines {
            waiting: waiting.clone(),
        }),
    );
    let cancel = CancellationToken::new();

    let task = tokio::spawn(start_repl_owned(
        opts,
        collaborators,
        cancel.clone(),
        harness.on_exit(),
    ));
    waiting.notified().await;
    cancel.cancel();
    let startup = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session should stop on cancellation")
        .unwrap()
        .unwrap();

    // Teardown has fully finished by the time start_repl returns, whichever
    // task ran it.
    assert_eq!(startup.lifecycle.release_order(), vec!["session", "kernel:pwsh"]);
    assert_eq!(harness.factory.kernel().shutdowns(), 1);
}

/// `start_repl` with owned options, for spawning.
async fn start_repl_owned(
    options: StartupOptions,
    collaborators: Collaborators,
    cancel: CancellationToken,
    on_exit: impl FnOnce(i32) + Send + 'static,
) -> Result<polyrepl_repl::Startup, StartupError> {
    start_repl(&options, collaborators, cancel, on_exit).await
}
