//! Fake kernel and factory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polyrepl_kernel::{Kernel, KernelConfig, KernelError, KernelFactory, KernelName, Submission};
use tokio::sync::Notify;

/// A kernel that evaluates nothing.
///
/// Code containing `fail` produces a failed submission; anything else
/// succeeds with output `"<language>: <code>"`.
pub struct FakeKernel {
    default_language: KernelName,
    submissions: Mutex<Vec<(String, String)>>,
    cwd: Mutex<Option<PathBuf>>,
    shutdowns: AtomicUsize,
}

impl FakeKernel {
    pub fn new(default_language: KernelName) -> Self {
        Self {
            default_language,
            submissions: Mutex::new(Vec::new()),
            cwd: Mutex::new(None),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Every `(language, code)` submitted, in order.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submissions.lock().unwrap().clone()
    }

    /// The last directory passed to `change_directory`.
    pub fn cwd(&self) -> Option<PathBuf> {
        self.cwd.lock().unwrap().clone()
    }

    /// How many times `shutdown` was called.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Kernel for FakeKernel {
    fn default_language(&self) -> KernelName {
        self.default_language
    }

    fn languages(&self) -> Vec<String> {
        KernelName::ALL.iter().map(|k| k.as_str().to_string()).collect()
    }

    async fn submit(&self, language: &str, code: &str) -> Result<Submission, KernelError> {
        if self.shutdowns() > 0 {
            return Err(KernelError::ShutDown);
        }
        if !self.supports(language) {
            return Err(KernelError::UnsupportedLanguage(language.to_string()));
        }
        self.submissions
            .lock()
            .unwrap()
            .push((language.to_string(), code.to_string()));
        if code.contains("fail") {
            Ok(Submission::failure(1, format!("error in: {code}")))
        } else {
            Ok(Submission::success(format!("{language}: {code}")))
        }
    }

    fn change_directory(&self, path: &Path) -> Result<(), KernelError> {
        *self.cwd.lock().unwrap() = Some(path.to_path_buf());
        Ok(())
    }

    fn shutdown(&self) -> Result<(), KernelError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one shared [`FakeKernel`].
pub struct FakeKernelFactory {
    kernel: Arc<FakeKernel>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    constructed: AtomicUsize,
    configs: Mutex<Vec<KernelConfig>>,
}

impl FakeKernelFactory {
    pub fn new(default_language: KernelName) -> Self {
        Self {
            kernel: Arc::new(FakeKernel::new(default_language)),
            fail: false,
            gate: None,
            started: Arc::new(Notify::new()),
            constructed: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
        }
    }

    /// Construction fails with `HostNotFound`.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Construction waits until [`FakeKernelFactory::release`] is called.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Let a gated construction finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Resolves once `construct` has been entered.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    pub fn kernel(&self) -> Arc<FakeKernel> {
        self.kernel.clone()
    }

    /// Number of kernels handed out.
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn configs(&self) -> Vec<KernelConfig> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl KernelFactory for FakeKernelFactory {
    async fn construct(&self, config: &KernelConfig) -> Result<Arc<dyn Kernel>, KernelError> {
        self.configs.lock().unwrap().push(config.clone());
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(KernelError::HostNotFound {
                kernel: config.default_kernel,
                program: "fake-host".to_string(),
            });
        }
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(self.kernel.clone())
    }
}
