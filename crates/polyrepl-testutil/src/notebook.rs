//! Fake notebook loader.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use polyrepl_kernel::{Document, DocumentLoader, Element, Kernel, LoadError};

/// Returns a fixed document, or fails with `LoadError::Encoding`.
pub struct FakeLoader {
    document: Option<Document>,
    parsed: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeLoader {
    pub fn new(document: Document) -> Self {
        Self {
            document: Some(document),
            parsed: Mutex::new(Vec::new()),
        }
    }

    /// A document of `count` code cells in `language`: `cell 1`, `cell 2`, ...
    pub fn with_cells(language: &str, count: usize) -> Self {
        let elements = (1..=count)
            .map(|i| Element::code(language, format!("cell {i}")))
            .collect();
        Self::new(Document::new(elements))
    }

    pub fn failing() -> Self {
        Self {
            document: None,
            parsed: Mutex::new(Vec::new()),
        }
    }

    /// Every `(path, kernel default language)` parsed, in order.
    pub fn parsed(&self) -> Vec<(PathBuf, String)> {
        self.parsed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentLoader for FakeLoader {
    async fn parse(&self, path: &Path, kernel: &dyn Kernel) -> Result<Document, LoadError> {
        self.parsed.lock().unwrap().push((
            path.to_path_buf(),
            kernel.default_language().as_str().to_string(),
        ));
        self.document.clone().ok_or_else(|| LoadError::Encoding {
            path: path.to_path_buf(),
        })
    }
}
