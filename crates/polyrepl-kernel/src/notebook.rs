//! Notebook documents and loaders.
//!
//! A [`Document`] is an ordered list of [`Element`]s (cells). Parsing is
//! kernel-aware: which `#!name` markers open a new cell depends on the
//! languages the kernel registers, so a loader always receives the kernel.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::kernel::Kernel;

/// Language name for prose cells. Never executed.
pub const MARKDOWN: &str = "markdown";

/// One cell of a notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Language (sub-kernel name) the cell is written in.
    pub language: String,
    /// Cell body, without the `#!name` marker line.
    pub contents: String,
    executable: bool,
}

impl Element {
    /// An element the kernel can run.
    pub fn code(language: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            contents: contents.into(),
            executable: true,
        }
    }

    /// A prose element, carried along but never submitted.
    pub fn markdown(contents: impl Into<String>) -> Self {
        Self {
            language: MARKDOWN.to_string(),
            contents: contents.into(),
            executable: false,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

/// A parsed notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub elements: Vec<Element>,
}

impl Document {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    /// Elements the kernel should run, in document order.
    pub fn executable(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.is_executable())
    }

    /// True if at least one element is executable.
    pub fn has_executable(&self) -> bool {
        self.executable().next().is_some()
    }
}

/// Errors raised while loading a notebook.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read notebook {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notebook {} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },
}

/// Turns a notebook file into a [`Document`].
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn parse(&self, path: &Path, kernel: &dyn Kernel) -> Result<Document, LoadError>;
}

/// Loader for the plain-text `.dib` layout.
///
/// ```text
/// #!markdown
/// # Title
///
/// #!fsharp
/// printfn "hi"
/// ```
///
/// A line `#!name` opens a new cell when `name` is a kernel language or
/// `markdown`; any other `#!` line is ordinary content. Text before the
/// first marker belongs to the kernel's default language. Blank cells are
/// dropped.
#[derive(Debug, Default, Clone)]
pub struct DibLoader;

impl DibLoader {
    /// Parse `.dib` text using `kernel` for language detection.
    pub fn parse_str(text: &str, kernel: &dyn Kernel) -> Document {
        let languages = kernel.languages();
        let mut elements = Vec::new();
        let mut language = kernel.default_language().as_str().to_string();
        let mut body: Vec<&str> = Vec::new();

        for line in text.lines() {
            let marker = line
                .trim_end()
                .strip_prefix("#!")
                .filter(|name| *name == MARKDOWN || languages.iter().any(|l| l == name));

            match marker {
                Some(name) => {
                    push_element(&mut elements, &language, &body);
                    language = name.to_string();
                    body.clear();
                }
                None => body.push(line),
            }
        }
        push_element(&mut elements, &language, &body);

        Document::new(elements)
    }
}

fn push_element(elements: &mut Vec<Element>, language: &str, body: &[&str]) {
    let contents = body.join("\n").trim().to_string();
    if contents.is_empty() {
        return;
    }
    let element = if language == MARKDOWN {
        Element::markdown(contents)
    } else {
        Element::code(language, contents)
    };
    elements.push(element);
}

#[async_trait]
impl DocumentLoader for DibLoader {
    async fn parse(&self, path: &Path, kernel: &dyn Kernel) -> Result<Document, LoadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|_| LoadError::Encoding {
            path: path.to_path_buf(),
        })?;
        let document = Self::parse_str(&text, kernel);
        tracing::debug!(
            path = %path.display(),
            elements = document.elements.len(),
            "parsed notebook"
        );
        Ok(document)
    }
}
