//! polyrepl-kernel: the engines a polyrepl session drives.
//!
//! This crate provides:
//!
//! - **Kernel**: the `Kernel` / `KernelFactory` contracts and `KernelName`
//! - **Process kernel**: a composite kernel that runs each language's
//!   command-line host per submission
//! - **Notebook**: `Document`, `Element`, and the kernel-aware `.dib` loader

pub mod kernel;
pub mod notebook;
pub mod process;

pub use kernel::{
    Kernel, KernelConfig, KernelError, KernelFactory, KernelName, Submission, UnknownKernel,
};
pub use notebook::{DibLoader, Document, DocumentLoader, Element, LoadError};
pub use process::{ProcessKernel, ProcessKernelFactory};
