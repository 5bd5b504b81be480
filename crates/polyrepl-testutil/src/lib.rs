//! Test utilities for polyrepl.
//!
//! Fakes for the collaborators the startup orchestrator consumes:
//! - [`FakeKernel`] — records submissions, directory changes, and shutdowns
//! - [`FakeKernelFactory`] — hands out a `FakeKernel`, optionally failing or
//!   holding construction open until released
//! - [`FakeLoader`] — returns a fixed document or a load error

#![allow(clippy::unwrap_used)]

pub mod kernel;
pub mod notebook;

pub use kernel::{FakeKernel, FakeKernelFactory};
pub use notebook::FakeLoader;
