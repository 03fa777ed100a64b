//! Sales Journal Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the sales journal workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`SjError`] and the [`Result`] alias used by every crate
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: file roles, the primary-key domain, and the run mode
//!
//! # Example
//!
//! ```no_run
//! use sj_common::types::KeyDomain;
//! use sj_common::Result;
//!
//! fn domain() -> Result<KeyDomain> {
//!     let domain = KeyDomain::new(1, 1_000_000)?;
//!     Ok(domain)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SjError};
