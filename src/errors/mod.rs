//! Centralized error handling for cronloop
//!
//! Every component reports failures through one of the typed enums in
//! [`types`]; the binary and the long-running loops wrap them in
//! `anyhow::Error` at the edges.
//!
//! # Error Categories
//!
//! - **Cron Errors**: malformed schedule expressions
//! - **Job Definition Errors**: unreadable or invalid job files
//! - **State Errors**: processed-item store I/O and corruption
//! - **Source Errors**: failures while polling an external input source
//!
//! # Usage
//!
//! ```rust
//! use cronloop::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::configuration("jobs_dir is missing"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for state store Results
pub type StateResult<T> = Result<T, StateError>;

/// Convenience type alias for input source Results
pub type SourceResult<T> = Result<T, SourceError>;
