//! Core identifiers and error handling shared by the callflow crates.
//!
//! The workflow model, validator, and execution engine all build on the
//! strongly-typed IDs defined here.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, SessionId, WorkflowId};
