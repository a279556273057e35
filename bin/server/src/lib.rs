//! callflow call-ingestion service.
//!
//! Accepts inbound calls over HTTP, runs them through the execution engine,
//! and exposes session status, cancellation, resume, and workflow
//! activation. Speech, language, messaging, and call control are reached
//! through an HTTP sidecar; workflows are read from a directory.

pub mod bridge;
pub mod config;
pub mod error;
pub mod routes;
pub mod store;
