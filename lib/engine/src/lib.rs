//! Execution engine for callflow call flows.
//!
//! One session runs per live call, each on its own task:
//!
//! - **Engine**: Activation, the session directory, cancellation, and resume
//! - **Runner**: The per-session walk through the graph, including parallel fan-out
//! - **Handlers**: One [`NodeHandler`] per node type, built-ins in [`handlers`]
//! - **Providers**: Contracts for speech, language, messaging, and call control
//! - **Stores**: Workflow storage, shared variables, audit, and caller fallback

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod providers;
pub mod retry;
mod runner;
pub mod session;
pub mod store;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, SessionHandle};
pub use error::{
    ActivationError, EngineError, ErrorDescriptor, ErrorKind, NodeError, ProviderError, StoreError,
};
pub use handler::{
    BranchPolicy, HandleSelection, HandlerOutput, HandlerRegistry, NodeContext, NodeHandler,
    NodeOutcome, ResumePayload, ResumeResult,
};
pub use providers::{
    CallControl, ExternalRequester, LanguageProvider, MessageDispatcher, Providers, SpeechProvider,
};
pub use retry::RetryPolicy;
pub use session::{
    NodeExecutionResult, ResultStatus, SessionMeta, SessionReport, SessionStatus, SessionView,
};
pub use store::{
    AnalyticsEvent, AuditSink, CallerFallback, InMemorySharedVariables, InMemoryWorkflowStore,
    MemoryAuditSink, SharedVariables, SpeechFallback, TracingAuditSink, WorkflowStore,
};
