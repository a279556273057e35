//! Walks one session through its workflow graph.
//!
//! The runner owns everything a single session needs: the immutable
//! workflow, the live [`SessionState`], the pending resume slots, and the
//! cancellation token. It runs entirely inside the session's own task;
//! parallel branches are futures polled concurrently by that task.

use crate::config::EngineConfig;
use crate::error::{ErrorDescriptor, ErrorKind, NodeError};
use crate::handler::{
    BranchPolicy, HandleSelection, HandlerOutput, HandlerRegistry, NodeContext, NodeHandler,
    NodeOutcome, ResumeResult,
};
use crate::retry::RetryPolicy;
use crate::session::{NodeExecutionResult, SessionMeta, SessionReport, SessionState};
use crate::store::{AuditSink, SharedVariables};
use callflow_workflow::{
    Expression, NodeConnection, NodeId, NodeTypeDefinition, NodeTypeRegistry, VariablePatch,
    VariableStore, Workflow, WorkflowNode, handles,
};
use futures::future::{BoxFuture, join_all};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators shared by every session of an engine.
pub(crate) struct Runtime {
    pub registry: Arc<NodeTypeRegistry>,
    pub handlers: HandlerRegistry,
    pub config: EngineConfig,
    pub shared: Arc<dyn SharedVariables>,
    pub audit: Arc<dyn AuditSink>,
}

/// Resume slots of suspended nodes, keyed by resume token.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingResumes {
    slots: Arc<Mutex<HashMap<String, oneshot::Sender<ResumeResult>>>>,
}

impl PendingResumes {
    fn open(&self, token: String) -> ResumeSlot {
        let (sender, receiver) = oneshot::channel();
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), sender);
        ResumeSlot {
            token,
            receiver,
            pending: self.clone(),
        }
    }

    fn close(&self, token: &str) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    /// Hands `result` to the node waiting on `token`.
    ///
    /// Returns false if no node is waiting on it.
    pub fn deliver(&self, token: &str, result: ResumeResult) -> bool {
        let sender = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        sender.is_some_and(|sender| sender.send(result).is_ok())
    }
}

/// A registered resume token. Closed when dropped.
struct ResumeSlot {
    token: String,
    receiver: oneshot::Receiver<ResumeResult>,
    pending: PendingResumes,
}

impl Drop for ResumeSlot {
    fn drop(&mut self) {
        self.pending.close(&self.token);
    }
}

/// How a walk ended.
#[derive(Debug, Clone, PartialEq)]
enum Exit {
    /// An `end` node was reached.
    Completed,
    /// A branch reached its join node.
    Joined,
    Failed(ErrorDescriptor),
    Cancelled,
}

/// One line of execution: the root of the session or a parallel branch.
struct Track {
    vars: VariableStore,
    /// Every write made on this track, for merging into the parent.
    patch: VariablePatch,
    /// `None` on the root track.
    branch: Option<String>,
    /// Visits buffered until the branch is merged.
    records: Vec<NodeExecutionResult>,
    cancel: CancellationToken,
}

impl Track {
    fn is_root(&self) -> bool {
        self.branch.is_none()
    }

    fn write(&mut self, patch: VariablePatch) {
        self.vars.apply(&patch);
        self.patch.extend(patch);
    }
}

pub(crate) struct SessionRunner {
    runtime: Arc<Runtime>,
    workflow: Arc<Workflow>,
    meta: SessionMeta,
    state: SessionState,
    pending: PendingResumes,
    cancel: CancellationToken,
    steps: AtomicU64,
}

impl SessionRunner {
    pub fn new(
        runtime: Arc<Runtime>,
        workflow: Arc<Workflow>,
        meta: SessionMeta,
        state: SessionState,
        pending: PendingResumes,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            workflow,
            meta,
            state,
            pending,
            cancel,
            steps: AtomicU64::new(0),
        }
    }

    /// Runs the session from `start` until it reaches a terminal state.
    pub async fn run(self, start: NodeId, variables: VariableStore) -> SessionReport {
        info!(
            session_id = %self.meta.session_id,
            workflow_id = %self.meta.workflow_id,
            call_id = %self.meta.call_id,
            "session started"
        );
        self.state.start();
        let mut root = Track {
            vars: variables,
            patch: VariablePatch::new(),
            branch: None,
            records: Vec::new(),
            cancel: self.cancel.clone(),
        };
        match self.walk(&mut root, start, None).await {
            Exit::Completed | Exit::Joined => self.state.complete(),
            Exit::Failed(error) => {
                warn!(session_id = %self.meta.session_id, %error, "session failed");
                self.state.fail(error);
            }
            Exit::Cancelled => self.state.cancel(),
        }

        let view = self.state.snapshot();
        info!(
            session_id = %self.meta.session_id,
            status = ?view.status,
            steps = view.history.len(),
            "session finished"
        );
        SessionReport {
            view,
            variables: root.vars.to_json(),
        }
    }

    fn walk<'a>(
        &'a self,
        track: &'a mut Track,
        start: NodeId,
        join: Option<&'a NodeId>,
    ) -> BoxFuture<'a, Exit> {
        Box::pin(async move {
            let mut current = start;
            loop {
                if join == Some(&current) {
                    return Exit::Joined;
                }
                if track.cancel.is_cancelled() {
                    return Exit::Cancelled;
                }
                let bound = self.runtime.config.max_steps_per_session;
                if self.steps.fetch_add(1, Ordering::SeqCst) >= bound {
                    return Exit::Failed(ErrorDescriptor::new(
                        ErrorKind::LoopBoundExceeded,
                        format!("session exceeded {bound} steps"),
                    ));
                }

                let Some(node) = self.workflow.graph.get_node(&current) else {
                    return Exit::Failed(ErrorDescriptor::new(
                        ErrorKind::DeadEnd,
                        format!("node {current} does not exist"),
                    ));
                };
                let node_type = self.runtime.registry.canonical(&node.node_type);
                let visit =
                    NodeExecutionResult::begin(&node.id, node_type, track.branch.as_deref());
                let resolved = self
                    .runtime
                    .registry
                    .lookup(node_type)
                    .ok()
                    .zip(self.runtime.handlers.get(node_type));
                let Some((definition, handler)) = resolved else {
                    let error = ErrorDescriptor::unknown_node_type(&node.id, &node.node_type);
                    self.record(track, visit.fail(error.clone()));
                    return Exit::Failed(error);
                };

                debug!(
                    session_id = %self.meta.session_id,
                    node_id = %node.id,
                    node_type,
                    branch = track.branch.as_deref(),
                    "entering node"
                );
                if track.is_root() {
                    self.state.enter(&visit);
                }

                let execution = self.execute(node, definition, handler.as_ref(), track);
                let outcome = if definition.suspends {
                    if track.is_root() {
                        self.state.suspend();
                    }
                    let outcome = self.unless_cancelled(&track.cancel, execution).await;
                    if track.is_root() {
                        self.state.resume();
                    }
                    outcome
                } else {
                    Some(execution.await)
                };
                let Some((result, attempts)) = outcome else {
                    info!(
                        session_id = %self.meta.session_id,
                        node_id = %node.id,
                        "visit abandoned on cancellation"
                    );
                    return Exit::Cancelled;
                };
                let mut visit = visit;
                visit.attempts = attempts;
                let result = match result {
                    Ok(output) => self.forward_shared(&output.variables).await.map(|()| output),
                    Err(error) => Err(error),
                };

                match result {
                    Ok(output) => {
                        let HandlerOutput {
                            mut variables,
                            handle,
                            output,
                        } = output;
                        let selected = handle.label().map(str::to_string);
                        self.record(track, visit.succeed(output.clone(), selected));
                        if let Some(output) = output {
                            variables = variables.set(format!("nodes.{}", node.id), output);
                        }
                        track.write(variables);

                        current = match handle {
                            HandleSelection::Terminate => return Exit::Completed,
                            HandleSelection::FanOut { join: rejoin, policy } => {
                                match self.fan_out(track, node, &rejoin, policy).await {
                                    Exit::Joined => rejoin,
                                    Exit::Failed(error) if error.kind.is_routable() => {
                                        let visit = NodeExecutionResult::begin(
                                            &node.id,
                                            node_type,
                                            track.branch.as_deref(),
                                        );
                                        self.record(track, visit.fail(error.clone()));
                                        match self.route_error(track, node, &error) {
                                            Some(target) => target,
                                            None => return Exit::Failed(error),
                                        }
                                    }
                                    exit => return exit,
                                }
                            }
                            HandleSelection::Default => {
                                match self.next(&node.id, handles::DEFAULT, &track.vars) {
                                    Some(next) => next,
                                    None => {
                                        return Exit::Failed(ErrorDescriptor::dead_end(
                                            &node.id,
                                            handles::DEFAULT,
                                        ));
                                    }
                                }
                            }
                            HandleSelection::Named(selected) => {
                                match self.next(&node.id, &selected, &track.vars) {
                                    Some(next) => next,
                                    None => {
                                        return Exit::Failed(ErrorDescriptor::dead_end(
                                            &node.id, &selected,
                                        ));
                                    }
                                }
                            }
                        };
                    }
                    Err(error) => {
                        let descriptor = error.describe(&node.id).after_attempts(attempts);
                        warn!(
                            session_id = %self.meta.session_id,
                            node_id = %node.id,
                            attempts,
                            error = %descriptor,
                            "node failed"
                        );
                        self.record(track, visit.fail(descriptor.clone()));
                        current = match self.route_error(track, node, &descriptor) {
                            Some(target) => target,
                            None => return Exit::Failed(descriptor),
                        };
                    }
                }
            }
        })
    }

    /// Runs one visit under the node's retry policy.
    ///
    /// Returns the final result and the number of attempts made.
    async fn execute(
        &self,
        node: &WorkflowNode,
        definition: &NodeTypeDefinition,
        handler: &dyn NodeHandler,
        track: &Track,
    ) -> (Result<HandlerOutput, NodeError>, u32) {
        let config = &self.runtime.config;
        let policy = RetryPolicy::for_node(node, definition, config);
        let outgoing: Vec<&NodeConnection> = self
            .workflow
            .graph
            .outgoing(&node.id)
            .into_iter()
            .map(|c| c.connection)
            .collect();

        let mut attempt = 1;
        loop {
            if track.is_root() {
                self.state.attempting(attempt);
            }
            let ctx = NodeContext {
                node,
                definition,
                variables: &track.vars,
                meta: &self.meta,
                outgoing: outgoing.clone(),
                attempt,
                engine: config,
                shared: self.runtime.shared.as_ref(),
                audit: self.runtime.audit.as_ref(),
            };
            let result = match policy.timeout {
                Some(limit) => tokio::time::timeout(limit, self.attempt(handler, &ctx))
                    .await
                    .unwrap_or(Err(NodeError::TimedOut { after: limit })),
                None => self.attempt(handler, &ctx).await,
            };
            match result {
                Err(error) if error.is_retryable() && attempt < policy.max_attempts() => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        session_id = %self.meta.session_id,
                        node_id = %node.id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "attempt failed, retrying"
                    );
                    if track.is_root() {
                        self.state.backing_off(attempt);
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return (result, attempt),
            }
        }
    }

    /// One handler invocation, including the wait for a resume if the
    /// handler suspends.
    async fn attempt(
        &self,
        handler: &dyn NodeHandler,
        ctx: &NodeContext<'_>,
    ) -> Result<HandlerOutput, NodeError> {
        // Opened before the handler runs so a resume that races the
        // handler's return is not lost.
        let expected = ctx.definition.suspends.then(|| self.pending.open(ctx.resume_token()));
        match handler.execute(ctx).await? {
            NodeOutcome::Complete(output) => Ok(output),
            NodeOutcome::Suspend { resume_token } => {
                let mut slot = match expected {
                    Some(slot) if slot.token == resume_token => slot,
                    _ => self.pending.open(resume_token),
                };
                debug!(
                    session_id = %self.meta.session_id,
                    node_id = %ctx.node.id,
                    resume_token = %slot.token,
                    "waiting for resume"
                );
                (&mut slot.receiver)
                    .await
                    .unwrap_or_else(|_| Err(NodeError::failed("resume slot closed")))
            }
        }
    }

    /// Races `future` against cancellation. Once cancelled the future gets
    /// the grace period to finish; its result is discarded either way.
    async fn unless_cancelled<F: Future>(
        &self,
        cancel: &CancellationToken,
        future: F,
    ) -> Option<F::Output> {
        tokio::pin!(future);
        tokio::select! {
            output = &mut future => Some(output),
            () = cancel.cancelled() => {
                let grace = self.runtime.config.cancel_grace();
                if tokio::time::timeout(grace, &mut future).await.is_err() {
                    debug!(session_id = %self.meta.session_id, "grace period elapsed");
                }
                None
            }
        }
    }

    /// Runs every passing `default` connection of a parallel node until
    /// each reaches `join`, then merges the branches into `track`.
    async fn fan_out(
        &self,
        track: &mut Track,
        node: &WorkflowNode,
        join: &NodeId,
        policy: BranchPolicy,
    ) -> Exit {
        let starts: Vec<NodeId> = self
            .workflow
            .graph
            .outgoing_on(&node.id, handles::DEFAULT)
            .into_iter()
            .filter(|c| self.guard_passes(c.connection, &track.vars))
            .map(|c| c.target.id.clone())
            .collect();
        if starts.is_empty() {
            return Exit::Failed(ErrorDescriptor::dead_end(&node.id, handles::DEFAULT));
        }

        let group = track.cancel.child_token();
        let branches = starts.into_iter().enumerate().map(|(index, start)| {
            let label = match &track.branch {
                Some(parent) => format!("{parent}/{}#{index}", node.id),
                None => format!("{}#{index}", node.id),
            };
            let mut branch = Track {
                vars: track.vars.clone(),
                patch: VariablePatch::new(),
                branch: Some(label),
                records: Vec::new(),
                cancel: group.clone(),
            };
            let group = group.clone();
            async move {
                let exit = self.walk(&mut branch, start, Some(join)).await;
                if policy == BranchPolicy::FailFast && matches!(exit, Exit::Failed(_)) {
                    group.cancel();
                }
                (branch, exit)
            }
        });
        let finished = join_all(branches).await;

        let mut failures: Vec<(String, ErrorDescriptor)> = Vec::new();
        for (branch, exit) in finished {
            let label = branch.branch.clone().unwrap_or_default();
            for record in branch.records {
                self.record(track, record);
            }
            match exit {
                Exit::Joined | Exit::Completed => track.write(branch.patch),
                Exit::Failed(error) => failures.push((label, error)),
                Exit::Cancelled => {}
            }
        }

        if track.cancel.is_cancelled() {
            return Exit::Cancelled;
        }
        if let Some((_, fatal)) = failures.iter().find(|(_, e)| !e.kind.is_routable()) {
            return Exit::Failed(fatal.clone());
        }
        match (policy, failures.first()) {
            (_, None) => Exit::Joined,
            (BranchPolicy::FailFast, Some((label, error))) => Exit::Failed(
                ErrorDescriptor::new(
                    error.kind,
                    format!("branch {label} failed: {}", error.message),
                )
                .at(&node.id),
            ),
            (BranchPolicy::BestEffort, Some(_)) => {
                let failed: Vec<JsonValue> = failures
                    .iter()
                    .map(|(label, error)| {
                        serde_json::json!({ "branch": label, "error": error })
                    })
                    .collect();
                track.write(
                    VariablePatch::new()
                        .set(format!("nodes.{}.failedBranches", node.id), failed),
                );
                Exit::Joined
            }
        }
    }

    /// Finds the node an error is routed to: the node's own `error`
    /// connection, else the workflow error handler. Branches only use
    /// their own connections; uncaught branch errors fail the group.
    fn route_error(
        &self,
        track: &mut Track,
        node: &WorkflowNode,
        error: &ErrorDescriptor,
    ) -> Option<NodeId> {
        if !error.kind.is_routable() {
            return None;
        }
        let target = self
            .pick(&node.id, handles::ERROR, &track.vars)
            .or_else(|| {
                if track.is_root() {
                    self.workflow
                        .error_handler
                        .clone()
                        .filter(|handler| handler != &node.id)
                } else {
                    None
                }
            })?;
        info!(
            session_id = %self.meta.session_id,
            node_id = %node.id,
            target = %target,
            "routing error"
        );
        let descriptor = serde_json::to_value(error).unwrap_or_default();
        track.write(VariablePatch::new().set("error", descriptor));
        Some(target)
    }

    /// Next node on `handle`, falling back to `default` when nothing
    /// passing is connected to `handle`.
    fn next(&self, node_id: &NodeId, handle: &str, vars: &VariableStore) -> Option<NodeId> {
        self.pick(node_id, handle, vars).or_else(|| {
            if handle == handles::DEFAULT {
                None
            } else {
                self.pick(node_id, handles::DEFAULT, vars)
            }
        })
    }

    /// First connection on `handle`, in declaration order, whose guard passes.
    fn pick(&self, node_id: &NodeId, handle: &str, vars: &VariableStore) -> Option<NodeId> {
        self.workflow
            .graph
            .outgoing_on(node_id, handle)
            .into_iter()
            .find(|c| self.guard_passes(c.connection, vars))
            .map(|c| c.target.id.clone())
    }

    fn guard_passes(&self, connection: &NodeConnection, vars: &VariableStore) -> bool {
        connection
            .guard()
            .is_none_or(|source| match Expression::parse(source) {
                Ok(guard) => guard.evaluate(vars).is_truthy(),
                Err(error) => {
                    warn!(connection = %connection.id, %error, "guard does not parse");
                    false
                }
            })
    }

    /// Pushes shared-scope writes to the collaborator. A rejected write
    /// fails the visit.
    async fn forward_shared(&self, patch: &VariablePatch) -> Result<(), NodeError> {
        for write in patch.shared() {
            self.runtime
                .shared
                .set(&write.key, write.value.clone())
                .await
                .map_err(|error| {
                    NodeError::failed(format!(
                        "shared variable {} not saved: {error}",
                        write.key
                    ))
                })?;
        }
        Ok(())
    }

    fn record(&self, track: &mut Track, result: NodeExecutionResult) {
        if track.is_root() {
            self.state.record(result);
        } else {
            track.records.push(result);
        }
    }
}
