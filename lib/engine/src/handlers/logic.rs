//! Branching, looping, and fan-out.

use crate::error::NodeError;
use crate::handler::{
    BranchPolicy, HandleSelection, HandlerOutput, NodeContext, NodeHandler, NodeOutcome,
};
use async_trait::async_trait;
use callflow_workflow::{Expression, NodeId, Value, VariablePatch, handles};
use serde_json::{Value as JsonValue, json};

/// Variable prefix under which loop counters live: `loop.<nodeId>.iterations`.
pub const LOOP_PREFIX: &str = "loop";

fn parse_config_expression(ctx: &NodeContext<'_>, keys: &[&str]) -> Result<Expression, NodeError> {
    let (key, source) = keys
        .iter()
        .find_map(|key| ctx.config().str(key).map(|source| (*key, source)))
        .ok_or_else(|| NodeError::invalid_config(format!("`{}` is not set", keys.join("` or `"))))?;
    Expression::parse(source)
        .map_err(|e| NodeError::invalid_config(format!("`{key}` does not parse: {e}")))
}

/// Routes on a guard expression.
///
/// Truthy selects `true`, falsy selects `false`. A value that cannot be
/// decided (a missing variable or a type error) selects `default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let expression = parse_config_expression(ctx, &["condition", "expression"])?;
        let value = expression.evaluate(ctx.variables);
        let handle = if value.is_undefined() {
            handles::DEFAULT
        } else if value.is_truthy() {
            handles::TRUE
        } else {
            handles::FALSE
        };
        Ok(HandlerOutput::new()
            .with_output(json!({ "result": value.into_json(), "handle": handle }))
            .select(HandleSelection::named(handle))
            .into())
    }
}

/// Routes to the first case equal to the discriminant, else `default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchHandler;

#[async_trait]
impl NodeHandler for SwitchHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let expression = parse_config_expression(ctx, &["expression"])?;
        let discriminant = expression.evaluate(ctx.variables);
        let matched = ctx
            .config()
            .switch_cases()
            .into_iter()
            .find(|case| Value::from(&case.value).loosely_equals(&discriminant));

        let (handle, case) = match matched {
            Some(case) => (
                HandleSelection::named(case.handle.clone()),
                JsonValue::String(case.handle),
            ),
            None => (HandleSelection::Default, JsonValue::Null),
        };
        Ok(HandlerOutput::new()
            .with_output(json!({ "value": discriminant.into_json(), "case": case }))
            .select(handle)
            .into())
    }
}

/// Re-enters its body while the condition holds, up to `maxIterations`.
///
/// The counter lives in `loop.<nodeId>.iterations` and is cleared when the
/// loop exits either way. Running out of iterations selects `timeout`, or
/// `default` when `timeout` is not connected; with neither connected the
/// node fails with `LoopBoundExceeded`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopHandler;

impl LoopHandler {
    fn counter_key(node_id: &NodeId) -> String {
        format!("{LOOP_PREFIX}.{node_id}.iterations")
    }
}

#[async_trait]
impl NodeHandler for LoopHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let expression = parse_config_expression(ctx, &["condition"])?;
        let bound = ctx
            .config()
            .u64("maxIterations")
            .filter(|n| *n > 0)
            .unwrap_or(ctx.engine.default_loop_bound);
        let key = Self::counter_key(ctx.node_id());
        let iterations = ctx
            .variables
            .get(&key)
            .and_then(JsonValue::as_u64)
            .unwrap_or(0);

        if !expression.evaluate(ctx.variables).is_truthy() {
            return Ok(HandlerOutput::new()
                .with_variables(VariablePatch::new().remove(key))
                .with_output(json!({ "iterations": iterations, "exit": handles::DONE }))
                .select(HandleSelection::named(handles::DONE))
                .into());
        }

        if iterations >= bound {
            let handle = if ctx.has_connection(handles::TIMEOUT) {
                HandleSelection::named(handles::TIMEOUT)
            } else if ctx.has_connection(handles::DEFAULT) {
                HandleSelection::Default
            } else {
                return Err(NodeError::LoopBoundExceeded {
                    node_id: ctx.node_id().clone(),
                    bound,
                });
            };
            return Ok(HandlerOutput::new()
                .with_variables(VariablePatch::new().remove(key))
                .with_output(json!({ "iterations": iterations, "exit": handles::TIMEOUT }))
                .select(handle)
                .into());
        }

        Ok(HandlerOutput::new()
            .set(key, iterations + 1)
            .with_output(json!({ "iteration": iterations + 1 }))
            .select(HandleSelection::named(handles::BODY))
            .into())
    }
}

/// Forks every `default` connection into a concurrent branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelHandler;

#[async_trait]
impl NodeHandler for ParallelHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let join = ctx
            .config()
            .str("joinNodeId")
            .map(NodeId::new)
            .ok_or_else(|| NodeError::invalid_config("`joinNodeId` is not set"))?;
        let policy = match ctx.config().str("policy") {
            None => BranchPolicy::default(),
            Some(raw) => BranchPolicy::parse(raw).ok_or_else(|| {
                NodeError::invalid_config(format!("unknown branch policy `{raw}`"))
            })?,
        };
        let branches = ctx
            .outgoing
            .iter()
            .filter(|c| c.leaves(handles::DEFAULT))
            .count();
        Ok(HandlerOutput::new()
            .with_output(json!({ "join": join, "policy": policy, "branches": branches }))
            .select(HandleSelection::FanOut { join, policy })
            .into())
    }
}
