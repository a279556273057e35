//! Node type definitions and the built-in catalog.
//!
//! A [`NodeTypeDefinition`] is static metadata about one kind of node: its
//! palette category, the configuration keys it cannot run without, the
//! handles it exposes, and whether it performs external I/O. Execution
//! behavior is not defined here; the engine pairs each type with a handler.

use crate::edge::handles;
use serde::Serialize;
use std::fmt;

/// Palette category of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Entry points and caller input.
    Input,
    /// Speech recognition, NLU, LLM agents, translation.
    AiProcessing,
    /// Variable and data manipulation.
    Data,
    /// Branching, looping, fan-out/fan-in.
    Logic,
    /// Calls to external APIs.
    External,
    /// Speech and messaging side effects toward the caller.
    Output,
    /// Event tracking.
    Analytics,
    /// Caller verification and data redaction.
    Security,
    /// Timers, transfers, error handling, termination.
    Control,
}

impl NodeCategory {
    /// All categories in palette order.
    pub const ALL: [Self; 9] = [
        Self::Input,
        Self::AiProcessing,
        Self::Data,
        Self::Logic,
        Self::External,
        Self::Output,
        Self::Analytics,
        Self::Security,
        Self::Control,
    ];

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::AiProcessing => "ai_processing",
            Self::Data => "data",
            Self::Logic => "logic",
            Self::External => "external",
            Self::Output => "output",
            Self::Analytics => "analytics",
            Self::Security => "security",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration requirement: at least one of the listed keys must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Requirement(pub &'static [&'static str]);

impl Requirement {
    /// Returns true if the requirement names exactly one key.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.0.len() == 1
    }

    /// Describes the requirement for an error message.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.0 {
            [key] => format!("`{key}` is required"),
            keys => {
                let names: Vec<String> = keys.iter().map(|k| format!("`{k}`")).collect();
                format!("one of {} is required", names.join(", "))
            }
        }
    }
}

/// Static description of a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDefinition {
    /// Type identifier used in workflow documents.
    pub id: &'static str,
    /// Palette category.
    pub category: NodeCategory,
    /// Display name for the editor palette.
    pub label: &'static str,
    /// One-line description for the editor palette.
    pub description: &'static str,
    /// Configuration that must be present for the node to run.
    pub required: &'static [Requirement],
    /// Output handles the node can select. Switch nodes add one per case.
    pub handles: &'static [&'static str],
    /// Whether the node performs external I/O (timeout and retry apply).
    pub performs_io: bool,
    /// Whether the session is suspended while the node waits.
    pub suspends: bool,
}

impl NodeTypeDefinition {
    /// Returns true if the node type declares the handle.
    #[must_use]
    pub fn declares_handle(&self, handle: &str) -> bool {
        self.handles.contains(&handle)
    }
}

const fn io(
    id: &'static str,
    category: NodeCategory,
    label: &'static str,
    description: &'static str,
    required: &'static [Requirement],
) -> NodeTypeDefinition {
    NodeTypeDefinition {
        id,
        category,
        label,
        description,
        required,
        handles: PASS,
        performs_io: true,
        suspends: true,
    }
}

const fn local(
    id: &'static str,
    category: NodeCategory,
    label: &'static str,
    description: &'static str,
    required: &'static [Requirement],
    handles: &'static [&'static str],
) -> NodeTypeDefinition {
    NodeTypeDefinition {
        id,
        category,
        label,
        description,
        required,
        handles,
        performs_io: false,
        suspends: false,
    }
}

const PASS: &[&str] = &[handles::DEFAULT, handles::ERROR];

/// The built-in node catalog.
pub const BUILTIN: &[NodeTypeDefinition] = &[
    // Input
    local(
        "trigger",
        NodeCategory::Input,
        "Inbound Call",
        "Entry point fired when a call reaches the workflow",
        &[],
        &[handles::DEFAULT],
    ),
    io(
        "dtmf",
        NodeCategory::Input,
        "Collect Digits",
        "Collects keypad input from the caller into a variable",
        &[Requirement(&["variable"])],
    ),
    // AI processing
    io(
        "stt",
        NodeCategory::AiProcessing,
        "Speech to Text",
        "Transcribes the caller's speech",
        &[],
    ),
    io(
        "nlu",
        NodeCategory::AiProcessing,
        "Understand Intent",
        "Extracts intent, entities, and confidence from an utterance",
        &[],
    ),
    io(
        "agent",
        NodeCategory::AiProcessing,
        "AI Agent",
        "Generates a response with a language model",
        &[Requirement(&["prompt", "model"])],
    ),
    io(
        "sentiment",
        NodeCategory::AiProcessing,
        "Sentiment",
        "Scores the emotional tone of an utterance",
        &[],
    ),
    io(
        "translate",
        NodeCategory::AiProcessing,
        "Translate",
        "Translates text into the caller's language",
        &[Requirement(&["targetLanguage"])],
    ),
    io(
        "cultural_adapt",
        NodeCategory::AiProcessing,
        "Cultural Adaptation",
        "Adapts phrasing and formality to the caller's locale",
        &[Requirement(&["locale"])],
    ),
    // Data
    local(
        "variable",
        NodeCategory::Data,
        "Set Variable",
        "Writes or loads a session or shared variable",
        &[Requirement(&["key"])],
        PASS,
    ),
    local(
        "transform",
        NodeCategory::Data,
        "Transform",
        "Evaluates an expression into a variable",
        &[Requirement(&["expression"]), Requirement(&["target"])],
        PASS,
    ),
    // Logic
    local(
        "condition",
        NodeCategory::Logic,
        "Condition",
        "Routes to `true` or `false` by evaluating a guard expression",
        &[Requirement(&["condition", "expression"])],
        &[handles::TRUE, handles::FALSE, handles::DEFAULT],
    ),
    local(
        "switch",
        NodeCategory::Logic,
        "Switch",
        "Routes to the first case matching a discriminant",
        &[Requirement(&["expression"]), Requirement(&["cases"])],
        &[handles::DEFAULT],
    ),
    local(
        "loop",
        NodeCategory::Logic,
        "Loop",
        "Re-enters its body while a condition holds, up to a bound",
        &[Requirement(&["condition"])],
        &[handles::BODY, handles::DONE, handles::TIMEOUT, handles::DEFAULT],
    ),
    local(
        "parallel",
        NodeCategory::Logic,
        "Parallel",
        "Runs every outgoing branch concurrently until they rejoin",
        &[Requirement(&["joinNodeId"])],
        &[handles::DEFAULT, handles::ERROR],
    ),
    local(
        "join",
        NodeCategory::Logic,
        "Join",
        "Synchronization point for parallel branches",
        &[],
        &[handles::DEFAULT],
    ),
    // External
    io(
        "api",
        NodeCategory::External,
        "HTTP Request",
        "Calls a REST endpoint",
        &[Requirement(&["endpoint", "url"]), Requirement(&["method"])],
    ),
    io(
        "webhook",
        NodeCategory::External,
        "Webhook",
        "Posts session data to a webhook",
        &[Requirement(&["url", "endpoint"])],
    ),
    io(
        "soap",
        NodeCategory::External,
        "SOAP Call",
        "Invokes a SOAP action",
        &[Requirement(&["endpoint"]), Requirement(&["action"])],
    ),
    io(
        "graphql",
        NodeCategory::External,
        "GraphQL Query",
        "Runs a GraphQL query",
        &[Requirement(&["endpoint"]), Requirement(&["query"])],
    ),
    // Output
    io(
        "tts",
        NodeCategory::Output,
        "Speak",
        "Plays synthesized speech to the caller",
        &[Requirement(&["text", "ssml"])],
    ),
    io(
        "sms",
        NodeCategory::Output,
        "Send SMS",
        "Sends a text message",
        &[Requirement(&["to", "recipient"]), Requirement(&["message", "body"])],
    ),
    io(
        "email",
        NodeCategory::Output,
        "Send Email",
        "Sends an email",
        &[Requirement(&["to", "recipient"]), Requirement(&["message", "body"])],
    ),
    io(
        "whatsapp",
        NodeCategory::Output,
        "Send WhatsApp",
        "Sends a WhatsApp message",
        &[Requirement(&["to", "recipient"]), Requirement(&["message", "body"])],
    ),
    // Analytics
    local(
        "analytics",
        NodeCategory::Analytics,
        "Track Event",
        "Records an analytics event for the call",
        &[Requirement(&["event"])],
        PASS,
    ),
    // Security
    io(
        "verify_caller",
        NodeCategory::Security,
        "Verify Caller",
        "Verifies the caller's identity",
        &[Requirement(&["method"])],
    ),
    local(
        "redact",
        NodeCategory::Security,
        "Redact",
        "Masks sensitive variables before they reach logs or outputs",
        &[Requirement(&["fields"])],
        PASS,
    ),
    // Control
    NodeTypeDefinition {
        id: "delay",
        category: NodeCategory::Control,
        label: "Delay",
        description: "Pauses the call flow for a duration",
        required: &[Requirement(&["duration"])],
        handles: &[handles::DEFAULT],
        performs_io: false,
        suspends: true,
    },
    io(
        "transfer",
        NodeCategory::Control,
        "Transfer",
        "Transfers the call to another destination",
        &[Requirement(&["destination"])],
    ),
    local(
        "error_handler",
        NodeCategory::Control,
        "Error Handler",
        "Receives errors routed from failing nodes",
        &[],
        &[handles::DEFAULT],
    ),
    local(
        "end",
        NodeCategory::Control,
        "End Call",
        "Completes the session",
        &[],
        &[],
    ),
];

/// Type identifiers accepted as synonyms of built-in types.
pub const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("phone_call", "trigger"),
    ("inbound_call", "trigger"),
    ("speech_to_text", "stt"),
    ("text_to_speech", "tts"),
    ("llm", "agent"),
    ("http", "api"),
];
