use serde::{Deserialize, Serialize};

use crate::research::Source;
use crate::toolcall::MutationBatch;

/// Hard cap on one-click reply options per turn.
pub const MAX_QUICK_REPLIES: usize = 6;

/// A pre-written user response rendered as a button; `input` is the message
/// sent verbatim when the user picks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickReply {
    pub label: String,
    pub input: String,
}

impl QuickReply {
    pub fn new(label: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            input: input.into(),
        }
    }
}

/// Structured descriptor of a recovered model failure, surfaced alongside the
/// user-facing message (never instead of it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmErrorInfo {
    pub kind: String,
    pub message: String,
}

impl LlmErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// The sole externally observable output of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    #[serde(rename = "toolCalls", default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: MutationBatch,
    #[serde(
        rename = "quickReplies",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(rename = "activeRole")]
    pub active_role: String,
    #[serde(rename = "activeRoleName")]
    pub active_role_name: String,
    #[serde(rename = "activeRoleReason")]
    pub active_role_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LlmErrorInfo>,
}
