use std::collections::HashSet;

use tapcanvas_contracts::toolcall::{MutationBatch, ToolCall, ToolOp};
use tapcanvas_contracts::turn::{LlmErrorInfo, QuickReply};

use crate::gate::GatedDraft;

/// Final per-turn output of the mutation pipeline, ready for assembly.
#[derive(Debug, Clone, Default)]
pub struct SequencedBatch {
    pub text: String,
    pub calls: MutationBatch,
    pub quick_replies: Vec<QuickReply>,
    pub error: Option<LlmErrorInfo>,
}

/// Consistency pass over the gated batch: videos created alongside images in
/// the same turn must not run yet (their upstream image output does not exist
/// until a later turn), and every image-family create gets exactly one
/// runNode. Relative order of everything else is preserved.
pub fn sequence(draft: GatedDraft) -> SequencedBatch {
    let mut calls = draft.calls;

    let mut created_image_labels: HashSet<String> = HashSet::new();
    let mut created_video_labels: HashSet<String> = HashSet::new();
    for call in &calls {
        let Some(args) = call.op.as_create() else {
            continue;
        };
        let Some(label) = args.trimmed_label() else {
            continue;
        };
        if args.node_type.is_image_family() {
            created_image_labels.insert(label.to_string());
        }
        if args.node_type.is_video_family() {
            created_video_labels.insert(label.to_string());
        }
    }

    if !created_image_labels.is_empty() && !created_video_labels.is_empty() {
        calls.retain(|call| {
            call.op
                .as_run()
                .map(|run| !created_video_labels.contains(run.node_id.trim()))
                .unwrap_or(true)
        });
    }

    let already_running: HashSet<String> = calls
        .iter()
        .filter_map(|call| call.op.as_run())
        .map(|run| run.node_id.trim().to_string())
        .filter(|node_id| !node_id.is_empty())
        .collect();
    let pending_runs: Vec<String> = calls
        .iter()
        .filter_map(|call| match &call.op {
            ToolOp::CreateNode(args) if args.node_type.is_image_family() => args
                .trimmed_label()
                .filter(|label| !already_running.contains(*label))
                .map(str::to_string),
            _ => None,
        })
        .collect();
    for label in pending_runs {
        calls.push(ToolCall::run(format!("auto_run_{label}"), label));
    }

    SequencedBatch {
        text: draft.text,
        calls,
        quick_replies: draft.quick_replies,
        error: draft.error,
    }
}
