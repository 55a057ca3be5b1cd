use std::collections::HashSet;

use serde_json::Value;

use tapcanvas_contracts::canvas::{CanvasSnapshot, NodeKind};
use tapcanvas_contracts::policy;
use tapcanvas_contracts::toolcall::{
    ConnectNodesArgs, CreateNodeArgs, MutationBatch, ToolCall, ToolOp,
};
use tapcanvas_contracts::turn::{LlmErrorInfo, QuickReply};

use crate::normalize::NormalizedDraft;
use crate::text::clamp_chars;

const MAX_STORYBOARD_REFERENCES: usize = 3;
const STORYBOARD_HINT_MAX_CHARS: usize = 1200;

/// Draft after continuity linking. The linker may truncate the batch (new
/// character gating) and attach quick replies plus a replacement text.
#[derive(Debug, Clone, Default)]
pub struct LinkedDraft {
    pub text: String,
    pub calls: MutationBatch,
    pub quick_replies: Vec<QuickReply>,
    pub error: Option<LlmErrorInfo>,
}

impl From<NormalizedDraft> for LinkedDraft {
    fn from(draft: NormalizedDraft) -> Self {
        Self {
            text: draft.text,
            calls: draft.calls,
            quick_replies: Vec::new(),
            error: draft.error,
        }
    }
}

/// Per-turn inputs the linking heuristics read.
pub struct ContinuityContext<'a> {
    pub user_text: &'a str,
    pub snapshot: &'a CanvasSnapshot,
}

/// Intent-driven continuity passes, applied in fixed order: new-character
/// gating, storyboard reference linking, storyboard-to-video chaining, then
/// general reference continuity. No identical (source, target) edge is ever
/// inserted twice into the same batch.
pub fn link(draft: NormalizedDraft, ctx: &ContinuityContext<'_>) -> LinkedDraft {
    let mut linked = LinkedDraft::from(draft);
    if linked.calls.is_empty() {
        return linked;
    }

    gate_new_character(&mut linked, ctx);
    let storyboard = find_storyboard_create(&linked.calls);
    let wants_storyboard = policy::wants_storyboard(ctx.user_text) || storyboard.is_some();
    if wants_storyboard {
        if let Some((label, prompt)) = storyboard {
            link_storyboard_references(&mut linked.calls, &label, ctx.snapshot);
            chain_storyboard_video(&mut linked.calls, &label, prompt.as_deref());
        }
    }
    link_general_references(&mut linked.calls, ctx);
    linked
}

/// Character confirmation pre-empts storyboard generation: a continuation
/// turn that both introduces a new character image and creates a storyboard
/// keeps only the character create/run pair and asks the user to confirm.
fn gate_new_character(linked: &mut LinkedDraft, ctx: &ContinuityContext<'_>) {
    if !policy::is_continuation_step(ctx.user_text) {
        return;
    }

    let mut created_image_labels: Vec<String> = Vec::new();
    let mut has_storyboard_create = false;
    for call in &linked.calls {
        let Some(args) = call.op.as_create() else {
            continue;
        };
        if args.node_type != NodeKind::Image {
            continue;
        }
        if let Some(label) = args.trimmed_label() {
            created_image_labels.push(label.to_string());
        }
        if policy::reads_as_storyboard(&create_hint(args)) {
            has_storyboard_create = true;
        }
    }

    let new_character_labels: HashSet<String> = created_image_labels
        .into_iter()
        .filter(|label| policy::reads_as_character(label) && !ctx.snapshot.has_label(label))
        .collect();
    if new_character_labels.is_empty() || !has_storyboard_create {
        return;
    }

    linked.calls.retain(|call| match &call.op {
        ToolOp::CreateNode(args) => {
            args.node_type == NodeKind::Image
                && args
                    .trimmed_label()
                    .map(|label| new_character_labels.contains(label))
                    .unwrap_or(false)
        }
        ToolOp::RunNode(args) => new_character_labels.contains(args.node_id.trim()),
        _ => false,
    });
    linked.quick_replies = vec![
        QuickReply::new(
            "角色OK，继续分镜",
            "新角色我确认OK。请把新角色纳入同一项目设定，基于已有剧情续写下一段，并生成九宫格分镜（image）再连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "重做这个角色",
            "这个新角色不满意。请保持同一角色定位与风格，重做 3 个版本给我选（同一个 image 节点出 3 张即可）。",
        ),
        QuickReply::new(
            "不要新角色",
            "不要新增角色了。请只用现有角色基于已有剧情续写，并生成九宫格分镜与15s视频。",
        ),
    ];
    linked.text =
        "我先为续写新增了一个角色设定图。你确认角色外观后，我再继续生成续写分镜。".to_string();
}

fn create_hint(args: &CreateNodeArgs) -> String {
    format!(
        "{}\n{}",
        args.trimmed_label().unwrap_or(""),
        args.config_str("prompt").unwrap_or("")
    )
}

/// First created image whose label/prompt reads as a storyboard grid, with a
/// usable label.
fn find_storyboard_create(calls: &MutationBatch) -> Option<(String, Option<String>)> {
    for call in calls {
        let Some(args) = call.op.as_create() else {
            continue;
        };
        if args.node_type != NodeKind::Image {
            continue;
        }
        if !policy::reads_as_storyboard(&create_hint(args)) {
            continue;
        }
        let label = args.trimmed_label()?.to_string();
        let prompt = args.config_str("prompt").map(str::to_string);
        return Some((label, prompt));
    }
    None
}

/// Rank snapshot images as storyboard references: fixed keyword bonuses,
/// ties broken by snapshot position (later nodes first), top 3.
fn pick_reference_labels(snapshot: &CanvasSnapshot, storyboard_label: &str) -> Vec<String> {
    let mut candidates: Vec<(i32, usize, String)> = Vec::new();
    for (idx, node) in snapshot.nodes.iter().enumerate() {
        let label = node.label.trim();
        if label.is_empty() || label == storyboard_label {
            continue;
        }
        if !node.is_successful_image() {
            continue;
        }
        if policy::contains_any(label, policy::REFERENCE_EXCLUDED_LABELS) {
            continue;
        }
        candidates.push((policy::reference_label_score(label), idx, label.to_string()));
    }
    candidates.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    candidates
        .into_iter()
        .take(MAX_STORYBOARD_REFERENCES)
        .map(|(_, _, label)| label)
        .collect()
}

fn existing_edge_pairs(calls: &MutationBatch) -> HashSet<(String, String)> {
    calls
        .iter()
        .filter_map(|call| call.op.as_connect())
        .map(ConnectNodesArgs::pair)
        .filter(|(source, target)| !source.is_empty() && !target.is_empty())
        .collect()
}

/// Connect existing character/reference images into the storyboard node,
/// inserted before the storyboard's runNode (after its create at minimum).
fn link_storyboard_references(
    calls: &mut MutationBatch,
    storyboard_label: &str,
    snapshot: &CanvasSnapshot,
) {
    let reference_labels = pick_reference_labels(snapshot, storyboard_label);
    if reference_labels.is_empty() {
        return;
    }
    let existing_pairs = existing_edge_pairs(calls);

    let mut create_idx = None;
    let mut run_idx = None;
    for (idx, call) in calls.iter().enumerate() {
        match &call.op {
            ToolOp::CreateNode(args) => {
                if args.trimmed_label() == Some(storyboard_label) {
                    create_idx = Some(idx);
                }
            }
            ToolOp::RunNode(args) => {
                if args.node_id.trim() == storyboard_label {
                    run_idx = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let mut insert_at = run_idx.unwrap_or(calls.len());
    if let Some(create_idx) = create_idx {
        if insert_at <= create_idx {
            insert_at = create_idx + 1;
        }
    }

    let connects: Vec<ToolCall> = reference_labels
        .into_iter()
        .filter(|source| {
            !existing_pairs.contains(&(source.clone(), storyboard_label.to_string()))
        })
        .map(|source| {
            ToolCall::connect(
                format!("auto_ref_{source}_to_{storyboard_label}"),
                ConnectNodesArgs {
                    source_node_id: source,
                    target_node_id: storyboard_label.to_string(),
                    source_handle: Some("out-image-wide".to_string()),
                    target_handle: Some("in-image-wide".to_string()),
                },
            )
        })
        .collect();
    calls.splice(insert_at..insert_at, connects);
}

/// Synthesize the 15s video node downstream of a storyboard grid when the
/// batch did not create one, and connect the storyboard into it.
fn chain_storyboard_video(
    calls: &mut MutationBatch,
    storyboard_label: &str,
    storyboard_prompt: Option<&str>,
) {
    let has_compose_video = calls.iter().any(|call| {
        call.op
            .as_create()
            .map(|args| args.node_type == NodeKind::ComposeVideo)
            .unwrap_or(false)
    });
    if has_compose_video {
        return;
    }

    let mut video_label = storyboard_label
        .replace("九宫格分镜", "15s视频")
        .replace("分镜", "15s视频");
    if video_label == storyboard_label {
        video_label = format!("{storyboard_label}-15s视频");
    }

    let mut storyboard_hint = String::new();
    if let Some(prompt) = storyboard_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        let normalized = prompt
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<&str>>()
            .join("\n");
        storyboard_hint = format!(
            "\n\n分镜补充（来自九宫格分镜的镜头描述，用于动作/镜头节奏对齐；以参考图为准）：\n{}",
            clamp_chars(&normalized, STORYBOARD_HINT_MAX_CHARS)
        );
    }
    let video_prompt = format!(
        "根据上游参考图片（九宫格分镜图）生成一个15秒的二维动画视频：\n\
         - 画面风格/角色外观严格跟随参考图；不要改变角色造型与配色。\n\
         - 按参考图的镜头节奏推进（从1到9），镜头之间自然衔接；保持同一场景光线连续。\n\
         - 不要出现任何可读文字/水印/Logo。\n\
         - 输出16:9，动作清晰，镜头稳定，节奏温暖治愈。{storyboard_hint}"
    );

    let mut create = CreateNodeArgs::new(NodeKind::ComposeVideo, video_label.clone());
    create
        .config
        .insert("kind".to_string(), Value::String("composeVideo".to_string()));
    create
        .config
        .insert("durationSeconds".to_string(), Value::Number(15.into()));
    create
        .config
        .insert("aspectRatio".to_string(), Value::String("16:9".to_string()));
    create
        .config
        .insert("prompt".to_string(), Value::String(video_prompt));

    calls.push(ToolCall::create(
        format!("auto_create_video_{video_label}"),
        create,
    ));
    calls.push(ToolCall::connect(
        format!("auto_connect_{storyboard_label}_to_{video_label}"),
        ConnectNodesArgs {
            source_node_id: storyboard_label.to_string(),
            target_node_id: video_label,
            source_handle: Some("out-image".to_string()),
            target_handle: Some("in-image".to_string()),
        },
    ));
}

/// Latest successful non-storyboard image on the canvas, if any.
fn pick_latest_success_image_label(snapshot: &CanvasSnapshot) -> Option<String> {
    snapshot.nodes.iter().rev().find_map(|node| {
        if !node.is_successful_image() {
            return None;
        }
        let label = node.label.trim();
        if label.is_empty() || policy::contains_any(label, policy::CHARACTER_EXCLUSIONS) {
            return None;
        }
        Some(label.to_string())
    })
}

/// When the user builds on prior results, give each newly created
/// non-storyboard image an inbound edge from the latest successful image,
/// inserted before that node's runNode.
fn link_general_references(calls: &mut MutationBatch, ctx: &ContinuityContext<'_>) {
    if !policy::has_reference_intent(ctx.user_text) {
        return;
    }
    let Some(upstream_label) = pick_latest_success_image_label(ctx.snapshot) else {
        return;
    };

    let mut existing_pairs = existing_edge_pairs(calls);
    let mut existing_targets: HashSet<String> = existing_pairs
        .iter()
        .map(|(_, target)| target.clone())
        .collect();

    let mut idx = 0;
    while idx < calls.len() {
        let Some(args) = calls[idx].op.as_create() else {
            idx += 1;
            continue;
        };
        if args.node_type != NodeKind::Image {
            idx += 1;
            continue;
        }
        let Some(target_label) = args.trimmed_label().map(str::to_string) else {
            idx += 1;
            continue;
        };
        if target_label == upstream_label
            || policy::reads_as_storyboard(&create_hint(args))
            || existing_targets.contains(&target_label)
            || existing_pairs.contains(&(upstream_label.clone(), target_label.clone()))
        {
            idx += 1;
            continue;
        }

        let mut insert_at = idx + 1;
        for (offset, call) in calls[idx + 1..].iter().enumerate() {
            if let Some(run) = call.op.as_run() {
                if run.node_id.trim() == target_label {
                    insert_at = idx + 1 + offset;
                    break;
                }
            }
        }
        calls.insert(
            insert_at,
            ToolCall::connect(
                format!("auto_ref_{upstream_label}_to_{target_label}"),
                ConnectNodesArgs {
                    source_node_id: upstream_label.clone(),
                    target_node_id: target_label.clone(),
                    source_handle: Some("out-image".to_string()),
                    target_handle: Some("in-image".to_string()),
                },
            ),
        );
        existing_pairs.insert((upstream_label.clone(), target_label.clone()));
        existing_targets.insert(target_label);
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use tapcanvas_contracts::canvas::{CanvasNode, NodeStatus};

    use super::*;

    fn success_image(label: &str) -> CanvasNode {
        CanvasNode {
            label: label.to_string(),
            kind: NodeKind::Image,
            status: NodeStatus::Success,
            image_url: Some("https://cdn/img.png".to_string()),
        }
    }

    fn create_image(id: &str, label: &str) -> ToolCall {
        ToolCall::create(id, CreateNodeArgs::new(NodeKind::Image, label))
    }

    fn create_image_with_prompt(id: &str, label: &str, prompt: &str) -> ToolCall {
        let mut args = CreateNodeArgs::new(NodeKind::Image, label);
        args.config
            .insert("prompt".to_string(), json!(prompt));
        ToolCall::create(id, args)
    }

    fn draft(calls: Vec<ToolCall>) -> NormalizedDraft {
        NormalizedDraft {
            text: "好的。".to_string(),
            calls,
            error: None,
        }
    }

    #[test]
    fn storyboard_gets_references_video_and_connection() {
        let snapshot = CanvasSnapshot::new(vec![
            success_image("城市夜景"),
            success_image("角色设定图"),
        ]);
        let ctx = ContinuityContext {
            user_text: "出一版分镜",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![
                create_image("c1", "Scene-九宫格分镜"),
                ToolCall::run("r1", "Scene-九宫格分镜"),
            ]),
            &ctx,
        );

        let connect_to_storyboard = linked.calls[1].op.as_connect().expect("ref edge");
        assert_eq!(connect_to_storyboard.source_node_id, "角色设定图");
        assert_eq!(connect_to_storyboard.target_node_id, "Scene-九宫格分镜");
        assert_eq!(
            connect_to_storyboard.source_handle.as_deref(),
            Some("out-image-wide")
        );
        // Both canvas images qualify; the scored one comes first, and edges
        // land before the storyboard's runNode.
        assert_eq!(
            linked.calls[2].op.as_connect().unwrap().source_node_id,
            "城市夜景"
        );
        assert!(linked.calls[3].op.as_run().is_some());

        let video_create = linked.calls[4].op.as_create().expect("video node");
        assert_eq!(video_create.node_type, NodeKind::ComposeVideo);
        assert_eq!(video_create.trimmed_label(), Some("Scene-15s视频"));
        assert!(video_create
            .config_str("prompt")
            .unwrap()
            .contains("15秒的二维动画视频"));
        let chain = linked.calls[5].op.as_connect().expect("chain edge");
        assert_eq!(chain.source_node_id, "Scene-九宫格分镜");
        assert_eq!(chain.target_node_id, "Scene-15s视频");
    }

    #[test]
    fn tie_break_prefers_later_snapshot_nodes() {
        let snapshot = CanvasSnapshot::new(vec![
            success_image("早期草图"),
            success_image("后期草图"),
        ]);
        let labels = pick_reference_labels(&snapshot, "Scene-分镜");
        assert_eq!(labels, vec!["后期草图".to_string(), "早期草图".to_string()]);
    }

    #[test]
    fn existing_edge_is_not_duplicated() {
        let snapshot = CanvasSnapshot::new(vec![success_image("角色设定图")]);
        let ctx = ContinuityContext {
            user_text: "分镜",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![
                create_image("c1", "Scene-分镜"),
                ToolCall::connect(
                    "c2",
                    ConnectNodesArgs {
                        source_node_id: "角色设定图".to_string(),
                        target_node_id: "Scene-分镜".to_string(),
                        source_handle: None,
                        target_handle: None,
                    },
                ),
                ToolCall::run("r1", "Scene-分镜"),
            ]),
            &ctx,
        );
        let edges = linked
            .calls
            .iter()
            .filter_map(|call| call.op.as_connect())
            .filter(|edge| edge.pair() == ("角色设定图".to_string(), "Scene-分镜".to_string()))
            .count();
        assert_eq!(edges, 1);
    }

    #[test]
    fn video_label_appends_suffix_when_substitution_is_a_noop() {
        let snapshot = CanvasSnapshot::default();
        let ctx = ContinuityContext {
            user_text: "",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![create_image_with_prompt(
                "c1",
                "Story Grid",
                "3x3 storyboard",
            )]),
            &ctx,
        );
        let video = linked
            .calls
            .iter()
            .filter_map(|call| call.op.as_create())
            .find(|args| args.node_type == NodeKind::ComposeVideo)
            .expect("video node");
        assert_eq!(video.trimmed_label(), Some("Story Grid-15s视频"));
    }

    #[test]
    fn storyboard_hint_excerpt_is_clamped() {
        let snapshot = CanvasSnapshot::default();
        let ctx = ContinuityContext {
            user_text: "九宫格",
            snapshot: &snapshot,
        };
        let long_prompt = "镜".repeat(2000);
        let linked = link(
            draft(vec![create_image_with_prompt(
                "c1",
                "Scene-九宫格分镜",
                &long_prompt,
            )]),
            &ctx,
        );
        let video = linked
            .calls
            .iter()
            .filter_map(|call| call.op.as_create())
            .find(|args| args.node_type == NodeKind::ComposeVideo)
            .expect("video node");
        let prompt = video.config_str("prompt").unwrap();
        assert!(prompt.contains("分镜补充"));
        assert!(prompt.ends_with('…'));
        let excerpt: String = prompt
            .split("以参考图为准）：\n")
            .nth(1)
            .unwrap()
            .to_string();
        assert_eq!(excerpt.chars().count(), 1201);
    }

    #[test]
    fn new_character_gating_truncates_to_character_pair() {
        let snapshot = CanvasSnapshot::new(vec![success_image("小狐设定图")]);
        // Canned direction-picker reply: a continuation step, not a
        // suggestion request, and free of reference-intent keywords so only
        // the character gate rewrites the batch.
        let ctx = ContinuityContext {
            user_text: "我选择方向A（暖心日常）：生成九宫格分镜",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![
                create_image("c1", "新角色-小熊"),
                ToolCall::run("r1", "新角色-小熊"),
                create_image_with_prompt("c2", "Scene-九宫格分镜", "九宫格"),
                ToolCall::run("r2", "Scene-九宫格分镜"),
            ]),
            &ctx,
        );
        assert_eq!(linked.calls.len(), 2);
        assert_eq!(
            linked.calls[0].op.as_create().unwrap().trimmed_label(),
            Some("新角色-小熊")
        );
        assert_eq!(linked.calls[1].op.as_run().unwrap().node_id, "新角色-小熊");
        assert_eq!(linked.quick_replies.len(), 3);
        assert_eq!(linked.quick_replies[0].label, "角色OK，继续分镜");
        assert!(linked.text.contains("角色设定图"));
    }

    #[test]
    fn existing_character_does_not_trigger_gating() {
        let snapshot = CanvasSnapshot::new(vec![success_image("新角色-小熊")]);
        let ctx = ContinuityContext {
            user_text: "续写下一段",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![
                create_image("c1", "新角色-小熊"),
                create_image_with_prompt("c2", "Scene-九宫格分镜", "九宫格"),
            ]),
            &ctx,
        );
        assert!(linked.quick_replies.is_empty());
        assert!(linked.calls.len() > 2);
    }

    #[test]
    fn reference_intent_connects_new_image_before_its_run() {
        let snapshot = CanvasSnapshot::new(vec![success_image("主视觉")]);
        let ctx = ContinuityContext {
            user_text: "基于主视觉做一个同风格变体",
            snapshot: &snapshot,
        };
        let linked = link(
            draft(vec![
                create_image("c1", "变体-morning"),
                ToolCall::run("r1", "变体-morning"),
            ]),
            &ctx,
        );
        assert_eq!(linked.calls.len(), 3);
        let edge = linked.calls[1].op.as_connect().expect("auto edge");
        assert_eq!(edge.source_node_id, "主视觉");
        assert_eq!(edge.target_node_id, "变体-morning");
        assert_eq!(edge.source_handle.as_deref(), Some("out-image"));
        assert!(linked.calls[2].op.as_run().is_some());
    }

    #[test]
    fn empty_batch_passes_through() {
        let snapshot = CanvasSnapshot::new(vec![success_image("主视觉")]);
        let ctx = ContinuityContext {
            user_text: "基于主视觉分镜续写",
            snapshot: &snapshot,
        };
        let linked = link(draft(Vec::new()), &ctx);
        assert!(linked.calls.is_empty());
        assert!(linked.quick_replies.is_empty());
    }
}
