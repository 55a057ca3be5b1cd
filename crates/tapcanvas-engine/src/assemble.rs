use serde_json::Value;

use tapcanvas_contracts::research::Source;
use tapcanvas_contracts::roles::RoleProfile;
use tapcanvas_contracts::toolcall::{MutationBatch, ToolOp};
use tapcanvas_contracts::turn::{GenerationResult, QuickReply, MAX_QUICK_REPLIES};

use crate::sequence::SequencedBatch;

/// Fence marker for the machine-readable action block the model may append.
pub const ACTIONS_MARKER: &str = "```tapcanvas_actions";

/// Final assembly: action-block extraction, citation substitution, and the
/// tool-call-only confirmation fallback.
pub fn assemble(
    batch: SequencedBatch,
    role: &RoleProfile,
    role_reason: &str,
    sources: &[Source],
) -> GenerationResult {
    let mut text = batch.text;
    let mut quick_replies = batch.quick_replies;

    if text.trim().is_empty() && !batch.calls.is_empty() {
        text = fallback_text_from_calls(&batch.calls);
    }
    if !text.trim().is_empty() {
        let (cleaned, extracted) = extract_actions(&text);
        text = cleaned;
        // Replies already set upstream (gates) survive a missing block.
        if let Some(extracted) = extracted {
            quick_replies = extracted;
        }
    }
    quick_replies.truncate(MAX_QUICK_REPLIES);

    let (text, used_sources) = substitute_citations(text, sources);

    GenerationResult {
        text,
        tool_calls: batch.calls,
        quick_replies,
        sources: used_sources,
        active_role: role.id.clone(),
        active_role_name: role.name.clone(),
        active_role_reason: role_reason.to_string(),
        error: batch.error,
    }
}

/// Pull the trailing `tapcanvas_actions` fenced block out of the text.
/// Returns the cleaned text and, when the block parsed, the validated replies
/// (capped, entries with empty label or input skipped).
pub fn extract_actions(text: &str) -> (String, Option<Vec<QuickReply>>) {
    let Some(start) = text.find(ACTIONS_MARKER) else {
        return (text.to_string(), None);
    };
    let after_marker = &text[start + ACTIONS_MARKER.len()..];
    let Some(newline) = after_marker.find('\n') else {
        return (text.to_string(), None);
    };
    let payload_start = newline + 1;
    let Some(end_fence) = after_marker[payload_start..].find("```") else {
        return (text.to_string(), None);
    };
    let payload_raw = after_marker[payload_start..payload_start + end_fence].trim();
    let cleaned = format!(
        "{}{}",
        &text[..start],
        &after_marker[payload_start + end_fence + 3..]
    )
    .trim()
    .to_string();

    let Ok(parsed) = serde_json::from_str::<Value>(payload_raw) else {
        return (cleaned, None);
    };
    let Some(actions) = parsed.get("actions").and_then(Value::as_array) else {
        return (cleaned, None);
    };
    let mut replies: Vec<QuickReply> = Vec::new();
    for action in actions {
        let Some(item) = action.as_object() else {
            continue;
        };
        let label = item
            .get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|label| !label.is_empty());
        let input = item
            .get("input")
            .and_then(Value::as_str)
            .filter(|input| !input.trim().is_empty());
        let (Some(label), Some(input)) = (label, input) else {
            continue;
        };
        replies.push(QuickReply::new(label, input));
        if replies.len() >= MAX_QUICK_REPLIES {
            break;
        }
    }
    if replies.is_empty() {
        (cleaned, None)
    } else {
        (cleaned, Some(replies))
    }
}

/// Replace shortened citation URLs with their canonical form, keeping only
/// the sources actually referenced in the text.
pub fn substitute_citations(text: String, sources: &[Source]) -> (String, Vec<Source>) {
    let mut content = text;
    let mut used: Vec<Source> = Vec::new();
    for source in sources {
        if source.short_url.is_empty() || !content.contains(&source.short_url) {
            continue;
        }
        content = content.replace(&source.short_url, &source.url);
        used.push(source.clone());
    }
    (content, used)
}

/// Short user-facing confirmation when the model returned only tool calls.
pub fn fallback_text_from_calls(calls: &MutationBatch) -> String {
    let mut creates = 0usize;
    let mut updates = 0usize;
    let mut connects = 0usize;
    let mut runs = 0usize;
    let mut labels: Vec<&str> = Vec::new();
    for call in calls {
        match &call.op {
            ToolOp::CreateNode(args) => {
                creates += 1;
                if let Some(label) = args.trimmed_label() {
                    labels.push(label);
                }
            }
            ToolOp::UpdateNode(_) => updates += 1,
            ToolOp::ConnectNodes(_) => connects += 1,
            ToolOp::RunNode(_) => runs += 1,
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if creates > 0 {
        if labels.is_empty() {
            parts.push(format!("已在画布创建 {creates} 个节点"));
        } else {
            let head = labels[..labels.len().min(3)].join("、");
            let tail = if labels.len() > 3 { "…" } else { "" };
            parts.push(format!("已在画布创建节点：{head}{tail}"));
        }
    }
    if updates > 0 {
        parts.push(format!("已更新 {updates} 个节点"));
    }
    if connects > 0 {
        parts.push(format!("已连接 {connects} 条连线"));
    }
    if runs > 0 {
        parts.push(format!("已触发运行 {runs} 个节点"));
    }

    if parts.is_empty() {
        "已更新画布。".to_string()
    } else {
        format!("{}。", parts.join("；"))
    }
}

#[cfg(test)]
mod tests {
    use tapcanvas_contracts::canvas::NodeKind;
    use tapcanvas_contracts::roles::RoleRegistry;
    use tapcanvas_contracts::toolcall::{ConnectNodesArgs, CreateNodeArgs, ToolCall};

    use super::*;

    fn batch(text: &str, calls: MutationBatch) -> SequencedBatch {
        SequencedBatch {
            text: text.to_string(),
            calls,
            quick_replies: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn actions_block_becomes_replies_and_is_stripped() {
        let text = "先选一个方向。\n```tapcanvas_actions\n{\"title\":\"可选操作\",\"actions\":[{\"label\":\" 方向A \",\"input\":\"我选方向A\"},{\"label\":\"\",\"input\":\"忽略\"}]}\n```\n";
        let (cleaned, replies) = extract_actions(text);
        assert_eq!(cleaned, "先选一个方向。");
        let replies = replies.expect("one valid action");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].label, "方向A");
        assert_eq!(replies[0].input, "我选方向A");
    }

    #[test]
    fn actions_block_is_capped() {
        let actions: Vec<String> = (0..9)
            .map(|idx| format!("{{\"label\":\"L{idx}\",\"input\":\"I{idx}\"}}"))
            .collect();
        let text = format!(
            "选项：\n```tapcanvas_actions\n{{\"actions\":[{}]}}\n```",
            actions.join(",")
        );
        let (_, replies) = extract_actions(&text);
        assert_eq!(replies.expect("replies").len(), MAX_QUICK_REPLIES);
    }

    #[test]
    fn malformed_block_is_stripped_without_replies() {
        let text = "内容。\n```tapcanvas_actions\n{not json\n```";
        let (cleaned, replies) = extract_actions(text);
        assert_eq!(cleaned, "内容。");
        assert!(replies.is_none());
    }

    #[test]
    fn unterminated_block_is_left_alone() {
        let text = "内容。\n```tapcanvas_actions\n{\"actions\":[]}";
        let (cleaned, replies) = extract_actions(text);
        assert_eq!(cleaned, text);
        assert!(replies.is_none());
    }

    #[test]
    fn citation_substitution_collects_only_referenced_sources() {
        let sources = vec![
            Source {
                label: "角色设定".to_string(),
                url: "https://kb/full/char".to_string(),
                short_url: "https://s/1".to_string(),
            },
            Source {
                label: "未引用".to_string(),
                url: "https://kb/full/other".to_string(),
                short_url: "https://s/2".to_string(),
            },
        ];
        let (text, used) =
            substitute_citations("参考 [角色设定](https://s/1)。".to_string(), &sources);
        assert_eq!(text, "参考 [角色设定](https://kb/full/char)。");
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].label, "角色设定");
    }

    #[test]
    fn citation_substitution_is_noop_without_matches() {
        let sources = vec![Source {
            label: "x".to_string(),
            url: "https://kb/full".to_string(),
            short_url: "https://s/1".to_string(),
        }];
        let original = "没有引用任何来源。".to_string();
        let (text, used) = substitute_citations(original.clone(), &sources);
        assert_eq!(text, original);
        assert!(used.is_empty());
    }

    #[test]
    fn fallback_text_enumerates_categories_in_order() {
        let calls = vec![
            ToolCall::create("c1", CreateNodeArgs::new(NodeKind::Image, "a")),
            ToolCall::create("c2", CreateNodeArgs::new(NodeKind::Image, "b")),
            ToolCall::create("c3", CreateNodeArgs::new(NodeKind::Image, "c")),
            ToolCall::create("c4", CreateNodeArgs::new(NodeKind::Image, "d")),
            ToolCall::connect(
                "e1",
                ConnectNodesArgs {
                    source_node_id: "a".to_string(),
                    target_node_id: "b".to_string(),
                    source_handle: None,
                    target_handle: None,
                },
            ),
            ToolCall::run("r1", "a"),
        ];
        assert_eq!(
            fallback_text_from_calls(&calls),
            "已在画布创建节点：a、b、c…；已连接 1 条连线；已触发运行 1 个节点。"
        );
        assert_eq!(fallback_text_from_calls(&Vec::new()), "已更新画布。");
    }

    #[test]
    fn assemble_keeps_gate_replies_when_no_actions_block() {
        let registry = RoleRegistry::default();
        let role = registry.default_role();
        let mut sequenced = batch("我先为续写新增了一个角色设定图。", Vec::new());
        sequenced.quick_replies = vec![QuickReply::new("角色OK，继续分镜", "确认")];
        let result = assemble(sequenced, role, "测试", &[]);
        assert_eq!(result.quick_replies.len(), 1);
        assert_eq!(result.active_role, role.id);
    }

    #[test]
    fn assemble_synthesizes_text_for_tool_only_turn() {
        let registry = RoleRegistry::default();
        let role = registry.default_role();
        let calls = vec![ToolCall::run("r1", "Fox")];
        let result = assemble(batch("", calls), role, "测试", &[]);
        assert_eq!(result.text, "已触发运行 1 个节点。");
        assert_eq!(result.tool_calls.len(), 1);
    }
}
