use tapcanvas_contracts::policy;
use tapcanvas_contracts::turn::{LlmErrorInfo, QuickReply};

use crate::continuity::LinkedDraft;

/// Block name without the fence prefix; see `assemble::ACTIONS_MARKER`.
const ACTIONS_BLOCK_NAME: &str = "tapcanvas_actions";

/// Draft after gating. Authoritative: once a gate clears the batch no later
/// stage reintroduces mutations.
#[derive(Debug, Clone, Default)]
pub struct GatedDraft {
    pub text: String,
    pub calls: tapcanvas_contracts::toolcall::MutationBatch,
    pub quick_replies: Vec<QuickReply>,
    pub error: Option<LlmErrorInfo>,
}

/// Two gates, in order. The story-suggestion gate catches open-ended
/// continuation requests and swaps execution for direction pickers; the
/// supervisor gate enforces the router's allow_canvas_tools decision.
pub fn apply(draft: LinkedDraft, user_text: &str, allow_canvas_tools: bool) -> GatedDraft {
    let mut gated = GatedDraft {
        text: draft.text,
        calls: draft.calls,
        quick_replies: draft.quick_replies,
        error: draft.error,
    };

    // Bare substring on purpose: any mention of the actions block, fenced or
    // not, means the model already committed to concrete actions.
    if policy::is_story_suggestion_request(user_text) && !gated.text.contains(ACTIONS_BLOCK_NAME) {
        gated.calls.clear();
        gated.quick_replies = story_direction_replies();
        gated.text =
            "给你 3 个续写方向，点一个我就按这个继续写；也可以选“自定义方向”把你想要的走向填进去。"
                .to_string();
    }

    if !allow_canvas_tools {
        gated.calls.clear();
        if gated.quick_replies.is_empty() {
            gated.quick_replies = holding_replies();
        }
        if gated.text.trim().is_empty() {
            gated.text =
                "我先不动画布。你想先聊清楚需求，还是直接点一个选项让我开始执行？".to_string();
        }
    }

    gated
}

fn story_direction_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "方向A：暖心日常",
            "我选择方向A（暖心日常）：请基于当前项目已有剧情与角色关系（沿用同一世界观/场景/氛围）续写下一段 15 秒的小故事。先给我紧凑剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "方向B：轻冒险任务",
            "我选择方向B（轻冒险任务）：请基于当前项目已有剧情续写，加入一个小目标/小危机但保持治愈基调。先给剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "方向C：小悬疑反转",
            "我选择方向C（小悬疑反转）：请基于当前项目已有剧情续写，前半段制造小谜团，结尾温暖反转（不要跳出既有设定）。先给剧情梗概（3-5句），再生成九宫格分镜（image）并连接到15s视频（composeVideo）。",
        ),
        QuickReply::new(
            "自定义方向…",
            "我想自定义续写方向（基于当前项目已有剧情，不要另起炉灶）：\n- 主题/情绪：\n- 场景：\n- 关键事件：\n- 结尾落点：\n请基于我的填写先给梗概，再做九宫格分镜与15s视频。",
        ),
    ]
}

fn holding_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::new(
            "继续创作（先选方向）",
            "基于我当前项目画布，先给 3 个可选方向（按钮）让我选；我选完你再在画布创建分镜/视频节点。",
        ),
        QuickReply::new(
            "直接生成（我给具体需求）",
            "我想在画布生成一个内容：\n- 类型（图片/分镜/视频）：\n- 主题：\n- 风格：\n- 时长/比例（如需要）：\n请按我的填写创建节点并执行。",
        ),
        QuickReply::new(
            "只聊不操作画布",
            "先不操作画布。请先用一句话问我：我想做什么类型的内容、有什么参考、以及希望的风格/时长。",
        ),
    ]
}
