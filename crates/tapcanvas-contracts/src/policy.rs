//! Named keyword policy tables for intent detection and reference ranking.
//!
//! Every heuristic the engine applies to conversation text or node labels is
//! declared here as a table so it can be audited and tested in one place.

/// Marks a label/prompt as describing a storyboard-grid image.
pub const STORYBOARD_HINTS: &[&str] = &["九宫格", "3x3", "分镜", "storyboard"];

/// User text explicitly asking for a storyboard/video workflow.
pub const STORYBOARD_REQUEST_KEYWORDS: &[&str] =
    &["分镜", "故事板", "storyboard", "九宫格", "15s"];

/// User text continuing an existing story.
pub const CONTINUATION_KEYWORDS: &[&str] = &["续写", "后续剧情", "接下来", "续作"];

/// User text asking for open-ended suggestions rather than execution.
pub const SUGGESTION_KEYWORDS: &[&str] = &["推荐", "方向", "灵感", "怎么写"];

/// User text that confirms a previously offered continuation direction.
pub const CONTINUATION_STEP_KEYWORDS: &[&str] = &["我选择方向", "自定义续写", "续写"];

/// Label fragments that suggest a character design node.
pub const CHARACTER_HINTS: &[&str] = &["角色", "character"];

/// Labels excluded from the new-character heuristic even when they carry a
/// character hint.
pub const CHARACTER_EXCLUSIONS: &[&str] = &["分镜", "九宫格", "storyboard"];

/// User text implying new content should build on prior canvas results.
pub const REFERENCE_INTENT_KEYWORDS: &[&str] = &[
    "基于",
    "同款",
    "同风格",
    "沿用",
    "续写",
    "延展",
    "变体",
    "参考",
    "保持一致",
];

/// Labels never offered as upstream references for a storyboard.
pub const REFERENCE_EXCLUDED_LABELS: &[&str] =
    &["分镜", "九宫格", "storyboard", "视频", "15s视频"];

/// Label fragments rewarded when ranking storyboard reference candidates.
pub const DESIGN_LABEL_BONUS_KEYWORDS: &[&str] =
    &["角色", "设定", "立绘", "主视觉", "character", "design"];
pub const DESIGN_LABEL_BONUS: i32 = 3;

/// Recurring-subject fragments (matched case-insensitively for ASCII).
pub const SUBJECT_LABEL_BONUS_KEYWORDS: &[&str] = &["fox", "bunny", "rabbit", "狐狸", "兔子"];
pub const SUBJECT_LABEL_BONUS: i32 = 2;

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Open-ended "give me directions" request: continuation plus suggestion
/// wording, without an explicit storyboard ask.
pub fn is_story_suggestion_request(user_text: &str) -> bool {
    contains_any(user_text, CONTINUATION_KEYWORDS)
        && contains_any(user_text, SUGGESTION_KEYWORDS)
        && !contains_any(user_text, STORYBOARD_REQUEST_KEYWORDS)
}

/// The user picked or customized a continuation direction this turn.
pub fn is_continuation_step(user_text: &str) -> bool {
    contains_any(user_text, CONTINUATION_STEP_KEYWORDS) && !is_story_suggestion_request(user_text)
}

pub fn has_reference_intent(user_text: &str) -> bool {
    contains_any(user_text, REFERENCE_INTENT_KEYWORDS)
}

pub fn wants_storyboard(user_text: &str) -> bool {
    contains_any(user_text, STORYBOARD_REQUEST_KEYWORDS)
}

/// Does this label+prompt pair describe a storyboard-grid image?
pub fn reads_as_storyboard(hint: &str) -> bool {
    contains_any(hint, STORYBOARD_HINTS)
}

/// Character-design label that is not itself a storyboard artifact.
pub fn reads_as_character(label: &str) -> bool {
    let lowered = label.to_lowercase();
    contains_any(&lowered, CHARACTER_HINTS) && !contains_any(label, CHARACTER_EXCLUSIONS)
}

/// Fixed keyword bonuses for storyboard reference candidates. Ties keep
/// snapshot order (order-stable ranking; intentional, see product notes).
pub fn reference_label_score(label: &str) -> i32 {
    let mut score = 0;
    if contains_any(label, DESIGN_LABEL_BONUS_KEYWORDS) {
        score += DESIGN_LABEL_BONUS;
    }
    let lowered = label.to_lowercase();
    if contains_any(&lowered, SUBJECT_LABEL_BONUS_KEYWORDS) {
        score += SUBJECT_LABEL_BONUS;
    }
    score
}
