use serde_json::{Map, Value};

use tapcanvas_contracts::canvas::NodeKind;
use tapcanvas_contracts::toolcall::{MutationBatch, ToolCall};
use tapcanvas_contracts::turn::LlmErrorInfo;

use crate::invoker::GenerationDraft;

/// Draft after raw-call validation and in-place field rewrites. No calls are
/// invented or removed past this point except by the linker/gate/sequencer.
#[derive(Debug, Clone, Default)]
pub struct NormalizedDraft {
    pub text: String,
    pub calls: MutationBatch,
    pub error: Option<LlmErrorInfo>,
}

/// Validates the raw streamed calls and applies the two in-place rewrites:
/// the `textToImage` alias collapses to `image` (arguments and `config.kind`
/// both), and a `composeVideo` create without a usable prompt gets one
/// synthesized from its structured storyboard fields.
pub fn normalize_draft(draft: GenerationDraft) -> NormalizedDraft {
    let mut calls: MutationBatch = draft
        .raw_calls
        .iter()
        .filter_map(ToolCall::from_raw)
        .collect();

    for call in &mut calls {
        let Some(args) = call.op.as_create_mut() else {
            continue;
        };
        if args.node_type == NodeKind::TextToImage {
            args.node_type = NodeKind::Image;
            if args.config.get("kind").and_then(Value::as_str) == Some("textToImage") {
                args.config
                    .insert("kind".to_string(), Value::String("image".to_string()));
            }
        }
    }

    for call in &mut calls {
        let Some(args) = call.op.as_create_mut() else {
            continue;
        };
        if args.node_type != NodeKind::ComposeVideo {
            continue;
        }
        if args.config_str("prompt").is_some() {
            continue;
        }
        let structured = args.config.get("shots").map(Value::is_array).unwrap_or(false)
            || args
                .config
                .get("characters")
                .map(Value::is_array)
                .unwrap_or(false);
        if !structured {
            continue;
        }
        let coerced = storyboard_prompt_from_config(&args.config);
        if !coerced.is_empty() {
            args.config
                .insert("prompt".to_string(), Value::String(coerced));
        }
    }

    NormalizedDraft {
        text: draft.text,
        calls,
        error: draft.error,
    }
}

/// Coerce a structured storyboard config into a single prompt string. Returns
/// the freeform `prompt`/`videoPrompt`/`storyboard` value when the structured
/// fields carry nothing usable, or empty when neither exists.
pub fn storyboard_prompt_from_config(cfg: &Map<String, Value>) -> String {
    let duration = first_number(cfg, &["durationSeconds", "duration", "duration_sec"]);
    let fps = first_number(cfg, &["fps"]);
    let aspect = first_str(cfg, &["aspectRatio", "aspect", "ratio"]);
    let style = first_str(cfg, &["style", "visualStyle", "look"]);
    let music = first_str(cfg, &["musicSfx", "music", "sfx"]);
    let characters = cfg.get("characters").and_then(Value::as_array);
    let shots = cfg.get("shots").and_then(Value::as_array);

    let mut body: Vec<String> = Vec::new();
    let mut meta_bits: Vec<String> = Vec::new();
    if let Some(duration) = duration {
        meta_bits.push(format!("时长: {}s", format_number(duration)));
    }
    if let Some(fps) = fps {
        meta_bits.push(format!("FPS: {}", fps as i64));
    }
    if let Some(aspect) = aspect {
        meta_bits.push(format!("画幅: {aspect}"));
    }
    if !meta_bits.is_empty() {
        body.push(meta_bits.join(" / "));
    }
    if let Some(style) = style {
        body.push(format!("风格基准: {style}"));
    }
    if let Some(music) = music {
        body.push(format!("音乐/音效: {music}"));
    }

    if let Some(characters) = characters {
        let mut lines: Vec<String> = Vec::new();
        for character in characters {
            let Some(item) = character.as_object() else {
                continue;
            };
            let reference = first_str(item, &["ref", "label", "nodeId"]);
            let name = first_str(item, &["name"]);
            let notes = first_str(item, &["notes"]);
            let mut line = String::from("- ");
            if let Some(name) = name {
                line.push_str(name);
            }
            if let Some(reference) = reference {
                if line.trim() == "-" {
                    line.push_str(reference);
                } else {
                    line.push_str(&format!("（参考: {reference}）"));
                }
            }
            if let Some(notes) = notes {
                line.push_str(&format!("：{notes}"));
            }
            if line.trim() != "-" {
                lines.push(line);
            }
        }
        if !lines.is_empty() {
            body.push(String::new());
            body.push("角色（保持与画布设定一致）：".to_string());
            body.extend(lines);
        }
    }

    if let Some(shots) = shots {
        let mut lines: Vec<String> = Vec::new();
        for (idx, shot) in shots.iter().enumerate() {
            let Some(item) = shot.as_object() else {
                continue;
            };
            let sid = first_str(item, &["id"])
                .map(str::to_string)
                .unwrap_or_else(|| format!("S{}", idx + 1));
            let mut header = sid;
            if let Some(time_range) = first_str(item, &["time"]) {
                header.push_str(&format!("（{time_range}）"));
            }
            let mut seg = vec![header];
            for (key, tag) in [
                ("shotSize", "景别"),
                ("camera", "机位/镜头"),
                ("movement", "运动"),
                ("action", "内容"),
                ("composition", "构图"),
            ] {
                if let Some(value) = first_str(item, &[key]) {
                    seg.push(format!("{tag}: {value}"));
                }
            }
            lines.push(format!("- {}", seg.join("；")));
        }
        if !lines.is_empty() {
            body.push(String::new());
            body.push("分镜（逐镜头）：".to_string());
            body.extend(lines);
        }
    }

    if body.iter().all(|line| line.is_empty()) {
        for key in ["prompt", "videoPrompt", "storyboard"] {
            if let Some(value) = first_str(cfg, &[key]) {
                return value.to_string();
            }
        }
        return String::new();
    }

    let mut parts = vec!["15秒分镜视频提示词（分镜清单 + 镜头语言）".to_string()];
    parts.extend(body);
    parts.join("\n").trim().to_string()
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_f64))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
