/// Truncate to `max_chars` characters, appending an ellipsis when clipped.
pub(crate) fn clamp_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{}…", clipped.trim_end())
}

/// Strip a single surrounding Markdown code fence, tolerating a language tag.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body_start) = rest.find('\n') else {
        return trimmed;
    };
    let body = &rest[body_start + 1..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => trimmed,
    }
}
