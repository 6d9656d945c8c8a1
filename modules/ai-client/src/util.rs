// Text helpers for prompts and model output. Limits are in characters,
// matching how page and section lengths are configured.

/// First `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Last `max_chars` characters of `s`.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match s.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &s[start..],
        None => s,
    }
}

/// Unwrap a reply the model fenced as a code block, whatever language tag
/// the opening fence carries. Unfenced replies come back trimmed.
pub fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((info, body)) if !info.trim().contains(char::is_whitespace) => body,
        Some(_) => rest,
        // Single line: ```{"a":1}```
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}
