use std::ops::Range;

/// Literal that opens an inline tool-call directive in model output.
pub const TOOL_CALL_MARKER: &str = "[TOOL_CALL:";

/// One structured tool invocation extracted from raw model text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub raw_params: String,
    /// Byte range of the full directive in the source text, including the
    /// marker and any trailing list-wrapper bracket.
    pub span: Range<usize>,
}

/// Extract the first tool-call directive from `text`.
///
/// A regex cannot bound the parameter object because it may contain nested
/// braces and brace characters inside quoted strings, so this walks the text
/// tracking string/escape state and a brace depth counter. Returns `None`
/// when no marker is present or the braces never balance before the input
/// ends (truncated emission) — callers must not retry the same text.
pub fn extract(text: &str) -> Option<ToolCall> {
    let marker_start = text.find(TOOL_CALL_MARKER)?;
    let after_marker = marker_start + TOOL_CALL_MARKER.len();
    let colon = text[after_marker..].find(':')? + after_marker;
    let name = &text[after_marker..colon];
    let json_start = colon + 1;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[json_start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' && in_string {
            escaped = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if c == '{' {
            depth += 1;
        } else if c == '}' {
            depth -= 1;
            if depth == 0 {
                let params_end = json_start + offset + 1;
                // Some producers wrap the directive in a one-element list;
                // consume the extra closing bracket into the span.
                let span_end = if text[params_end..].starts_with(']') {
                    params_end + 1
                } else {
                    params_end
                };
                return Some(ToolCall {
                    name: name.to_string(),
                    raw_params: text[json_start..params_end].to_string(),
                    span: marker_start..span_end,
                });
            }
        }
    }

    None
}

/// Remove every balanced tool-call directive from `text`, re-scanning the
/// residual text after each removal, and trim the result.
pub fn strip_markers(text: &str) -> String {
    let mut clean = text.to_string();
    while let Some(call) = extract(&clean) {
        clean.replace_range(call.span, "");
    }
    clean.trim().to_string()
}
