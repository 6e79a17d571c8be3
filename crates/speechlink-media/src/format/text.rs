//! Extraction of speakable text from upstream model output.
//!
//! Text destined for synthesis may arrive as plain prose, as a single JSON
//! completion object, or as a server-sent-event stream of JSON deltas. All
//! three reduce to the concatenated content fragments.

use serde_json::Value;

const DONE_MARKER: &str = "[DONE]";

/// Reduce `input` to the text that should be spoken.
///
/// Returns an empty string when nothing speakable remains. Applying the
/// function to its own output is a no-op.
pub fn extract_speech_text(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    if !input.lines().any(is_protocol_line) {
        return input.to_string();
    }

    let trimmed = input.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return content_of(&value).unwrap_or_default();
        }
    }

    let mut out = String::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line == DONE_MARKER || is_sse_metadata(line) {
            continue;
        }
        let payload = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None => line,
        };
        if payload.is_empty() || payload == DONE_MARKER {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) if value.is_object() => {
                if let Some(fragment) = content_of(&value) {
                    out.push_str(&fragment);
                }
            }
            _ => out.push_str(payload),
        }
    }
    out
}

fn is_protocol_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("data:") || line.starts_with('{') || line == DONE_MARKER
}

fn is_sse_metadata(line: &str) -> bool {
    line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
        || line.starts_with(':')
}

/// Content of a chat-completion style object, streaming delta or full message.
fn content_of(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.get(0)?;
    ["delta", "message"]
        .iter()
        .find_map(|key| choice.get(*key)?.get("content")?.as_str())
        .or_else(|| choice.get("text")?.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_stream() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n\
                     data: [DONE]\n";
        assert_eq!(extract_speech_text(input), "ab");
    }

    #[test]
    fn test_single_json_object() {
        let input = r#"{"choices":[{"message":{"content":"hi"}}]}"#;
        assert_eq!(extract_speech_text(input), "hi");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(extract_speech_text("hello there."), "hello there.");
        assert_eq!(extract_speech_text("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert_eq!(extract_speech_text(""), "");
        assert_eq!(extract_speech_text("  \n\t "), "");
        assert_eq!(extract_speech_text("data: [DONE]\n"), "");
    }

    #[test]
    fn test_sse_metadata_skipped() {
        let input = ": keep-alive\n\
                     event: message\n\
                     id: 1\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n";
        assert_eq!(extract_speech_text(input), "ok");
    }

    #[test]
    fn test_delta_without_content_contributes_nothing() {
        let input = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n";
        assert_eq!(extract_speech_text(input), "x");
    }

    #[test]
    fn test_unparsable_data_kept_literally() {
        assert_eq!(extract_speech_text("data: plain words\n"), "plain words");
    }

    #[test]
    fn test_idempotent() {
        for input in [
            "hello",
            r#"{"choices":[{"message":{"content":"hi"}}]}"#,
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: [DONE]",
        ] {
            let once = extract_speech_text(input);
            assert_eq!(extract_speech_text(&once), once);
        }
    }
}
