//! Cleanup of raw record lines before they are decoded

/// Characters that may legally follow a backslash in a JSON string
const JSON_ESCAPES: &[char] = &['b', 't', 'n', 'f', 'r', '"', '\\', '/', 'u'];

/// Makes a line-delimited record decodable
///
/// Drops control characters other than tab, LF and CR, and doubles every
/// backslash that does not start a valid JSON escape. Each backslash is judged
/// by the character right after it, so `\\` keeps its first backslash and the
/// second one is judged on its own.
pub fn sanitize_line(line: &str) -> String {
    let chars: Vec<char> = line
        .chars()
        .filter(|c| !is_stripped_control(*c))
        .collect();

    let mut out = String::with_capacity(chars.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if c == '\\' {
            let escapes_next = chars.get(i + 1).is_some_and(|next| JSON_ESCAPES.contains(next));
            if !escapes_next {
                out.push('\\');
            }
        }
        out.push(c);
    }
    out
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_narrow_control_set() {
        assert_eq!(sanitize_line("a\u{00}b\u{07}c\u{1f}d"), "abcd");
        assert_eq!(sanitize_line("tab\there\nline\r"), "tab\there\nline\r");
    }

    #[test]
    fn test_doubles_unrecognized_backslashes() {
        assert_eq!(sanitize_line(r#"{"a": "C:\data"}"#), r#"{"a": "C:\\data"}"#);
        assert_eq!(sanitize_line(r#"{"a": "x\"y\n"}"#), r#"{"a": "x\"y\n"}"#);
        assert_eq!(sanitize_line(r"trailing\"), r"trailing\\");
        assert_eq!(sanitize_line(r"\u00e9"), r"\u00e9");
    }

    #[test]
    fn test_sanitized_line_decodes() {
        let line = "{\"recordId\": \"PAT00000001\", \"note\": \"20\\30 dB \u{02}\"}";
        let value: serde_json::Value = serde_json::from_str(&sanitize_line(line)).unwrap();
        assert_eq!(value["note"], "20\\30 dB ");
    }

    #[test]
    fn test_valid_json_is_untouched() {
        let line = r#"{"recordId":"PAT00000001","modelInput":{"messages":[{"role":"user","content":[{"type":"text","text":"a\\b \"q\" \n"}]}]}}"#;
        assert_eq!(sanitize_line(line), line);
    }
}
