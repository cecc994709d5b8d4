//! Tolerant JSON extraction from model output
//!
//! Classifier models often wrap their JSON in prose or code fences. This
//! scanner finds the first balanced `{...}` block, skipping braces inside
//! string literals. It is best-effort: it does not validate the JSON, it only
//! finds a candidate for `serde_json` to parse.

/// First balanced top-level `{...}` block in `text`
#[must_use]
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}
