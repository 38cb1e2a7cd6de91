//! Parse boundary for structured oracle replies.
//!
//! Replies are untrusted model text. Parsing tries the raw text as JSON, then
//! the body of a markdown code fence, then the first balanced `{...}` or
//! `[...]` chunk. Failure yields [`Parsed::Unparsed`] carrying the raw text;
//! nothing here returns an error.

use serde::de::DeserializeOwned;

/// Outcome of parsing a structured reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Ok(T),
    Unparsed { raw: String },
}

impl<T> Parsed<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Parsed::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Ok(value) => Some(value),
            Parsed::Unparsed { .. } => None,
        }
    }

    /// Parsed value, or `T::default()` for unparsable replies.
    pub fn or_default(self) -> T
    where
        T: Default,
    {
        self.ok().unwrap_or_default()
    }
}

/// Parse a structured reply into `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Parsed<T> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Parsed::Ok(value);
    }
    if let Some(body) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str(body) {
            return Parsed::Ok(value);
        }
    }
    if let Some(chunk) = first_balanced_chunk(trimmed) {
        if let Ok(value) = serde_json::from_str(chunk) {
            return Parsed::Ok(value);
        }
    }
    Parsed::Unparsed {
        raw: raw.to_string(),
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim())
}

/// First `{...}` or `[...]` chunk with balanced brackets, string-aware.
fn first_balanced_chunk(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
