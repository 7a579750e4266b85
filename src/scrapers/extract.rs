//! Low-level helpers for pulling JSON values out of escaped script payloads.

use crate::error::{Result, ScoutError};

/// Returns `s[start..=end]` where `end` is the bracket that closes the one at
/// `start`.
///
/// `start` must point at `[` or `{`. Brackets inside string literals are
/// ignored. A backslash always consumes the following byte, so escaped quotes
/// never toggle the string state.
///
/// # Errors
///
/// [`ScoutError::MalformedInput`] if `start` is not an opening bracket or the
/// input ends before the depth returns to zero.
pub fn extract_balanced(s: &str, start: usize) -> Result<&str> {
    let bytes = s.as_bytes();
    if !matches!(bytes.get(start), Some(b'[' | b'{')) {
        return Err(ScoutError::MalformedInput(format!(
            "expected an opening bracket at offset {start}"
        )));
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        match b {
            b'\\' => escape = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&s[start..=i]);
                }
            }
            _ => {}
        }
    }

    Err(ScoutError::MalformedInput(format!(
        "input ended at depth {depth} before the bracket at offset {start} closed"
    )))
}

/// Removes one level of JS string escaping.
///
/// `\"` becomes `"`, `\\` becomes `\`, and `\n`, `\t`, `\r`, `\/` are
/// restored. Other escapes (such as `\u00e9`) are kept verbatim so the JSON
/// parser can decode them.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Largest char boundary at or below `idx`.
pub(crate) fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut idx = idx;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
