//! Sanitize untrusted relay strings before they are embedded in generated C source.
//!
//! Offending characters are removed rather than escaped, so the output never depends on how a
//! compiler interprets escape sequences.

fn remove_chars(raw: &str, bad: &[char]) -> String {
    raw.chars()
        .filter(|c| !bad.contains(c))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect()
}

/// Make `raw` safe inside a `/* ... */` comment: no `*` (so no `/*` or `*/`), no NUL, and every
/// whitespace character replaced by a space. `//` is harmless as long as the closing `*/` is on
/// its own line.
pub fn c_multiline_comment(raw: &str) -> String {
    remove_chars(raw, &['*', '\0'])
}

/// Make `raw` safe inside a `"..."` string literal: no quotes, no backslashes, no NUL, and every
/// whitespace character replaced by a space.
pub fn c_string(raw: &str) -> String {
    remove_chars(raw, &['"', '\\', '\0'])
}
