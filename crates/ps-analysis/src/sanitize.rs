//! Text sanitization applied to everything forwarded to the remote model.
//!
//! Captured traffic routinely carries binary fragments. Before a prompt
//! leaves the process:
//!
//! - C0 control characters other than tab, CR and LF are dropped
//! - U+FFFD replacement characters left over from lossy decoding are dropped
//! - literal `\xNN` escape sequences become `[hex:NN]`

use std::borrow::Cow;

const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Sanitizes `text` for submission to the remote model.
///
/// Returns the input unchanged (borrowed) when nothing needs rewriting.
///
/// # Examples
///
/// ```
/// use ps_analysis::sanitize;
///
/// assert_eq!(sanitize("id=1\u{0}\u{7}&x=\\x3c"), "id=1&x=[hex:3c]");
/// assert_eq!(sanitize("a\tb\r\n"), "a\tb\r\n");
/// ```
#[must_use]
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !needs_rewrite(text) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if is_stripped(ch) {
            continue;
        }
        if ch == '\\' {
            if let Some(hex) = hex_escape_at(text, idx) {
                out.push_str("[hex:");
                out.push_str(hex);
                out.push(']');
                // Skip `x` and the two digits.
                chars.next();
                chars.next();
                chars.next();
                continue;
            }
        }
        out.push(ch);
    }
    Cow::Owned(out)
}

fn needs_rewrite(text: &str) -> bool {
    text.chars().any(is_stripped)
        || text
            .match_indices('\\')
            .any(|(idx, _)| hex_escape_at(text, idx).is_some())
}

const fn is_stripped(ch: char) -> bool {
    (ch.is_ascii_control() && !matches!(ch, '\t' | '\r' | '\n') && ch != '\u{7f}')
        || ch == REPLACEMENT_CHAR
}

/// Returns the two hex digits if `text[idx..]` starts with `\xNN`.
fn hex_escape_at(text: &str, idx: usize) -> Option<&str> {
    let rest = text.get(idx..)?.as_bytes();
    if rest.len() >= 4
        && rest[0] == b'\\'
        && rest[1] == b'x'
        && rest[2].is_ascii_hexdigit()
        && rest[3].is_ascii_hexdigit()
    {
        text.get(idx + 2..idx + 4)
    } else {
        None
    }
}
