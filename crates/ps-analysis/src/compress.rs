//! Body compression for large exchanges.
//!
//! Header lines carry most of the signal for vulnerability analysis, so
//! compression only ever shortens the body that follows the first blank
//! line. When a rendered exchange carries both a request and a response
//! section, each half gets its own share of the budget.

use std::borrow::Cow;

use ps_core::{REQUEST_MARKER, RESPONSE_MARKER};

/// Compresses `text` to roughly `budget` bytes.
///
/// Header lines are always kept whole, so the output can exceed the budget
/// when the headers alone do. Truncation points fall on char boundaries and
/// are marked with `...[truncated N bytes]...`.
///
/// # Examples
///
/// ```
/// use ps_analysis::compress;
///
/// let text = format!("POST /upload HTTP/1.1\nHost: h\n\n{}", "A".repeat(100));
/// let out = compress(&text, 50);
/// assert!(out.starts_with("POST /upload HTTP/1.1\nHost: h\n\n"));
/// assert!(out.contains("[truncated"));
/// ```
#[must_use]
pub fn compress(text: &str, budget: usize) -> Cow<'_, str> {
    if text.len() <= budget {
        return Cow::Borrowed(text);
    }

    match split_sections(text) {
        Some((request, response)) => {
            let half = budget / 2;
            let mut out = compress_section(request, half).into_owned();
            out.push_str(&compress_section(response, half));
            Cow::Owned(out)
        }
        None => compress_section(text, budget),
    }
}

/// Splits at the response marker when both section markers are present.
fn split_sections(text: &str) -> Option<(&str, &str)> {
    let req_at = text.find(REQUEST_MARKER)?;
    let resp_at = text.find(RESPONSE_MARKER)?;
    (req_at < resp_at).then(|| text.split_at(resp_at))
}

fn compress_section(section: &str, budget: usize) -> Cow<'_, str> {
    if section.len() <= budget {
        return Cow::Borrowed(section);
    }

    let (head, body) = split_head(section);
    // Keep the separator between a truncated request and the response marker.
    let trailing = body.len() - body.trim_end_matches(['\r', '\n']).len();
    let body_core = &body[..body.len() - trailing];

    let keep = floor_char_boundary(body_core, budget.saturating_sub(head.len()));
    let dropped = body_core.len() - keep;
    if dropped == 0 {
        return Cow::Borrowed(section);
    }

    let mut out = String::with_capacity(head.len() + keep + 48);
    out.push_str(head);
    out.push_str(&body_core[..keep]);
    if keep > 0 {
        out.push('\n');
    }
    out.push_str("...[truncated ");
    out.push_str(&dropped.to_string());
    out.push_str(" bytes]...");
    out.push_str(&body[body.len() - trailing..]);
    Cow::Owned(out)
}

/// Splits a section after the first blank line. Without one, the whole
/// section counts as headers.
fn split_head(section: &str) -> (&str, &str) {
    let crlf = section.find("\r\n\r\n").map(|i| i + 4);
    let lf = section.find("\n\n").map(|i| i + 2);
    let at = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => section.len(),
    };
    section.split_at(at)
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_untouched() {
        let text = "GET / HTTP/1.1\nHost: h\n\n";
        assert!(matches!(compress(text, 1024), Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncates_body_only() {
        let text = format!(
            "POST /a HTTP/1.1\nHost: h\nX-Long: {}\n\n{}",
            "v".repeat(40),
            "B".repeat(200)
        );
        let out = compress(&text, 60);
        let (head, _) = split_head(&text);
        assert!(out.starts_with(head));
        assert!(out.ends_with("...[truncated 200 bytes]..."));
    }

    #[test]
    fn test_marker_snapshot() {
        let text = format!("GET /x HTTP/1.1\n\n{}", "0123456789".repeat(5));
        insta::assert_snapshot!(compress(&text, 27), @r"
        GET /x HTTP/1.1

        0123456789
        ...[truncated 40 bytes]...
        ");
    }

    #[test]
    fn test_respects_char_boundaries() {
        let text = format!("GET / HTTP/1.1\n\n{}", "漏洞".repeat(50));
        let out = compress(&text, 24);
        // 24 - 16 header bytes = 8, floored to a 3-byte boundary.
        assert!(out.contains("\n\n漏洞\n...[truncated"));
    }

    #[test]
    fn test_sections_compressed_independently() {
        let request = format!("{REQUEST_MARKER}\nPOST /a HTTP/1.1\n\n{}", "q".repeat(5000));
        let response = format!("{RESPONSE_MARKER}\nHTTP/1.1 200 OK\n\n{}", "r".repeat(50));
        let text = format!("{request}\n\n{response}");

        let out = compress(&text, 400);
        // The huge request body must not starve the short response.
        assert!(out.contains(&"r".repeat(50)));
        assert!(out.contains(RESPONSE_MARKER));
        assert!(out.contains("...[truncated"));
        assert!(out.len() < 600);
    }

    #[test]
    fn test_both_sections_truncated() {
        let request = format!("{REQUEST_MARKER}\nPOST /a HTTP/1.1\n\n{}", "q".repeat(1000));
        let response = format!("{RESPONSE_MARKER}\nHTTP/1.1 200 OK\n\n{}", "r".repeat(1000));
        let text = format!("{request}\n\n{response}");

        let out = compress(&text, 200);
        assert_eq!(out.matches("...[truncated").count(), 2);
        assert!(out.contains("]...\n\n=== HTTP响应 ==="));
    }

    #[test]
    fn test_headers_only_never_cut() {
        let text = format!("GET /a HTTP/1.1\nCookie: {}", "c".repeat(300));
        assert_eq!(compress(&text, 50), text);
    }
}
