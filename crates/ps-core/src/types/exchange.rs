//! Captured HTTP exchanges.
//!
//! An [`Exchange`] is one request and its optional response as handed over
//! by the traffic-capture host. Only the text needed for analysis and
//! display is kept; the capture host owns the original bytes.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Section marker preceding the request in rendered exchange text.
pub const REQUEST_MARKER: &str = "=== HTTP请求 ===";

/// Section marker preceding the response in rendered exchange text.
pub const RESPONSE_MARKER: &str = "=== HTTP响应 ===";

/// A single HTTP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name as captured.
    pub name: String,
    /// Header value as captured.
    pub value: String,
}

impl Header {
    /// Creates a header from a name/value pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A captured HTTP request.
///
/// # Examples
///
/// ```
/// use ps_core::HttpRequest;
///
/// let req = HttpRequest::new("GET", "https://example.com/a/b?x=1");
/// assert_eq!(req.host(), "example.com");
/// assert_eq!(req.path(), "/a/b");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Absolute request url. An empty string means the url is absent.
    pub url: String,
    /// HTTP version string, e.g. `HTTP/1.1`.
    pub http_version: String,
    /// Request headers in capture order.
    pub headers: Vec<Header>,
    /// Request body decoded as text.
    pub body: String,
}

impl HttpRequest {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            http_version: "HTTP/1.1".to_owned(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns `true` if the request carries a non-blank url.
    #[inline]
    #[must_use]
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Returns the authority part of the url (host and optional port).
    ///
    /// Falls back to the `Host` header for origin-form urls.
    #[must_use]
    pub fn host(&self) -> &str {
        let (_, authority, _) = split_url(&self.url);
        if authority.is_empty() {
            return header_value(&self.headers, "host").unwrap_or_default();
        }
        authority.rsplit_once('@').map_or(authority, |(_, host)| host)
    }

    /// Returns the url path without query string or fragment.
    #[must_use]
    pub fn path(&self) -> &str {
        let (_, _, rest) = split_url(&self.url);
        let end = rest.find(['?', '#']).unwrap_or(rest.len());
        let path = &rest[..end];
        if path.is_empty() { "/" } else { path }
    }

    /// Returns the url with query string and fragment removed.
    #[must_use]
    pub fn url_without_query(&self) -> &str {
        let url = self.url.trim();
        let end = url.find(['?', '#']).unwrap_or(url.len());
        &url[..end]
    }

    /// Returns the path plus query, the part shown in result lists.
    #[must_use]
    pub fn path_and_query(&self) -> &str {
        let (_, _, rest) = split_url(&self.url);
        let end = rest.find('#').unwrap_or(rest.len());
        if rest.is_empty() { "/" } else { &rest[..end] }
    }

    /// Looks up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// A captured HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase, may be empty.
    pub reason: String,
    /// Response headers in capture order.
    pub headers: Vec<Header>,
    /// Response body decoded as text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response with the given status and no headers.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the declared MIME type, lowercased and without parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use ps_core::HttpResponse;
    ///
    /// let resp = HttpResponse::new(200).with_header("Content-Type", "Image/PNG; q=1");
    /// assert_eq!(resp.content_type().as_deref(), Some("image/png"));
    /// ```
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        header_value(&self.headers, "content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Looks up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// A captured request with its optional response.
///
/// The request itself is optional because capture hosts can report
/// exchanges whose request could not be decoded; such exchanges are never
/// analysed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exchange {
    /// The captured request.
    pub request: Option<HttpRequest>,
    /// The captured response, absent for requests that got no answer.
    pub response: Option<HttpResponse>,
}

impl Exchange {
    /// Creates an exchange from a request and optional response.
    #[must_use]
    pub const fn new(request: HttpRequest, response: Option<HttpResponse>) -> Self {
        Self {
            request: Some(request),
            response,
        }
    }

    /// Returns the deduplication key, or `None` when there is no request.
    #[must_use]
    pub fn dedup_key(&self) -> Option<String> {
        self.request
            .as_ref()
            .map(|req| dedup_key(&req.method, req.host(), req.url_without_query()))
    }

    /// Renders the exchange as raw HTTP text with section markers.
    ///
    /// The request section always comes first; the response section is
    /// only present when a response was captured.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = self.request_text();
        let response = self.response_text();
        if !response.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&response);
        }
        out
    }

    /// Renders the request section, empty when there is no request.
    #[must_use]
    pub fn request_text(&self) -> String {
        let mut out = String::new();
        if let Some(req) = &self.request {
            let _ = writeln!(out, "{REQUEST_MARKER}");
            let _ = writeln!(
                out,
                "{} {} {}",
                req.method,
                req.path_and_query(),
                req.http_version
            );
            if req.header("host").is_none() && !req.host().is_empty() {
                let _ = writeln!(out, "Host: {}", req.host());
            }
            write_headers(&mut out, &req.headers);
            out.push('\n');
            out.push_str(&req.body);
        }
        out
    }

    /// Renders the response section, empty when there is no response.
    #[must_use]
    pub fn response_text(&self) -> String {
        let mut out = String::new();
        if let Some(resp) = &self.response {
            let _ = writeln!(out, "{RESPONSE_MARKER}");
            let _ = writeln!(out, "HTTP/1.1 {} {}", resp.status, resp.reason);
            write_headers(&mut out, &resp.headers);
            out.push('\n');
            out.push_str(&resp.body);
        }
        out
    }
}

/// Builds the deduplication key `method|host|url-without-query`.
///
/// # Examples
///
/// ```
/// use ps_core::dedup_key;
///
/// assert_eq!(dedup_key("GET", "h", "https://h/a"), "GET|h|https://h/a");
/// ```
#[must_use]
pub fn dedup_key(method: &str, host: &str, url_without_query: &str) -> String {
    format!("{method}|{host}|{url_without_query}")
}

fn write_headers(out: &mut String, headers: &[Header]) {
    for header in headers {
        let _ = writeln!(out, "{}: {}", header.name, header.value);
    }
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Splits an absolute url into `(scheme, authority, path-and-rest)`.
///
/// Origin-form urls (`/a/b`) have an empty scheme and authority, even when
/// their query carries an absolute url.
fn split_url(url: &str) -> (&str, &str, &str) {
    let url = url.trim();
    let Some((scheme, rest)) = url
        .split_once("://")
        .filter(|(scheme, _)| !scheme.contains(['/', '?', '#']))
    else {
        return ("", "", url);
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    (scheme, &rest[..end], &rest[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_path() {
        let req = HttpRequest::new("GET", "https://api.example.com:8443/v1/users?id=3#top");
        assert_eq!(req.host(), "api.example.com:8443");
        assert_eq!(req.path(), "/v1/users");
        assert_eq!(req.path_and_query(), "/v1/users?id=3");
        assert_eq!(
            req.url_without_query(),
            "https://api.example.com:8443/v1/users"
        );
    }

    #[test]
    fn test_host_strips_userinfo() {
        let req = HttpRequest::new("GET", "http://user:pw@example.com/");
        assert_eq!(req.host(), "example.com");
    }

    #[test]
    fn test_origin_form_uses_host_header() {
        let req = HttpRequest::new("GET", "/login").with_header("Host", "intranet.local");
        assert_eq!(req.host(), "intranet.local");
        assert_eq!(req.path(), "/login");
    }

    #[test]
    fn test_origin_form_with_url_in_query() {
        let req = HttpRequest::new("GET", "/redirect?to=http://cdn.test/x.js")
            .with_header("Host", "shop.test");
        assert_eq!(req.host(), "shop.test");
        assert_eq!(req.path(), "/redirect");
        assert_eq!(req.path_and_query(), "/redirect?to=http://cdn.test/x.js");
        assert_eq!(
            Exchange::new(req, None).dedup_key().as_deref(),
            Some("GET|shop.test|/redirect")
        );
    }

    #[test]
    fn test_empty_path_is_root() {
        let req = HttpRequest::new("GET", "https://example.com?x=1");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_dedup_key_ignores_query() {
        let a = Exchange::new(HttpRequest::new("GET", "https://h/a?x=1"), None);
        let b = Exchange::new(HttpRequest::new("GET", "https://h/a?y=2"), None);
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key().as_deref(), Some("GET|h|https://h/a"));
    }

    #[test]
    fn test_dedup_key_distinguishes_method() {
        let get = Exchange::new(HttpRequest::new("GET", "https://h/a"), None);
        let post = Exchange::new(HttpRequest::new("POST", "https://h/a"), None);
        assert_ne!(get.dedup_key(), post.dedup_key());
    }

    #[test]
    fn test_dedup_key_without_request() {
        assert!(Exchange::default().dedup_key().is_none());
    }

    #[test]
    fn test_content_type_normalized() {
        let resp = HttpResponse::new(200).with_header("content-type", "Application/WASM");
        assert_eq!(resp.content_type().as_deref(), Some("application/wasm"));
        assert!(HttpResponse::new(204).content_type().is_none());
    }

    #[test]
    fn test_to_text_has_both_sections() {
        let exchange = Exchange::new(
            HttpRequest::new("POST", "https://h/login").with_body("user=a"),
            Some(
                HttpResponse::new(200)
                    .with_header("Content-Type", "text/html")
                    .with_body("ok"),
            ),
        );
        let text = exchange.to_text();
        assert!(text.starts_with(REQUEST_MARKER));
        assert!(text.contains("POST /login HTTP/1.1\nHost: h\n\nuser=a"));
        assert!(text.contains(RESPONSE_MARKER));
        assert!(text.ends_with("Content-Type: text/html\n\nok"));
    }
}
