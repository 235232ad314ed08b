//! Request filtering ahead of analysis.
//!
//! Filtering at intake keeps static assets and binary downloads out of the
//! queue entirely, so they never cost a remote call.
//!
//! # Examples
//!
//! ```
//! use ps_core::{Exchange, HttpRequest, HttpResponse};
//! use ps_scanner::should_skip_request;
//!
//! let css = Exchange::new(HttpRequest::new("GET", "https://h/site.css?v=3"), None);
//! assert!(should_skip_request(Some(&css)));
//!
//! let api = Exchange::new(HttpRequest::new("GET", "https://h/api/users"), None);
//! assert!(!should_skip_request(Some(&api)));
//!
//! assert!(should_skip_request(None));
//! ```

use std::sync::LazyLock;

use ps_core::{Exchange, FilterConfig, FxHashSet};
use smallvec::SmallVec;

/// A predicate deciding which captured exchanges never reach analysis.
///
/// Filters are shared between the capture handler and manual submission,
/// so they must be [`Send`] and [`Sync`].
pub trait RequestFilter: Send + Sync + 'static {
    /// Returns `true` if the exchange should be dropped.
    ///
    /// A missing exchange, a missing request, or a blank url must always
    /// be dropped.
    fn should_skip(&self, exchange: Option<&Exchange>) -> bool;
}

/// Drops static resources and GET responses with binary content types.
///
/// Rules, in order:
///
/// - no exchange, request or url: skip
/// - path (query stripped) ends in a static extension: skip
/// - any directory segment of the path is a static-asset directory: skip
/// - GET only: a response whose content type is binary: skip
///
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct StaticResourceFilter {
    /// Lowercased extensions without the leading dot.
    extensions: Vec<String>,

    /// Lowercased directory names.
    dirs: FxHashSet<String>,

    /// Lowercased content types; entries ending in `/` are prefixes.
    binary_types: SmallVec<[String; 8]>,
}

static DEFAULT_FILTER: LazyLock<StaticResourceFilter> =
    LazyLock::new(|| StaticResourceFilter::new(&FilterConfig::default()));

impl StaticResourceFilter {
    /// Builds a filter from configuration tables.
    #[must_use]
    pub fn new(config: &FilterConfig) -> Self {
        let lower = |s: &String| s.trim().trim_start_matches('.').to_ascii_lowercase();
        Self {
            extensions: config.static_extensions.iter().map(lower).collect(),
            dirs: config
                .static_dirs
                .iter()
                .map(|d| d.trim().trim_matches('/').to_ascii_lowercase())
                .collect(),
            binary_types: config
                .binary_content_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns the filter built from the default tables.
    #[must_use]
    pub fn shared_default() -> &'static Self {
        &DEFAULT_FILTER
    }

    /// Returns `true` if a url path names a static resource.
    #[must_use]
    pub fn is_static_path(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        let segments: SmallVec<[&str; 16]> = path.split('/').collect();
        let Some((file, dirs)) = segments.split_last() else {
            return false;
        };
        self.has_static_extension(file) || dirs.iter().any(|d| self.dirs.contains(*d))
    }

    fn has_static_extension(&self, file: &str) -> bool {
        self.extensions.iter().any(|ext| {
            file.len() > ext.len()
                && file.ends_with(ext.as_str())
                && file.as_bytes()[file.len() - ext.len() - 1] == b'.'
        })
    }

    /// Returns `true` if a normalized content type is binary.
    #[must_use]
    pub fn is_binary_type(&self, content_type: &str) -> bool {
        self.binary_types.iter().any(|t| {
            if t.ends_with('/') {
                content_type.starts_with(t.as_str())
            } else {
                content_type == t
            }
        })
    }
}

impl Default for StaticResourceFilter {
    fn default() -> Self {
        DEFAULT_FILTER.clone()
    }
}

impl RequestFilter for StaticResourceFilter {
    fn should_skip(&self, exchange: Option<&Exchange>) -> bool {
        let Some(request) = exchange.and_then(|e| e.request.as_ref()) else {
            return true;
        };
        if !request.has_url() {
            return true;
        }
        if self.is_static_path(request.path()) {
            return true;
        }
        // Uploads can legitimately carry binary bodies, so only GET is judged
        // by its response type.
        if request.method.eq_ignore_ascii_case("GET") {
            let binary = exchange
                .and_then(|e| e.response.as_ref())
                .and_then(ps_core::HttpResponse::content_type)
                .is_some_and(|ct| self.is_binary_type(&ct));
            if binary {
                return true;
            }
        }
        false
    }
}

/// Applies the default [`StaticResourceFilter`].
#[must_use]
pub fn should_skip_request(exchange: Option<&Exchange>) -> bool {
    StaticResourceFilter::shared_default().should_skip(exchange)
}

#[cfg(test)]
mod tests {
    use ps_core::{HttpRequest, HttpResponse};

    use super::*;

    fn get(url: &str) -> Exchange {
        Exchange::new(HttpRequest::new("GET", url), None)
    }

    fn with_type(method: &str, content_type: &str) -> Exchange {
        Exchange::new(
            HttpRequest::new(method, "https://h/download"),
            Some(HttpResponse::new(200).with_header("Content-Type", content_type)),
        )
    }

    #[test]
    fn test_static_extensions_skipped() {
        for ext in ["css", "js", "png", "jpg", "ico", "woff2", "pdf", "zip", "map"] {
            let plain = get(&format!("https://h/a/file.{ext}"));
            let query = get(&format!("https://h/a/file.{ext}?v=1&x=2"));
            assert!(should_skip_request(Some(&plain)), "{ext}");
            assert!(should_skip_request(Some(&query)), "{ext} with query");
        }
        assert!(should_skip_request(Some(&get("https://h/app.js.map"))));
    }

    #[test]
    fn test_extension_case_insensitive() {
        assert!(should_skip_request(Some(&get("https://h/LOGO.PNG"))));
        assert!(should_skip_request(Some(&get("https://h/Site.CSS?x"))));
    }

    #[test]
    fn test_extension_needs_dot() {
        assert!(!should_skip_request(Some(&get("https://h/api/getcss"))));
        assert!(!should_skip_request(Some(&get("https://h/api/sitemap"))));
    }

    #[test]
    fn test_static_dirs_skipped() {
        for dir in ["images", "css", "js", "static", "assets", "fonts"] {
            let exchange = get(&format!("https://h/{dir}/whatever"));
            assert!(should_skip_request(Some(&exchange)), "{dir}");
        }
        assert!(should_skip_request(Some(&get("https://h/Static/app"))));
    }

    #[test]
    fn test_dir_name_as_last_segment_kept() {
        assert!(!should_skip_request(Some(&get("https://h/api/images"))));
    }

    #[test]
    fn test_binary_types_skip_get_only() {
        for ct in ["image/png", "image/svg+xml", "application/wasm"] {
            assert!(should_skip_request(Some(&with_type("GET", ct))), "{ct}");
            assert!(!should_skip_request(Some(&with_type("POST", ct))), "{ct}");
            assert!(!should_skip_request(Some(&with_type("PUT", ct))), "{ct}");
        }
    }

    #[test]
    fn test_content_type_with_params() {
        assert!(should_skip_request(Some(&with_type("get", "Image/JPEG; q=0.9"))));
        assert!(!should_skip_request(Some(&with_type(
            "GET",
            "text/html; charset=utf-8"
        ))));
    }

    #[test]
    fn test_missing_parts_skipped() {
        assert!(should_skip_request(None));
        assert!(should_skip_request(Some(&Exchange::default())));
        assert!(should_skip_request(Some(&get(""))));
        assert!(should_skip_request(Some(&get("   "))));
    }

    #[test]
    fn test_plain_requests_kept() {
        assert!(!should_skip_request(Some(&get("https://h/api/login"))));
        assert!(!should_skip_request(Some(&get("https://h/"))));
        let post = Exchange::new(HttpRequest::new("POST", "https://h/api/upload"), None);
        assert!(!should_skip_request(Some(&post)));
    }

    #[test]
    fn test_asset_url_in_query_kept() {
        let redirect = Exchange::new(
            HttpRequest::new("GET", "/redirect?to=http://cdn.test/x.js")
                .with_header("Host", "shop.test"),
            None,
        );
        assert!(!should_skip_request(Some(&redirect)));
    }

    #[test]
    fn test_custom_tables() {
        let filter = StaticResourceFilter::new(&FilterConfig {
            static_extensions: vec![".TXT".to_owned()],
            static_dirs: vec!["/cdn/".to_owned()],
            binary_content_types: vec!["application/x-protobuf".to_owned()],
        });
        assert!(filter.should_skip(Some(&get("https://h/readme.txt"))));
        assert!(filter.should_skip(Some(&get("https://h/cdn/lib"))));
        assert!(!filter.should_skip(Some(&get("https://h/site.css"))));
        assert!(filter.should_skip(Some(&with_type("GET", "application/x-protobuf"))));
    }
}
