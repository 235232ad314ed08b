//! HAR capture loading.
//!
//! Browser devtools and most intercepting proxies export traffic as HAR
//! 1.2 JSON. Each entry becomes one [`Exchange`]; entries without a
//! received response (status 0) keep the request only.

use camino::Utf8Path;
use color_eyre::eyre::WrapErr;
use ps_core::{Exchange, Header, HttpRequest, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Har {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    #[serde(default)]
    response: Option<HarResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    http_version: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct HarPostData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarResponse {
    status: i64,
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarContent {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Reads a HAR file into exchanges, in capture order.
pub fn load(path: &Utf8Path) -> color_eyre::Result<Vec<Exchange>> {
    let raw = std::fs::read_to_string(path.as_std_path())
        .wrap_err_with(|| format!("failed to read capture {path}"))?;
    parse(&raw).wrap_err_with(|| format!("failed to parse capture {path}"))
}

/// Parses HAR JSON into exchanges.
pub fn parse(json: &str) -> Result<Vec<Exchange>, serde_json::Error> {
    let har: Har = serde_json::from_str(json)?;
    Ok(har.log.entries.into_iter().map(into_exchange).collect())
}

fn into_exchange(entry: HarEntry) -> Exchange {
    let mut request = HttpRequest::new(entry.request.method, entry.request.url);
    if !entry.request.http_version.is_empty() {
        request.http_version = entry.request.http_version;
    }
    request.headers = convert_headers(entry.request.headers);
    if let Some(post) = entry.request.post_data {
        request.body = post.text;
    }

    let response = entry.response.and_then(|resp| {
        let status = u16::try_from(resp.status).ok().filter(|s| *s != 0)?;
        let mut response = HttpResponse::new(status);
        response.reason = resp.status_text;
        response.headers = convert_headers(resp.headers);
        if response.content_type().is_none() && !resp.content.mime_type.is_empty() {
            response
                .headers
                .push(Header::new("Content-Type", resp.content.mime_type.clone()));
        }
        response.body = content_body(resp.content);
        Some(response)
    });

    Exchange::new(request, response)
}

/// Drops HTTP/2 pseudo-headers, which the raw text rendering re-derives.
fn convert_headers(headers: Vec<HarHeader>) -> Vec<Header> {
    headers
        .into_iter()
        .filter(|h| !h.name.starts_with(':'))
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

fn content_body(content: HarContent) -> String {
    match (content.text, content.encoding.as_deref()) {
        (Some(_), Some("base64")) => {
            format!("[base64 body omitted, {} bytes]", content.size.max(0))
        }
        (Some(text), _) => text,
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "log": {
        "version": "1.2",
        "entries": [
          {
            "request": {
              "method": "POST",
              "url": "https://shop.test/api/login",
              "httpVersion": "HTTP/2.0",
              "headers": [
                {"name": ":authority", "value": "shop.test"},
                {"name": "Content-Type", "value": "application/json"}
              ],
              "postData": {"mimeType": "application/json", "text": "{\"user\":\"a\"}"}
            },
            "response": {
              "status": 200,
              "statusText": "OK",
              "headers": [],
              "content": {"size": 11, "mimeType": "application/json", "text": "{\"ok\":true}"}
            }
          },
          {
            "request": {"method": "GET", "url": "https://shop.test/logo", "headers": []},
            "response": {
              "status": 200,
              "statusText": "OK",
              "headers": [{"name": "content-type", "value": "image/png"}],
              "content": {"size": 2048, "mimeType": "image/png", "text": "iVBORw0KGgo=", "encoding": "base64"}
            }
          },
          {
            "request": {"method": "GET", "url": "https://shop.test/slow", "headers": []},
            "response": {"status": 0, "statusText": "", "headers": [], "content": {}}
          }
        ]
      }
    }"#;

    #[test]
    fn test_parse_entries() {
        let exchanges = parse(SAMPLE).unwrap();
        assert_eq!(exchanges.len(), 3);

        let login = &exchanges[0];
        let req = login.request.as_ref().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.http_version, "HTTP/2.0");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.body, "{\"user\":\"a\"}");
        let resp = login.response.as_ref().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type().as_deref(), Some("application/json"));
        assert_eq!(resp.body, "{\"ok\":true}");
    }

    #[test]
    fn test_base64_body_is_omitted() {
        let exchanges = parse(SAMPLE).unwrap();
        let resp = exchanges[1].response.as_ref().unwrap();
        assert_eq!(resp.body, "[base64 body omitted, 2048 bytes]");
        assert_eq!(resp.content_type().as_deref(), Some("image/png"));
    }

    #[test]
    fn test_unanswered_request_has_no_response() {
        let exchanges = parse(SAMPLE).unwrap();
        assert!(exchanges[2].response.is_none());
        assert_eq!(exchanges[2].request.as_ref().unwrap().http_version, "HTTP/1.1");
    }

    #[test]
    fn test_rejects_non_har() {
        assert!(parse(r#"{"entries": []}"#).is_err());
    }
}
