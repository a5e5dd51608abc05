//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! pipeline produces `RequestParts`, a `Connection` turns them into an
//! `HttpRequest` and performs the I/O, and hands back an `HttpResponse`.
//! The core never touches the network itself.
//!
//! Bodies are raw bytes: serialization is chosen per request and may not be
//! textual.

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline resolved for one request, before a `Connection`
/// attaches it to a base URL.
///
/// `path` already has placeholders substituted and the query string
/// appended; `headers` are merged (client defaults, serializer headers,
/// descriptor headers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParts {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RequestParts {
    /// Join the resolved path onto `base_url`.
    ///
    /// Absolute paths (`http://` / `https://`) are taken as-is so a
    /// descriptor can address another host.
    pub fn into_request(self, base_url: &str) -> HttpRequest {
        let url = if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            )
        };
        HttpRequest {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// An HTTP request described as plain data, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
///
/// Constructed by the `Connection` after executing an `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Status line and headers of a response, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Immutable view of what came back over the wire for one operation.
///
/// Attached to every completion. Both fields are empty when the operation
/// failed before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseInfo {
    response: Option<ResponseMetadata>,
    body: Vec<u8>,
}

impl ResponseInfo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn response(&self) -> Option<&ResponseMetadata> {
        self.response.as_ref()
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl From<&HttpResponse> for ResponseInfo {
    fn from(response: &HttpResponse) -> Self {
        Self {
            response: Some(ResponseMetadata {
                status: response.status,
                headers: response.headers.clone(),
            }),
            body: response.body.clone(),
        }
    }
}

/// Case-insensitive header lookup.
pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Insert or replace a header, matching the name case-insensitively.
pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(entry) => entry.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(path: &str) -> RequestParts {
        RequestParts {
            method: HttpMethod::Get,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let req = parts("/users").into_request("http://localhost:3000/");
        assert_eq!(req.url, "http://localhost:3000/users");
    }

    #[test]
    fn relative_path_gets_a_separator() {
        let req = parts("users/42").into_request("http://localhost:3000");
        assert_eq!(req.url, "http://localhost:3000/users/42");
    }

    #[test]
    fn absolute_path_ignores_base_url() {
        let req = parts("https://other.example/ping").into_request("http://localhost:3000");
        assert_eq!(req.url, "https://other.example/ping");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        assert_eq!(find_header(&headers, "content-type"), Some("text/plain"));
        set_header(&mut headers, "CONTENT-TYPE", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "application/json");
    }

    #[test]
    fn success_range_is_2xx() {
        let mut response = HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(response.is_success());
        response.status = 301;
        assert!(!response.is_success());
    }
}
