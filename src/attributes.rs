//! Request attributes extracted from the inbound check call.
//!
//! [`RequestAttributes`] is the transport-neutral view of the request being
//! authorized. It can be extracted from a [`CheckRequest`] (the ext_authz
//! message) or from an [`http::Request`] when the decision core runs in-process
//! or serves Envoy's HTTP authorization mode.
//!
//! Header names are case-insensitive. Repeated headers are collapsed into one
//! comma separated value, the way Envoy reports them in a check request.

use crate::error::AttributeError;
use crate::wire::{CheckRequest, HttpRequest};
use axum::extract::ConnectInfo;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request};
use std::net::{IpAddr, SocketAddr};

/// The attributes of one request under authorization.
#[derive(Debug, Clone)]
pub struct RequestAttributes {
    path: String,
    method: Method,
    authority: Option<String>,
    headers: HeaderMap,
    client_ip: Option<IpAddr>,
}

impl RequestAttributes {
    /// Create attributes for `method` and `path` with no headers.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            authority: None,
            headers: HeaderMap::new(),
            client_ip: None,
        }
    }

    /// Set the request authority.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Add a header, replacing an existing value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the downstream client address.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Extract attributes from a check request.
    ///
    /// The `method`, `path` and `host` fields take precedence; Envoy's
    /// `:method`, `:path` and `:authority` pseudo headers are used when a field
    /// is empty. Pseudo headers are not copied into the header map.
    ///
    /// # Example
    /// ```
    /// use gateway_authz::{CheckRequest, RequestAttributes};
    ///
    /// let request = CheckRequest::http("GET", "/pets/1?verbose=true")
    ///     .with_header("Accept", "application/json");
    /// let attributes = RequestAttributes::from_check_request(&request).unwrap();
    /// assert_eq!(attributes.path(), "/pets/1?verbose=true");
    /// assert_eq!(attributes.header("accept"), Some("application/json"));
    /// ```
    pub fn from_check_request(request: &CheckRequest) -> Result<Self, AttributeError> {
        let http = request
            .http_attributes()
            .ok_or(AttributeError::MissingHttpAttributes)?;

        let method = non_empty(&http.method)
            .or_else(|| pseudo_header(http, ":method"))
            .ok_or(AttributeError::MissingMethod)?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| AttributeError::InvalidMethod(method.to_string()))?;

        let path = non_empty(&http.path)
            .or_else(|| pseudo_header(http, ":path"))
            .ok_or(AttributeError::MissingPath)?;

        let authority = non_empty(&http.host)
            .or_else(|| pseudo_header(http, ":authority"))
            .map(str::to_string);

        let mut headers = HeaderMap::with_capacity(http.headers.len());
        for (name, value) in &http.headers {
            if name.starts_with(':') {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AttributeError::InvalidHeaderName(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| AttributeError::InvalidHeaderValue(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        let client_ip = request
            .source_address()
            .and_then(|addr| addr.parse::<IpAddr>().ok());

        Ok(Self {
            path: path.to_string(),
            method,
            authority,
            headers,
            client_ip,
        })
    }

    /// Extract attributes from an HTTP request.
    ///
    /// The authority comes from the URI, falling back to the `Host` header.
    /// The client address comes from axum's `ConnectInfo<SocketAddr>`
    /// extension when the server was started with connect info.
    pub fn from_http_request<B>(request: &Request<B>) -> Self {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        let authority = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                request
                    .headers()
                    .get(http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });

        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip());

        Self {
            path,
            method: request.method().clone(),
            authority,
            headers: collapse_headers(request.headers()),
            client_ip,
        }
    }

    /// Request path including the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request authority, if known.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as text, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Downstream client address, if known.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

fn pseudo_header<'a>(http: &'a HttpRequest, name: &str) -> Option<&'a str> {
    http.headers.get(name).map(String::as_str).and_then(non_empty)
}

/// Join repeated header values with `", "` so each name maps to one value.
fn collapse_headers(headers: &HeaderMap) -> HeaderMap {
    let mut collapsed = HeaderMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let mut values = headers.get_all(name).iter();
        let Some(first) = values.next() else {
            continue;
        };
        let mut joined = first.as_bytes().to_vec();
        for value in values {
            joined.extend_from_slice(b", ");
            joined.extend_from_slice(value.as_bytes());
        }
        match HeaderValue::from_bytes(&joined) {
            Ok(value) => {
                collapsed.insert(name.clone(), value);
            }
            Err(_) => {
                tracing::debug!(header = %name, "Dropping header with unrepresentable joined value");
            }
        }
    }
    collapsed
}
