//! Check-call messages exchanged with the proxy.
//!
//! The shapes follow Envoy's `envoy.service.auth.v3` `CheckRequest` and
//! `CheckResponse`, limited to the fields the decision core reads or writes.
//! Field names serialize in proto3 JSON form (`lowerCamelCase`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// gRPC status code for an allowed request.
pub const CODE_OK: i32 = 0;
/// gRPC status code for a denied request.
pub const CODE_PERMISSION_DENIED: i32 = 7;

/// An authorization check for one HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    /// Attributes of the request being checked.
    #[serde(default)]
    pub attributes: Option<AttributeContext>,
}

/// Attributes describing the request and its peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeContext {
    /// The downstream peer.
    #[serde(default)]
    pub source: Option<Peer>,
    /// The request itself.
    #[serde(default)]
    pub request: Option<RequestAttributesMessage>,
}

/// A network peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Socket address of the peer.
    #[serde(default)]
    pub address: Option<Address>,
}

/// Envoy address wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// TCP/UDP socket address.
    #[serde(default)]
    pub socket_address: Option<SocketAddress>,
}

/// An IP address and port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    /// IP address in text form.
    #[serde(default)]
    pub address: String,
    /// Port number.
    #[serde(default)]
    pub port_value: u32,
}

/// The `request` node of the attribute context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAttributesMessage {
    /// HTTP attributes.
    #[serde(default)]
    pub http: Option<HttpRequest>,
}

/// HTTP attributes of the checked request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    /// Request id assigned by the proxy.
    #[serde(default)]
    pub id: String,
    /// HTTP method.
    #[serde(default)]
    pub method: String,
    /// Request headers, lowercased by the proxy; repeated headers are joined.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Path including the query string.
    #[serde(default)]
    pub path: String,
    /// The `:authority` / `Host` value.
    #[serde(default)]
    pub host: String,
    /// URL scheme.
    #[serde(default)]
    pub scheme: String,
    /// Protocol, e.g. `HTTP/1.1`.
    #[serde(default)]
    pub protocol: String,
}

impl CheckRequest {
    /// Build a check request for the given method and path.
    ///
    /// # Example
    /// ```
    /// use gateway_authz::CheckRequest;
    ///
    /// let request = CheckRequest::http("POST", "/soap/1.0.0/phoneverify")
    ///     .with_header("internal-key", "secret")
    ///     .with_host("localhost:9095");
    /// assert_eq!(request.http_attributes().unwrap().method, "POST");
    /// ```
    pub fn http(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            attributes: Some(AttributeContext {
                source: None,
                request: Some(RequestAttributesMessage {
                    http: Some(HttpRequest {
                        method: method.into(),
                        path: path.into(),
                        ..HttpRequest::default()
                    }),
                }),
            }),
        }
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(http) = self.http_attributes_mut() {
            http.headers.insert(name.into(), value.into());
        }
        self
    }

    /// Set the request authority.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        if let Some(http) = self.http_attributes_mut() {
            http.host = host.into();
        }
        self
    }

    /// Set the downstream peer address.
    pub fn with_source(mut self, address: impl Into<String>, port: u32) -> Self {
        let attributes = self.attributes.get_or_insert_with(AttributeContext::default);
        attributes.source = Some(Peer {
            address: Some(Address {
                socket_address: Some(SocketAddress {
                    address: address.into(),
                    port_value: port,
                }),
            }),
        });
        self
    }

    /// The HTTP attributes, if present.
    pub fn http_attributes(&self) -> Option<&HttpRequest> {
        self.attributes.as_ref()?.request.as_ref()?.http.as_ref()
    }

    fn http_attributes_mut(&mut self) -> Option<&mut HttpRequest> {
        self.attributes.as_mut()?.request.as_mut()?.http.as_mut()
    }

    /// The downstream peer's IP address in text form, if present.
    pub fn source_address(&self) -> Option<&str> {
        let socket = self
            .attributes
            .as_ref()?
            .source
            .as_ref()?
            .address
            .as_ref()?
            .socket_address
            .as_ref()?;
        Some(socket.address.as_str())
    }
}

/// The answer to a check call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    /// `OK` allows the request; anything else denies it.
    pub status: RpcStatus,
    /// Details for the proxy.
    #[serde(flatten)]
    pub http_response: HttpResponse,
}

/// gRPC status carried in the response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcStatus {
    /// gRPC status code.
    pub code: i32,
    /// Optional developer-facing message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Either an ok or a denied HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HttpResponse {
    /// The request is forwarded upstream.
    OkResponse(OkHttpResponse),
    /// The request is answered directly by the proxy.
    DeniedResponse(DeniedHttpResponse),
}

/// Mutations applied to an allowed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkHttpResponse {
    /// Headers added to (or overwritten on) the upstream request.
    #[serde(default)]
    pub headers: Vec<HeaderValueOption>,
    /// Headers stripped from the upstream request.
    #[serde(default)]
    pub headers_to_remove: Vec<String>,
}

/// The response returned to the client for a denied request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedHttpResponse {
    /// HTTP status.
    pub status: HttpStatus,
    /// Headers on the denied response.
    #[serde(default)]
    pub headers: Vec<HeaderValueOption>,
    /// Body of the denied response.
    #[serde(default)]
    pub body: String,
}

/// An HTTP status code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStatus {
    /// Numeric status.
    pub code: u16,
}

/// A header plus append behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValueOption {
    /// The header.
    pub header: HeaderValue,
    /// `false` overwrites an existing header of the same name.
    #[serde(default)]
    pub append: bool,
}

/// A header key and value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderValue {
    /// Header name.
    pub key: String,
    /// Header value.
    pub value: String,
}

impl CheckResponse {
    /// Check if the response allows the request.
    pub fn is_allowed(&self) -> bool {
        self.status.code == CODE_OK && matches!(self.http_response, HttpResponse::OkResponse(_))
    }

    /// HTTP status of a denied response.
    pub fn denied_status(&self) -> Option<u16> {
        match &self.http_response {
            HttpResponse::DeniedResponse(denied) => Some(denied.status.code),
            HttpResponse::OkResponse(_) => None,
        }
    }

    /// Look up a header set by the response, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let headers = match &self.http_response {
            HttpResponse::OkResponse(ok) => &ok.headers,
            HttpResponse::DeniedResponse(denied) => &denied.headers,
        };
        headers
            .iter()
            .find(|h| h.header.key.eq_ignore_ascii_case(name))
            .map(|h| h.header.value.as_str())
    }
}
