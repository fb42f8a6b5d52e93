//! The immutable per-request context handed to policies.

use crate::api::{Api, PathParams, Resource};
use crate::attributes::RequestAttributes;
use crate::catalog::RouteMatch;
use http::{HeaderMap, Method};
use std::net::IpAddr;
use std::sync::Arc;

/// Everything the pipeline knows about a matched request.
///
/// Only built from a successful [`RouteMatch`]; a request that matched
/// nothing never reaches the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    path: String,
    method: Method,
    authority: Option<String>,
    headers: HeaderMap,
    client_ip: Option<IpAddr>,
    api: Arc<Api>,
    resource: Arc<Resource>,
    params: PathParams,
}

impl RequestContext {
    /// Build the context for a matched request.
    ///
    /// Headers are copied, so later mutations never alter what was received.
    pub fn build(route: &RouteMatch, attributes: &RequestAttributes) -> Self {
        Self {
            path: attributes.path().to_string(),
            method: attributes.method().clone(),
            authority: attributes.authority().map(str::to_string),
            headers: attributes.headers().clone(),
            client_ip: attributes.client_ip(),
            api: route.api.clone(),
            resource: route.resource.clone(),
            params: route.params.clone(),
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

    /// Headers as received.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A received header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Downstream client address, if known.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// The matched API.
    pub fn api(&self) -> &Arc<Api> {
        &self.api
    }

    /// The matched resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Path parameters captured by the resource template.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// A single path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
