//! Built-in policies.
//!
//! - [`ApiKeyPolicy`]: require one of a set of keys in a request header.
//! - [`HeaderPolicy`]: add or strip headers on the forwarded request.
//! - [`IpFilterPolicy`]: allow only client addresses within configured networks.
//! - [`DenyPolicy`]: block a resource outright.
//!
//! All of them can be declared in TOML (see [`CatalogConfig`](crate::CatalogConfig)) or constructed
//! directly.

use crate::config::ConfigError;
use crate::context::RequestContext;
use crate::decision::{DenyResponse, HeaderMutations};
use crate::error::PolicyError;
use crate::policy::{Policy, PolicyOutcome, PolicyState};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, WWW_AUTHENTICATE};
use http::StatusCode;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use subtle::{Choice, ConstantTimeEq};

/// Header carrying the proxy chain; clients may prefill it.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header Envoy sets to the trusted external client address.
pub const X_ENVOY_EXTERNAL_ADDRESS: &str = "x-envoy-external-address";

/// Requires an API key in a request header.
///
/// A missing or unknown key is denied with 401 and a `WWW-Authenticate`
/// challenge naming the header. Keys are compared in constant time.
///
/// # Example
/// ```
/// use gateway_authz::policies::ApiKeyPolicy;
/// use http::HeaderName;
///
/// let policy = ApiKeyPolicy::new(HeaderName::from_static("internal-key"), ["secret"])
///     .strip(true);
/// assert!(policy.accepts("secret"));
/// assert!(!policy.accepts("guess"));
/// ```
#[derive(Debug, Clone)]
pub struct ApiKeyPolicy {
    header: HeaderName,
    keys: Vec<String>,
    strip: bool,
    challenge: HeaderValue,
}

impl ApiKeyPolicy {
    /// Accept any of `keys` in `header`.
    pub fn new<I, K>(header: HeaderName, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let challenge = HeaderValue::from_str(&format!("ApiKey header=\"{}\"", header.as_str()))
            .unwrap_or_else(|_| HeaderValue::from_static("ApiKey"));
        Self {
            header,
            keys: keys.into_iter().map(Into::into).collect(),
            strip: false,
            challenge,
        }
    }

    /// Remove the key header from the forwarded request.
    pub fn strip(mut self, strip: bool) -> Self {
        self.strip = strip;
        self
    }

    /// The header the key is read from.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Check if `key` is one of the accepted keys.
    ///
    /// Every configured key is compared, so the time taken does not tell
    /// which key, if any, matched.
    pub fn accepts(&self, key: &str) -> bool {
        self.keys
            .iter()
            .fold(Choice::from(0), |found, candidate| {
                found | candidate.as_bytes().ct_eq(key.as_bytes())
            })
            .into()
    }

    fn reject(&self) -> PolicyOutcome {
        PolicyOutcome::Deny(
            DenyResponse::unauthorized().with_header(WWW_AUTHENTICATE, self.challenge.clone()),
        )
    }
}

#[async_trait]
impl Policy for ApiKeyPolicy {
    async fn apply(
        &self,
        ctx: &RequestContext,
        _state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        let Some(key) = ctx.header(self.header.as_str()) else {
            tracing::debug!(header = %self.header, "API key missing");
            return Ok(self.reject());
        };
        if !self.accepts(key.trim()) {
            tracing::debug!(header = %self.header, "API key rejected");
            return Ok(self.reject());
        }

        let mut mutations = HeaderMutations::new();
        if self.strip {
            mutations = mutations.remove(self.header.clone());
        }
        Ok(PolicyOutcome::Continue(mutations))
    }
}

/// Adds and strips headers on the forwarded request.
#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    mutations: HeaderMutations,
}

impl HeaderPolicy {
    /// A policy applying no changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header on the forwarded request.
    pub fn set(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.mutations = self.mutations.set(name, value);
        self
    }

    /// Strip a header from the forwarded request.
    pub fn remove(mut self, name: HeaderName) -> Self {
        self.mutations = self.mutations.remove(name);
        self
    }
}

#[async_trait]
impl Policy for HeaderPolicy {
    async fn apply(
        &self,
        _ctx: &RequestContext,
        _state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        Ok(PolicyOutcome::Continue(self.mutations.clone()))
    }
}

/// IP address matcher for [`IpFilterPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IpMatcher {
    /// Match any IP address.
    #[default]
    Any,
    /// Match a single IP address.
    Single(IpAddr),
    /// Match an IP network (CIDR notation).
    Network(IpNetwork),
    /// Match any of several matchers.
    List(Vec<IpMatcher>),
}

impl IpMatcher {
    /// Parse a matcher: `*`/`any`, a single address, or a CIDR network.
    ///
    /// # Example
    /// ```
    /// use gateway_authz::policies::IpMatcher;
    ///
    /// let network = IpMatcher::parse("10.0.0.0/8").unwrap();
    /// assert!(network.matches(&"10.1.2.3".parse().unwrap()));
    /// assert!(IpMatcher::parse("10.0.0.300").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        if s == "*" || s.eq_ignore_ascii_case("any") {
            return Ok(Self::Any);
        }
        if s.contains('/') {
            return s
                .parse::<IpNetwork>()
                .map(Self::Network)
                .map_err(|e| ConfigError::InvalidIp(s.to_string(), e.to_string()));
        }
        s.parse::<IpAddr>()
            .map(Self::Single)
            .map_err(|e| ConfigError::InvalidIp(s.to_string(), e.to_string()))
    }

    /// Parse several patterns into one list matcher.
    pub fn parse_list<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        patterns
            .iter()
            .map(|p| Self::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::List)
    }

    /// Check if an IP address matches.
    pub fn matches(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Single(addr) => addr == ip,
            Self::Network(network) => network.contains(*ip),
            Self::List(matchers) => matchers.iter().any(|m| m.matches(ip)),
        }
    }
}

/// Allows only clients whose address matches.
///
/// The client address is `X-Envoy-External-Address`, then the peer address
/// of the check call. `X-Forwarded-For` is read only after
/// [`trust_forwarded_for`](Self::trust_forwarded_for), since clients can send
/// any value in it. A request with no usable address is denied.
///
/// # Example
/// ```
/// use gateway_authz::policies::{IpFilterPolicy, IpMatcher};
///
/// // Two proxies in front of Envoy append to X-Forwarded-For.
/// let policy = IpFilterPolicy::new(IpMatcher::parse("10.0.0.0/8").unwrap())
///     .trust_forwarded_for(2);
/// assert_eq!(policy.trusted_hops(), Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct IpFilterPolicy {
    allow: IpMatcher,
    trusted_hops: Option<usize>,
}

impl IpFilterPolicy {
    /// Allow clients matching `allow`.
    pub fn new(allow: IpMatcher) -> Self {
        Self {
            allow,
            trusted_hops: None,
        }
    }

    /// Take the client address from `X-Forwarded-For`, skipping the
    /// `trusted_hops` rightmost entries appended by trusted proxies.
    ///
    /// With `0` the rightmost entry is used, as Envoy's
    /// `xff_num_trusted_hops` does. A header with too few entries is ignored.
    pub fn trust_forwarded_for(mut self, trusted_hops: usize) -> Self {
        self.trusted_hops = Some(trusted_hops);
        self
    }

    /// Number of trusted `X-Forwarded-For` hops, if the header is trusted.
    pub fn trusted_hops(&self) -> Option<usize> {
        self.trusted_hops
    }

    /// The client address as seen by the policy.
    pub fn client_ip(&self, ctx: &RequestContext) -> Option<IpAddr> {
        let forwarded = self.trusted_hops.and_then(|hops| {
            ctx.header(X_FORWARDED_FOR)?
                .rsplit(',')
                .nth(hops)
                .and_then(|entry| entry.trim().parse::<IpAddr>().ok())
        });
        forwarded
            .or_else(|| {
                ctx.header(X_ENVOY_EXTERNAL_ADDRESS)
                    .and_then(|v| v.trim().parse::<IpAddr>().ok())
            })
            .or_else(|| ctx.client_ip())
    }
}

#[async_trait]
impl Policy for IpFilterPolicy {
    async fn apply(
        &self,
        ctx: &RequestContext,
        _state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        match self.client_ip(ctx) {
            Some(ip) if self.allow.matches(&ip) => Ok(PolicyOutcome::proceed()),
            Some(ip) => {
                tracing::debug!(ip = %ip, "Client address not allowed");
                Ok(PolicyOutcome::Deny(DenyResponse::forbidden()))
            }
            None => {
                tracing::debug!("Client address unknown");
                Ok(PolicyOutcome::Deny(DenyResponse::forbidden()))
            }
        }
    }
}

/// Always denies.
#[derive(Debug, Clone)]
pub struct DenyPolicy {
    response: DenyResponse,
}

impl DenyPolicy {
    /// Deny with `status` and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: DenyResponse::new(status),
        }
    }

    /// Deny with a body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response = self.response.with_body(body);
        self
    }
}

impl Default for DenyPolicy {
    fn default() -> Self {
        Self {
            response: DenyResponse::forbidden(),
        }
    }
}

#[async_trait]
impl Policy for DenyPolicy {
    async fn apply(
        &self,
        _ctx: &RequestContext,
        _state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        Ok(PolicyOutcome::Deny(self.response.clone()))
    }
}
