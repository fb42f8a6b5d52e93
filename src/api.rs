//! Deployed API and resource definitions.
//!
//! An [`Api`] is identified by its `(context, version)` pair and owns an ordered
//! list of [`Resource`]s. A resource binds an HTTP method and a [`PathTemplate`]
//! (relative to the API context) to the ordered list of policies that decide on
//! matching requests.
//!
//! Both types are immutable once built; the catalog shares them between
//! in-flight requests behind `Arc`s and replaces them wholesale on redeploy.
//!
//! ## Path templates
//!
//! - `/users` - literal segments match exactly
//! - `/users/{id}` - `{name}` matches one segment and captures it
//! - `/files/*` - `*` matches one segment without capturing it
//! - `/static/**` - a trailing `**` matches zero or more segments

use crate::config::ConfigError;
use crate::policy::{Policy, PolicyRef};
use http::Method;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Path parameters captured while matching a [`PathTemplate`].
pub type PathParams = BTreeMap<String, String>;

/// A deployed API: a context path, a version and its resources.
#[derive(Debug, Clone)]
pub struct Api {
    name: String,
    context: String,
    context_segments: Vec<String>,
    version: String,
    vhost: Option<String>,
    resources: Vec<Arc<Resource>>,
}

impl Api {
    /// Start building an API mounted at `context`.
    ///
    /// # Example
    /// ```
    /// use gateway_authz::{Api, PathTemplate, Resource};
    /// use http::Method;
    ///
    /// let api = Api::builder("PhoneVerification", "/soap/1.0.0", "1.0.0")
    ///     .resource(Resource::new(Method::POST, PathTemplate::parse("/phoneverify").unwrap()))
    ///     .build();
    /// assert_eq!(api.context(), "/soap/1.0.0");
    /// ```
    pub fn builder(
        name: impl Into<String>,
        context: impl Into<String>,
        version: impl Into<String>,
    ) -> ApiBuilder {
        ApiBuilder::new(name, context, version)
    }

    /// Human readable API name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized base context path (leading slash, no trailing slash).
    pub fn context(&self) -> &str {
        &self.context
    }

    /// API version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Virtual host this API is bound to, if any.
    pub fn vhost(&self) -> Option<&str> {
        self.vhost.as_deref()
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// Identity of the API within a catalog.
    pub fn identity(&self) -> (&str, &str) {
        (&self.context, &self.version)
    }

    /// Number of path segments in the context.
    pub(crate) fn context_len(&self) -> usize {
        self.context_segments.len()
    }

    /// Whether the context is a segment-aligned prefix of `segments`.
    pub(crate) fn is_prefix_of(&self, segments: &[&str]) -> bool {
        segments.len() >= self.context_segments.len()
            && self
                .context_segments
                .iter()
                .zip(segments)
                .all(|(ctx, seg)| ctx == seg)
    }

    /// Whether the API serves requests for `host` (already normalized).
    pub(crate) fn accepts_host(&self, host: Option<&str>) -> bool {
        match (&self.vhost, host) {
            (None, _) => true,
            (Some(vhost), Some(host)) => vhost == host,
            (Some(_), None) => false,
        }
    }
}

/// Builder for an [`Api`].
#[derive(Debug)]
pub struct ApiBuilder {
    name: String,
    context: String,
    version: String,
    vhost: Option<String>,
    resources: Vec<Resource>,
}

impl ApiBuilder {
    fn new(name: impl Into<String>, context: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            version: version.into(),
            vhost: None,
            resources: Vec::new(),
        }
    }

    /// Bind the API to a virtual host. Matching ignores case and port.
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(normalize_host(&vhost.into()));
        self
    }

    /// Append a resource. Declaration order breaks specificity ties.
    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Append several resources.
    pub fn resources(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.resources.extend(resources);
        self
    }

    /// Build the API.
    pub fn build(self) -> Api {
        let context_segments: Vec<String> = split_path(&self.context)
            .into_iter()
            .map(str::to_owned)
            .collect();
        let context = format!("/{}", context_segments.join("/"));
        Api {
            name: self.name,
            context,
            context_segments,
            version: self.version,
            vhost: self.vhost,
            resources: self.resources.into_iter().map(Arc::new).collect(),
        }
    }
}

/// A method + path template bound to an ordered policy list.
#[derive(Debug, Clone)]
pub struct Resource {
    method: Method,
    template: PathTemplate,
    policies: Vec<PolicyRef>,
}

impl Resource {
    /// Create a resource with no policies (an open resource).
    pub fn new(method: Method, template: PathTemplate) -> Self {
        Self {
            method,
            template,
            policies: Vec::new(),
        }
    }

    /// Append a policy. Policies run in the order they are added.
    pub fn policy(mut self, name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(PolicyRef::new(name, policy));
        self
    }

    /// Append an already named policy reference.
    pub fn policy_ref(mut self, policy: PolicyRef) -> Self {
        self.policies.push(policy);
        self
    }

    /// HTTP method served by this resource.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path template relative to the API context.
    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    /// Ordered policy list.
    pub fn policies(&self) -> &[PolicyRef] {
        &self.policies
    }
}

/// One segment of a [`PathTemplate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches the segment exactly.
    Literal(String),
    /// `{name}`: matches one segment and captures it.
    Param(String),
    /// `*`: matches one segment.
    Wildcard,
    /// `**`: matches zero or more trailing segments.
    Rest,
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 3,
            Self::Param(_) | Self::Wildcard => 2,
            Self::Rest => 0,
        }
    }
}

/// A resource path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template such as `/users/{id}/orders`.
    ///
    /// # Example
    /// ```
    /// use gateway_authz::PathTemplate;
    ///
    /// let template = PathTemplate::parse("/users/{id}").unwrap();
    /// let params = template.matches(&["users", "42"]).unwrap();
    /// assert_eq!(params["id"], "42");
    ///
    /// assert!(PathTemplate::parse("/**/tail").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let parts = split_path(raw);
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = if *part == "**" {
                if index + 1 != parts.len() {
                    return Err(ConfigError::InvalidTemplate(
                        raw.to_string(),
                        "`**` is only allowed as the last segment".to_string(),
                    ));
                }
                Segment::Rest
            } else if *part == "*" {
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(ConfigError::InvalidTemplate(
                        raw.to_string(),
                        format!("invalid parameter segment `{part}`"),
                    ));
                }
                Segment::Param(name.to_string())
            } else if part.contains(['{', '}', '*']) {
                return Err(ConfigError::InvalidTemplate(
                    raw.to_string(),
                    format!("unsupported segment `{part}`"),
                ));
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Match path segments (context already stripped), returning captured params.
    pub fn matches(&self, path: &[&str]) -> Option<PathParams> {
        let mut params = PathParams::new();
        Self::match_parts(&self.segments, path, &mut params).then_some(params)
    }

    fn match_parts(template: &[Segment], path: &[&str], params: &mut PathParams) -> bool {
        let Some((first, rest)) = template.split_first() else {
            return path.is_empty();
        };
        if *first == Segment::Rest {
            return true;
        }
        let Some((segment, remaining)) = path.split_first() else {
            return false;
        };
        match first {
            Segment::Literal(literal) if literal != segment => return false,
            Segment::Param(name) => {
                params.insert(name.clone(), (*segment).to_string());
            }
            _ => {}
        }
        Self::match_parts(rest, remaining, params)
    }

    /// Ordering key used to pick the most specific of several matching templates.
    ///
    /// Segments compare literal > parameter/wildcard > `**`; a template that
    /// ends without `**` outranks one that continues with it.
    pub(crate) fn specificity(&self) -> Vec<u8> {
        let mut key: Vec<u8> = self.segments.iter().map(Segment::rank).collect();
        if self.segments.last() != Some(&Segment::Rest) {
            key.push(1);
        }
        key
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a request path into non-empty segments, dropping query and fragment.
pub fn split_path(path: &str) -> Vec<&str> {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].split('/').filter(|s| !s.is_empty()).collect()
}

/// Lowercase a host and strip any port.
pub fn normalize_host(authority: &str) -> String {
    let authority = authority.trim();
    let host = if authority.starts_with('[') {
        // [v6]:port
        authority
            .find(']')
            .map(|end| &authority[..=end])
            .unwrap_or(authority)
    } else {
        authority.split(':').next().unwrap_or(authority)
    };
    host.to_ascii_lowercase()
}
