//! TOML configuration for the API catalog.
//!
//! A configuration document declares named policies and the deployed APIs with
//! their resources. Resources refer to policies by name, in evaluation order.
//!
//! # Example TOML Format
//!
//! ```toml
//! [policies.internal_key]
//! type = "api_key"
//! header = "Internal-Key"
//! keys = ["secret"]
//! strip = true
//!
//! [policies.office_only]
//! type = "ip_filter"
//! allow = ["10.0.0.0/8", "192.168.1.5"]
//! # Trust X-Forwarded-For entries appended by one proxy in front of Envoy.
//! xff_trusted_hops = 1
//!
//! [policies.tag]
//! type = "headers"
//! set = { "x-gateway" = "edge" }
//! remove = ["cookie"]
//!
//! [policies.blocked]
//! type = "deny"
//! status = 410
//! message = "Retired"
//!
//! [[apis]]
//! name = "PhoneVerification"
//! context = "/soap/1.0.0"
//! version = "1.0.0"
//! vhost = "localhost"
//!
//! [[apis.resources]]
//! path = "/phoneverify"
//! method = "POST"
//! policies = ["internal_key", "tag"]
//! ```
//!
//! # Usage
//!
//! ## Compile-time embedded config
//!
//! ```ignore
//! use gateway_authz::Catalog;
//!
//! const CATALOG: &str = include_str!("../catalog.toml");
//!
//! let catalog = Catalog::from_toml(CATALOG).unwrap();
//! ```
//!
//! ## Runtime file loading
//!
//! ```ignore
//! use gateway_authz::{Catalog, TomlCatalogProvider};
//!
//! let catalog = Catalog::from_toml_file("config/catalog.toml").unwrap();
//!
//! // Redeploy later from the same file:
//! catalog.reload(&TomlCatalogProvider::new("config/catalog.toml")).unwrap();
//! ```
//!
//! Policies implemented in code are registered in a [`PolicyRegistry`] and
//! referenced from resources by the registered name.

use crate::api::{Api, PathTemplate, Resource};
use crate::catalog::{Catalog, CatalogProvider, CatalogSnapshot};
use crate::policies::{ApiKeyPolicy, DenyPolicy, HeaderPolicy, IpFilterPolicy, IpMatcher};
use crate::policy::{Policy, PolicyRegistry};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Named policy declarations.
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    /// Deployed APIs, in deployment order.
    #[serde(default)]
    pub apis: Vec<ApiConfig>,
}

/// A built-in policy declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Require one of `keys` in `header`.
    ApiKey {
        /// Header carrying the key.
        header: String,
        /// Accepted keys.
        keys: Vec<String>,
        /// Strip the key header before forwarding.
        #[serde(default)]
        strip: bool,
    },
    /// Add and strip headers on the forwarded request.
    Headers {
        /// Headers to set.
        #[serde(default)]
        set: BTreeMap<String, String>,
        /// Headers to strip.
        #[serde(default)]
        remove: Vec<String>,
    },
    /// Allow only matching client addresses.
    IpFilter {
        /// Addresses or CIDR networks.
        allow: Vec<String>,
        /// Read the client from `X-Forwarded-For`, skipping this many
        /// trusted proxy entries from the right. Unset: header ignored.
        #[serde(default)]
        xff_trusted_hops: Option<usize>,
    },
    /// Always deny.
    Deny {
        /// HTTP status, 400 to 599 (default: 403).
        #[serde(default = "default_deny_status")]
        status: u16,
        /// Response body.
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_deny_status() -> u16 {
    403
}

/// A deployed API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API name.
    pub name: String,
    /// Context path prefix.
    pub context: String,
    /// API version.
    pub version: String,
    /// Virtual host the API is bound to (optional).
    #[serde(default)]
    pub vhost: Option<String>,
    /// Resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// A resource of an API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Path template relative to the API context.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Policy names, in evaluation order.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Error type for configuration parsing and catalog construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File read error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Invalid resource path template.
    #[error("Invalid path template '{0}': {1}")]
    InvalidTemplate(String, String),

    /// Invalid HTTP method.
    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),

    /// Invalid header name or value.
    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    /// Invalid IP pattern.
    #[error("Invalid IP pattern '{0}': {1}")]
    InvalidIp(String, String),

    /// A resource refers to a policy that is neither declared nor registered.
    #[error("Resource '{resource}' refers to unknown policy '{policy}'")]
    UnknownPolicy {
        /// Method and path of the resource.
        resource: String,
        /// The unresolved policy name.
        policy: String,
    },

    /// Two APIs share the same context, version and virtual host.
    #[error("API with context '{context}' and version '{version}' is deployed twice")]
    DuplicateApi {
        /// Context path of the duplicate.
        context: String,
        /// Version of the duplicate.
        version: String,
    },
}

impl CatalogConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: CatalogConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Check everything that does not depend on code-registered policies.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in &self.policies {
            policy.build(name)?;
        }
        for (i, api) in self.apis.iter().enumerate() {
            if api.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("API {i}: name is empty")));
            }
            if api.version.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "API '{}': version is empty",
                    api.name
                )));
            }
            for resource in &api.resources {
                parse_method(&resource.method)?;
                PathTemplate::parse(&resource.path)?;
            }
        }
        Ok(())
    }

    /// Build a snapshot using only the declared policies.
    pub fn into_snapshot(self) -> Result<CatalogSnapshot, ConfigError> {
        self.into_snapshot_with(PolicyRegistry::new())
    }

    /// Build a snapshot; resources may also refer to policies in `registry`.
    ///
    /// A name both declared in configuration and registered in code is
    /// rejected.
    pub fn into_snapshot_with(self, mut registry: PolicyRegistry) -> Result<CatalogSnapshot, ConfigError> {
        for (name, policy) in &self.policies {
            if registry.contains(name) {
                return Err(ConfigError::Invalid(format!(
                    "policy '{name}' is both declared and registered"
                )));
            }
            registry.insert(name.clone(), policy.build(name)?);
        }

        let mut builder = CatalogSnapshot::builder();
        for api_config in self.apis {
            let mut api = Api::builder(api_config.name, api_config.context, api_config.version);
            if let Some(vhost) = api_config.vhost {
                api = api.vhost(vhost);
            }
            for resource_config in api_config.resources {
                api = api.resource(build_resource(resource_config, &registry)?);
            }
            builder = builder.add_api(api.build());
        }
        builder.build()
    }
}

impl PolicyConfig {
    /// Construct the declared policy.
    pub fn build(&self, name: &str) -> Result<Arc<dyn Policy>, ConfigError> {
        let policy: Arc<dyn Policy> = match self {
            PolicyConfig::ApiKey { header, keys, strip } => {
                if keys.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "policy '{name}': api_key needs at least one key"
                    )));
                }
                Arc::new(ApiKeyPolicy::new(parse_header_name(header)?, keys.iter().cloned()).strip(*strip))
            }
            PolicyConfig::Headers { set, remove } => {
                let mut policy = HeaderPolicy::new();
                for (header, value) in set {
                    let value = HeaderValue::from_str(value)
                        .map_err(|_| ConfigError::InvalidHeader(header.clone()))?;
                    policy = policy.set(parse_header_name(header)?, value);
                }
                for header in remove {
                    policy = policy.remove(parse_header_name(header)?);
                }
                Arc::new(policy)
            }
            PolicyConfig::IpFilter { allow, xff_trusted_hops } => {
                let mut policy = IpFilterPolicy::new(IpMatcher::parse_list(allow)?);
                if let Some(hops) = xff_trusted_hops {
                    policy = policy.trust_forwarded_for(*hops);
                }
                Arc::new(policy)
            }
            PolicyConfig::Deny { status, message } => {
                let status = StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "policy '{name}': deny status {status} is not a 4xx or 5xx code"
                        ))
                    })?;
                let mut policy = DenyPolicy::new(status);
                if let Some(message) = message {
                    policy = policy.with_body(message.clone());
                }
                Arc::new(policy)
            }
        };
        Ok(policy)
    }
}

fn build_resource(config: ResourceConfig, registry: &PolicyRegistry) -> Result<Resource, ConfigError> {
    let method = parse_method(&config.method)?;
    let mut resource = Resource::new(method, PathTemplate::parse(&config.path)?);
    for name in &config.policies {
        let policy = registry.resolve(name).ok_or_else(|| ConfigError::UnknownPolicy {
            resource: format!("{} {}", config.method, config.path),
            policy: name.clone(),
        })?;
        resource = resource.policy_ref(policy);
    }
    Ok(resource)
}

fn parse_method(method: &str) -> Result<Method, ConfigError> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ConfigError::InvalidMethod(method.to_string()))
}

fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| ConfigError::InvalidHeader(name.to_string()))
}

impl Catalog {
    /// Create a catalog from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(Catalog::new(CatalogConfig::from_toml(toml_str)?.into_snapshot()?))
    }

    /// Create a catalog from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Catalog::new(CatalogConfig::from_file(path)?.into_snapshot()?))
    }
}

/// Loads snapshots from a TOML file, re-reading it on every load.
#[derive(Debug, Clone)]
pub struct TomlCatalogProvider {
    path: PathBuf,
    registry: PolicyRegistry,
}

impl TomlCatalogProvider {
    /// Read from `path` with no code-registered policies.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            registry: PolicyRegistry::new(),
        }
    }

    /// Resolve policy names against `registry` as well.
    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// The file this provider reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogProvider for TomlCatalogProvider {
    type Error = ConfigError;

    fn load_catalog(&self) -> Result<CatalogSnapshot, Self::Error> {
        CatalogConfig::from_file(&self.path)?.into_snapshot_with(self.registry.clone())
    }
}
