//! # gateway-authz
//!
//! Request matching and decision pipeline for an external-authorization
//! backend sitting behind a reverse proxy such as Envoy.
//!
//! For every check call the proxy makes, the crate:
//! 1. **Extracts** the request attributes (path, method, authority, headers),
//! 2. **Matches** them against a catalog of deployed APIs and their resources,
//! 3. **Evaluates** the resource's policies in order, stopping at the first deny,
//! 4. **Translates** the decision into an allow (with header mutations) or a
//!    deny (with status, headers and body) for the proxy.
//!
//! ## Features
//!
//! - **Longest-prefix API matching** on segment boundaries, with optional virtual hosts
//! - **Path templates** with `{param}`, `*` and trailing `**` segments
//! - **Pluggable policies** behind one async [`Policy`] trait
//! - **Fail-closed pipeline**: errors, panics and timeouts deny with 500
//! - **Lock-free catalog reads** with atomic whole-catalog redeploys
//! - **TOML configuration** with built-in API key, header, IP filter and deny policies
//! - **Transports**: Envoy check messages, Envoy's HTTP service mode, or an axum layer
//!
//! ## Quick Start
//!
//! ```
//! use gateway_authz::{Catalog, CheckRequest, RequestHandler};
//! use std::sync::Arc;
//!
//! const CATALOG: &str = r#"
//! [policies.internal_key]
//! type = "api_key"
//! header = "Internal-Key"
//! keys = ["secret"]
//!
//! [[apis]]
//! name = "PhoneVerification"
//! context = "/soap/1.0.0"
//! version = "1.0.0"
//!
//! [[apis.resources]]
//! path = "/phoneverify"
//! method = "POST"
//! policies = ["internal_key"]
//! "#;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handler = RequestHandler::new(Arc::new(Catalog::from_toml(CATALOG).unwrap()));
//!
//! let allowed = CheckRequest::http("POST", "/soap/1.0.0/phoneverify")
//!     .with_header("internal-key", "secret");
//! assert!(handler.process(&allowed).await.is_allowed());
//!
//! let denied = CheckRequest::http("POST", "/soap/1.0.0/phoneverify");
//! assert_eq!(handler.process(&denied).await.denied_status(), Some(401));
//! # }
//! ```
//!
//! ## Matching
//!
//! - The API whose context is the longest segment-aligned prefix of the path
//!   is selected; `/soap/1.0.0` matches `/soap/1.0.0/x` but not `/soap/1.0.0x`.
//! - Within that API, the resource whose template matches the remaining path
//!   and whose method equals the request method is selected. Several matching
//!   templates resolve to the most specific one.
//! - A request that resolves to no resource is denied with 404. The matcher
//!   never falls back to a shorter API context.
//!
//! ## Custom Policies
//!
//! ```
//! use async_trait::async_trait;
//! use gateway_authz::{
//!     HeaderMutations, Policy, PolicyError, PolicyOutcome, PolicyState, RequestContext,
//! };
//! use http::{HeaderName, HeaderValue};
//!
//! /// Forwards the `{id}` path parameter as a header.
//! struct ForwardId;
//!
//! #[async_trait]
//! impl Policy for ForwardId {
//!     async fn apply(
//!         &self,
//!         ctx: &RequestContext,
//!         _state: &PolicyState,
//!     ) -> Result<PolicyOutcome, PolicyError> {
//!         let Some(id) = ctx.param("id") else {
//!             return Ok(PolicyOutcome::proceed());
//!         };
//!         Ok(PolicyOutcome::Continue(HeaderMutations::new().set(
//!             HeaderName::from_static("x-resource-id"),
//!             HeaderValue::from_str(id)?,
//!         )))
//!     }
//! }
//! ```
//!
//! Register such policies in a [`PolicyRegistry`] and pass it to
//! [`CatalogConfig::into_snapshot_with`] to refer to them from TOML.
//!
//! ## Redeploying
//!
//! ```
//! use gateway_authz::{Api, Catalog, CatalogSnapshot};
//!
//! let catalog = Catalog::default();
//! let next = CatalogSnapshot::builder()
//!     .add_api(Api::builder("Health", "/health", "v1").build())
//!     .build()
//!     .unwrap();
//! catalog.replace(next);
//! assert_eq!(catalog.snapshot().apis().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod api;
mod attributes;
mod catalog;
mod config;
mod context;
mod decision;
mod error;
mod handler;
pub mod http_service;
mod layer;
mod pipeline;
pub mod policies;
mod policy;
mod translate;
pub mod wire;

// Re-export main types
pub use api::{normalize_host, split_path, Api, ApiBuilder, PathParams, PathTemplate, Resource, Segment};
pub use attributes::RequestAttributes;
pub use catalog::{
    ApiLookup, Catalog, CatalogProvider, CatalogSnapshot, CatalogSnapshotBuilder, RouteMatch,
    StaticCatalogProvider,
};
pub use config::{ApiConfig, CatalogConfig, ConfigError, PolicyConfig, ResourceConfig, TomlCatalogProvider};
pub use context::RequestContext;
pub use decision::{DenyResponse, HeaderMutations, ResponseDecision};
pub use error::{AttributeError, NoMatch, PolicyError};
pub use handler::RequestHandler;
pub use layer::{AuthzLayer, AuthzMiddleware};
pub use pipeline::Pipeline;
pub use policy::{Policy, PolicyOutcome, PolicyRef, PolicyRegistry, PolicyState};
pub use translate::translate;
pub use wire::{CheckRequest, CheckResponse};

/// Prelude module for convenient imports.
///
/// ```
/// use gateway_authz::prelude::*;
/// ```
pub mod prelude {
    pub use crate::catalog::{ApiLookup, Catalog, CatalogSnapshot};
    pub use crate::config::ConfigError;
    pub use crate::context::RequestContext;
    pub use crate::decision::{DenyResponse, HeaderMutations, ResponseDecision};
    pub use crate::error::PolicyError;
    pub use crate::handler::RequestHandler;
    pub use crate::layer::AuthzLayer;
    pub use crate::policy::{Policy, PolicyOutcome, PolicyState};
    pub use crate::wire::{CheckRequest, CheckResponse};
}
