//! The catalog of deployed APIs and the request matcher.
//!
//! A [`CatalogSnapshot`] is an immutable set of [`Api`]s. The [`Catalog`] holds
//! the current snapshot behind an atomically swapped pointer: lookups read it
//! without locking, and a redeploy replaces it wholesale, so every in-flight
//! request sees either the old or the new snapshot in full.
//!
//! ## Matching
//!
//! 1. **API**: the API whose context is the longest segment-aligned prefix of
//!    the request path wins. APIs bound to a virtual host only match requests
//!    for that host, and beat host-agnostic APIs with an equally long context.
//!    Remaining ties go to the API deployed first.
//! 2. **Resource**: within that API, resources whose template matches the rest
//!    of the path and whose method equals the request method are candidates.
//!    The most specific template wins (literal > parameter > `**`), then
//!    declaration order.

use crate::api::{normalize_host, split_path, Api, PathParams, Resource};
use crate::config::ConfigError;
use crate::error::NoMatch;
use arc_swap::ArcSwap;
use http::Method;
use std::collections::HashSet;
use std::sync::Arc;

/// The API and resource a request resolved to.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched API.
    pub api: Arc<Api>,
    /// The matched resource.
    pub resource: Arc<Resource>,
    /// Path parameters captured by the resource template.
    pub params: PathParams,
}

/// Resolves a request to a single API and resource.
///
/// Implementations must be deterministic, must not block, and must be safe to
/// call from many requests at once.
pub trait ApiLookup: Send + Sync {
    /// Find the API and resource for a request.
    fn lookup(
        &self,
        path: &str,
        method: &Method,
        authority: Option<&str>,
    ) -> Result<RouteMatch, NoMatch>;
}

impl<T: ApiLookup + ?Sized> ApiLookup for Arc<T> {
    fn lookup(
        &self,
        path: &str,
        method: &Method,
        authority: Option<&str>,
    ) -> Result<RouteMatch, NoMatch> {
        (**self).lookup(path, method, authority)
    }
}

/// An immutable set of deployed APIs.
///
/// # Example
/// ```
/// use gateway_authz::{Api, CatalogSnapshot, PathTemplate, Resource};
/// use http::Method;
///
/// let snapshot = CatalogSnapshot::builder()
///     .add_api(Api::builder("Pets", "/pets/v1", "v1")
///         .resource(Resource::new(Method::GET, PathTemplate::parse("/{id}").unwrap()))
///         .build())
///     .build()
///     .unwrap();
///
/// let route = snapshot.match_request("/pets/v1/7", &Method::GET, None).unwrap();
/// assert_eq!(route.api.name(), "Pets");
/// assert_eq!(route.params["id"], "7");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    apis: Vec<Arc<Api>>,
}

impl CatalogSnapshot {
    /// An empty snapshot: every lookup is a miss.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a builder.
    pub fn builder() -> CatalogSnapshotBuilder {
        CatalogSnapshotBuilder::new()
    }

    /// Deployed APIs in deployment order.
    pub fn apis(&self) -> &[Arc<Api>] {
        &self.apis
    }

    /// Find an API by its `(context, version)` identity.
    pub fn find_api(&self, context: &str, version: &str) -> Option<&Arc<Api>> {
        let context = format!("/{}", split_path(context).join("/"));
        self.apis
            .iter()
            .find(|api| api.context() == context && api.version() == version)
    }

    /// Resolve a request to an API and resource.
    pub fn match_request(
        &self,
        path: &str,
        method: &Method,
        authority: Option<&str>,
    ) -> Result<RouteMatch, NoMatch> {
        let segments = split_path(path);
        let host = authority.map(normalize_host);

        let api = self.select_api(&segments, host.as_deref()).ok_or(NoMatch::NoApi)?;
        let remaining = &segments[api.context_len()..];

        let mut path_matched = false;
        let mut best: Option<(&Arc<Resource>, PathParams, Vec<u8>)> = None;
        for resource in api.resources() {
            let Some(params) = resource.template().matches(remaining) else {
                continue;
            };
            path_matched = true;
            if resource.method() != method {
                continue;
            }
            let specificity = resource.template().specificity();
            let better = match &best {
                Some((_, _, current)) => specificity > *current,
                None => true,
            };
            if better {
                best = Some((resource, params, specificity));
            }
        }

        match best {
            Some((resource, params, _)) => {
                tracing::debug!(
                    path = path,
                    method = %method,
                    api = api.name(),
                    context = api.context(),
                    template = %resource.template(),
                    "Catalog match"
                );
                Ok(RouteMatch {
                    api: api.clone(),
                    resource: resource.clone(),
                    params,
                })
            }
            None if path_matched => Err(NoMatch::MethodNotAllowed {
                api: api.name().to_string(),
                method: method.to_string(),
            }),
            None => Err(NoMatch::NoResource {
                api: api.name().to_string(),
            }),
        }
    }

    fn select_api(&self, segments: &[&str], host: Option<&str>) -> Option<&Arc<Api>> {
        let mut best: Option<&Arc<Api>> = None;
        for api in &self.apis {
            if !api.accepts_host(host) || !api.is_prefix_of(segments) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => {
                    api.context_len() > current.context_len()
                        || (api.context_len() == current.context_len()
                            && api.vhost().is_some()
                            && current.vhost().is_none())
                }
            };
            if better {
                best = Some(api);
            }
        }
        best
    }
}

impl ApiLookup for CatalogSnapshot {
    fn lookup(
        &self,
        path: &str,
        method: &Method,
        authority: Option<&str>,
    ) -> Result<RouteMatch, NoMatch> {
        self.match_request(path, method, authority)
    }
}

/// Builder for a [`CatalogSnapshot`].
#[derive(Debug, Default)]
pub struct CatalogSnapshotBuilder {
    apis: Vec<Api>,
}

impl CatalogSnapshotBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy an API.
    pub fn add_api(mut self, api: Api) -> Self {
        self.apis.push(api);
        self
    }

    /// Build the snapshot.
    ///
    /// Fails if two APIs share the same `(context, version, vhost)`.
    pub fn build(self) -> Result<CatalogSnapshot, ConfigError> {
        let mut seen = HashSet::new();
        for api in &self.apis {
            let key = (api.context().to_string(), api.version().to_string(), api.vhost().map(str::to_string));
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateApi {
                    context: api.context().to_string(),
                    version: api.version().to_string(),
                });
            }
        }
        Ok(CatalogSnapshot {
            apis: self.apis.into_iter().map(Arc::new).collect(),
        })
    }

    /// Build the snapshot wrapped in a [`Catalog`].
    pub fn build_catalog(self) -> Result<Catalog, ConfigError> {
        Ok(Catalog::new(self.build()?))
    }
}

/// The live catalog: the current snapshot, replaceable at deploy time.
#[derive(Debug)]
pub struct Catalog {
    current: ArcSwap<CatalogSnapshot>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(CatalogSnapshot::empty())
    }
}

impl Catalog {
    /// Create a catalog serving `snapshot`.
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// The snapshot currently served.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    /// Atomically replace the served snapshot.
    pub fn replace(&self, snapshot: CatalogSnapshot) {
        let apis = snapshot.apis().len();
        self.current.store(Arc::new(snapshot));
        tracing::info!(apis = apis, "Catalog snapshot replaced");
    }

    /// Load a snapshot from `provider` and serve it.
    ///
    /// On failure the current snapshot stays in place.
    pub fn reload<P: CatalogProvider>(&self, provider: &P) -> Result<(), P::Error> {
        match provider.load_catalog() {
            Ok(snapshot) => {
                self.replace(snapshot);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Catalog reload failed, keeping current snapshot");
                Err(err)
            }
        }
    }
}

impl ApiLookup for Catalog {
    fn lookup(
        &self,
        path: &str,
        method: &Method,
        authority: Option<&str>,
    ) -> Result<RouteMatch, NoMatch> {
        self.current.load().match_request(path, method, authority)
    }
}

/// Source of catalog snapshots, e.g. a config file or a control plane.
///
/// # Example
/// ```
/// use gateway_authz::{Api, CatalogProvider, CatalogSnapshot};
///
/// struct SingleApi;
///
/// impl CatalogProvider for SingleApi {
///     type Error = gateway_authz::ConfigError;
///
///     fn load_catalog(&self) -> Result<CatalogSnapshot, Self::Error> {
///         CatalogSnapshot::builder()
///             .add_api(Api::builder("Health", "/health", "v1").build())
///             .build()
///     }
/// }
/// ```
pub trait CatalogProvider: Send + Sync {
    /// Error type for load failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load a complete snapshot.
    fn load_catalog(&self) -> Result<CatalogSnapshot, Self::Error>;
}

/// A provider that always returns the same snapshot.
#[derive(Debug, Clone)]
pub struct StaticCatalogProvider {
    snapshot: CatalogSnapshot,
}

impl StaticCatalogProvider {
    /// Create a new static provider.
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }
}

impl CatalogProvider for StaticCatalogProvider {
    type Error = std::convert::Infallible;

    fn load_catalog(&self) -> Result<CatalogSnapshot, Self::Error> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PathTemplate;

    fn resource(method: Method, template: &str) -> Resource {
        Resource::new(method, PathTemplate::parse(template).unwrap())
    }

    fn soap_api() -> Api {
        Api::builder("PhoneVerification", "/soap/1.0.0", "1.0.0")
            .resource(resource(Method::POST, "/phoneverify"))
            .build()
    }

    #[test]
    fn test_match_single_resource() {
        let snapshot = CatalogSnapshot::builder().add_api(soap_api()).build().unwrap();

        let route = snapshot
            .match_request("/soap/1.0.0/phoneverify", &Method::POST, None)
            .unwrap();
        assert_eq!(route.api.name(), "PhoneVerification");
        assert_eq!(route.resource.template().as_str(), "/phoneverify");
    }

    #[test]
    fn test_no_match_reasons() {
        let snapshot = CatalogSnapshot::builder().add_api(soap_api()).build().unwrap();

        assert_eq!(
            snapshot.match_request("/unknown/path", &Method::GET, None).unwrap_err(),
            NoMatch::NoApi
        );
        assert!(matches!(
            snapshot.match_request("/soap/1.0.0/other", &Method::POST, None),
            Err(NoMatch::NoResource { .. })
        ));
        assert!(matches!(
            snapshot.match_request("/soap/1.0.0/phoneverify", &Method::GET, None),
            Err(NoMatch::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let snapshot = CatalogSnapshot::builder()
            .add_api(
                Api::builder("Shop", "/shop", "v1")
                    .resource(resource(Method::GET, "/**"))
                    .build(),
            )
            .add_api(
                Api::builder("ShopOrders", "/shop/orders", "v1")
                    .resource(resource(Method::GET, "/{id}"))
                    .build(),
            )
            .build()
            .unwrap();

        let route = snapshot.match_request("/shop/orders/17", &Method::GET, None).unwrap();
        assert_eq!(route.api.name(), "ShopOrders");
        assert_eq!(route.params["id"], "17");

        let route = snapshot.match_request("/shop/cart", &Method::GET, None).unwrap();
        assert_eq!(route.api.name(), "Shop");
    }

    #[test]
    fn test_longest_prefix_does_not_fall_back() {
        let snapshot = CatalogSnapshot::builder()
            .add_api(
                Api::builder("Shop", "/shop", "v1")
                    .resource(resource(Method::GET, "/**"))
                    .build(),
            )
            .add_api(
                Api::builder("ShopOrders", "/shop/orders", "v1")
                    .resource(resource(Method::GET, "/{id}"))
                    .build(),
            )
            .build()
            .unwrap();

        assert!(matches!(
            snapshot.match_request("/shop/orders/17/items", &Method::GET, None),
            Err(NoMatch::NoResource { .. })
        ));
    }

    #[test]
    fn test_prefix_is_segment_aligned() {
        let snapshot = CatalogSnapshot::builder().add_api(soap_api()).build().unwrap();
        assert_eq!(
            snapshot
                .match_request("/soap/1.0.0x/phoneverify", &Method::POST, None)
                .unwrap_err(),
            NoMatch::NoApi
        );
    }

    #[test]
    fn test_most_specific_resource_wins() {
        let api = Api::builder("Users", "/users", "v1")
            .resource(resource(Method::GET, "/**"))
            .resource(resource(Method::GET, "/{id}"))
            .resource(resource(Method::GET, "/me"))
            .build();
        let snapshot = CatalogSnapshot::builder().add_api(api).build().unwrap();

        let route = snapshot.match_request("/users/me", &Method::GET, None).unwrap();
        assert_eq!(route.resource.template().as_str(), "/me");
        assert!(route.params.is_empty());

        let route = snapshot.match_request("/users/42", &Method::GET, None).unwrap();
        assert_eq!(route.resource.template().as_str(), "/{id}");

        let route = snapshot.match_request("/users/42/roles", &Method::GET, None).unwrap();
        assert_eq!(route.resource.template().as_str(), "/**");
    }

    #[test]
    fn test_method_selects_between_resources() {
        let api = Api::builder("Users", "/users", "v1")
            .resource(resource(Method::GET, "/{id}"))
            .resource(resource(Method::DELETE, "/{id}"))
            .build();
        let snapshot = CatalogSnapshot::builder().add_api(api).build().unwrap();

        let route = snapshot.match_request("/users/1", &Method::DELETE, None).unwrap();
        assert_eq!(*route.resource.method(), Method::DELETE);
    }

    #[test]
    fn test_vhost_preferred_over_default() {
        let snapshot = CatalogSnapshot::builder()
            .add_api(
                Api::builder("Default", "/pets", "v1")
                    .resource(resource(Method::GET, "/**"))
                    .build(),
            )
            .add_api(
                Api::builder("Tenant", "/pets", "v1")
                    .vhost("tenant.example.com")
                    .resource(resource(Method::GET, "/**"))
                    .build(),
            )
            .build()
            .unwrap();

        let route = snapshot
            .match_request("/pets/1", &Method::GET, Some("Tenant.example.com:443"))
            .unwrap();
        assert_eq!(route.api.name(), "Tenant");

        let route = snapshot
            .match_request("/pets/1", &Method::GET, Some("other.example.com"))
            .unwrap();
        assert_eq!(route.api.name(), "Default");

        let route = snapshot.match_request("/pets/1", &Method::GET, None).unwrap();
        assert_eq!(route.api.name(), "Default");
    }

    #[test]
    fn test_root_context() {
        let snapshot = CatalogSnapshot::builder()
            .add_api(
                Api::builder("Root", "/", "v1")
                    .resource(resource(Method::GET, "/health"))
                    .build(),
            )
            .build()
            .unwrap();
        assert!(snapshot.match_request("/health?probe=1", &Method::GET, None).is_ok());
    }

    #[test]
    fn test_match_is_deterministic() {
        let snapshot = CatalogSnapshot::builder()
            .add_api(soap_api())
            .add_api(
                Api::builder("Users", "/users", "v1")
                    .resource(resource(Method::GET, "/{id}"))
                    .resource(resource(Method::GET, "/*"))
                    .build(),
            )
            .build()
            .unwrap();

        let first = snapshot.match_request("/users/9", &Method::GET, None).unwrap();
        for _ in 0..100 {
            let again = snapshot.match_request("/users/9", &Method::GET, None).unwrap();
            assert!(Arc::ptr_eq(&first.api, &again.api));
            assert!(Arc::ptr_eq(&first.resource, &again.resource));
            assert_eq!(first.params, again.params);
        }
        assert_eq!(first.resource.template().as_str(), "/{id}");
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let result = CatalogSnapshot::builder()
            .add_api(soap_api())
            .add_api(soap_api())
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateApi { .. })));
    }

    #[test]
    fn test_find_api() {
        let snapshot = CatalogSnapshot::builder().add_api(soap_api()).build().unwrap();
        assert!(snapshot.find_api("/soap/1.0.0/", "1.0.0").is_some());
        assert!(snapshot.find_api("/soap/1.0.0", "2.0.0").is_none());
    }

    #[test]
    fn test_catalog_replace_is_atomic_for_readers() {
        let catalog = Catalog::new(CatalogSnapshot::builder().add_api(soap_api()).build().unwrap());
        let before = catalog.snapshot();

        catalog.replace(CatalogSnapshot::empty());

        // A reader holding the old snapshot keeps seeing it in full.
        assert!(before
            .match_request("/soap/1.0.0/phoneverify", &Method::POST, None)
            .is_ok());
        assert_eq!(
            catalog
                .lookup("/soap/1.0.0/phoneverify", &Method::POST, None)
                .unwrap_err(),
            NoMatch::NoApi
        );
    }

    #[test]
    fn test_catalog_reload_from_provider() {
        let catalog = Catalog::default();
        let provider =
            StaticCatalogProvider::new(CatalogSnapshot::builder().add_api(soap_api()).build().unwrap());

        catalog.reload(&provider).unwrap();
        assert_eq!(catalog.snapshot().apis().len(), 1);
    }
}
