//! Catalogs declared in TOML, including redeploys.

use gateway_authz::{
    Catalog, CatalogConfig, CheckRequest, DenyResponse, Policy, PolicyError, PolicyOutcome,
    PolicyRegistry, PolicyState, RequestContext, RequestHandler, StaticCatalogProvider,
};
use async_trait::async_trait;
use gateway_authz::policies::HeaderPolicy;
use gateway_authz::{Api, CatalogSnapshot, PathTemplate, Resource};
use http::{HeaderName, HeaderValue, Method};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CATALOG: &str = r#"
[policies.internal_key]
type = "api_key"
header = "Internal-Key"
keys = ["secret"]
strip = true

[policies.tag]
type = "headers"
set = { "x-api-name" = "Orders", "x-tier" = "basic" }

[policies.gold]
type = "headers"
set = { "x-tier" = "gold" }

[policies.office]
type = "ip_filter"
allow = ["10.0.0.0/8"]

[policies.retired]
type = "deny"
status = 410
message = "This resource has been retired"

[[apis]]
name = "Orders"
context = "/orders/v1"
version = "v1"

[[apis.resources]]
path = "/{id}"
method = "GET"
policies = ["internal_key", "tag", "gold"]

[[apis.resources]]
path = "/export"
method = "GET"
policies = ["office"]

[[apis.resources]]
path = "/legacy/**"
method = "GET"
policies = ["retired"]

[[apis]]
name = "OrdersAdmin"
context = "/orders/v1/admin"
version = "v1"

[[apis.resources]]
path = "/**"
method = "GET"
policies = ["tenant"]

[[apis]]
name = "OrdersInternal"
context = "/orders/v1"
version = "v1"
vhost = "internal.example.com"

[[apis.resources]]
path = "/{id}"
method = "GET"
"#;

struct RequireTenant;

#[async_trait]
impl Policy for RequireTenant {
    async fn apply(
        &self,
        ctx: &RequestContext,
        _state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        match ctx.header("x-tenant") {
            Some(_) => Ok(PolicyOutcome::proceed()),
            None => Ok(PolicyOutcome::Deny(DenyResponse::forbidden())),
        }
    }
}

fn handler() -> RequestHandler {
    let registry = PolicyRegistry::new().register("tenant", Arc::new(RequireTenant));
    let snapshot = CatalogConfig::from_toml(CATALOG)
        .unwrap()
        .into_snapshot_with(registry)
        .unwrap();
    RequestHandler::new(Arc::new(Catalog::new(snapshot)))
}

#[tokio::test]
async fn header_mutations_follow_policy_order() {
    let request = CheckRequest::http("GET", "/orders/v1/42").with_header("internal-key", "secret");

    let response = handler().process(&request).await;

    assert!(response.is_allowed());
    assert_eq!(response.header("x-api-name"), Some("Orders"));
    assert_eq!(response.header("x-tier"), Some("gold"));
    let gateway_authz::wire::HttpResponse::OkResponse(ok) = &response.http_response else {
        panic!("expected ok response");
    };
    assert_eq!(ok.headers_to_remove, vec!["internal-key".to_string()]);
}

#[tokio::test]
async fn literal_resource_beats_parameter() {
    // `/export` must not be captured by `/{id}` and its key policy.
    let from_office = CheckRequest::http("GET", "/orders/v1/export").with_source("10.2.3.4", 5000);
    assert!(handler().process(&from_office).await.is_allowed());

    let from_outside = CheckRequest::http("GET", "/orders/v1/export").with_source("203.0.113.9", 5000);
    assert_eq!(handler().process(&from_outside).await.denied_status(), Some(403));
}

#[tokio::test]
async fn forwarded_for_cannot_spoof_the_client_address() {
    let spoofed = CheckRequest::http("GET", "/orders/v1/export")
        .with_source("203.0.113.9", 5000)
        .with_header("x-envoy-external-address", "203.0.113.9")
        .with_header("x-forwarded-for", "10.0.0.1, 203.0.113.9");

    assert_eq!(handler().process(&spoofed).await.denied_status(), Some(403));
}

#[tokio::test]
async fn deny_policy_rejects_success_status() {
    let toml = CATALOG.replace("status = 410", "status = 200");
    assert!(CatalogConfig::from_toml(&toml).is_err());
}

#[tokio::test]
async fn blocked_resource_returns_configured_status() {
    let response = handler()
        .process(&CheckRequest::http("GET", "/orders/v1/legacy/a/b"))
        .await;
    assert_eq!(response.denied_status(), Some(410));
}

#[tokio::test]
async fn longest_context_wins_without_fallback() {
    let handler = handler();

    let tenant = CheckRequest::http("GET", "/orders/v1/admin/reports").with_header("x-tenant", "acme");
    assert!(handler.process(&tenant).await.is_allowed());

    // `/orders/v1/admin` is the longest prefix; `/orders/v1/{id}` is never consulted.
    let no_tenant = CheckRequest::http("GET", "/orders/v1/admin").with_header("internal-key", "secret");
    assert_eq!(handler.process(&no_tenant).await.denied_status(), Some(403));
}

#[tokio::test]
async fn vhost_api_takes_precedence_for_its_host() {
    let handler = handler();

    let internal = CheckRequest::http("GET", "/orders/v1/42").with_host("Internal.Example.com:443");
    assert!(handler.process(&internal).await.is_allowed());

    let public = CheckRequest::http("GET", "/orders/v1/42").with_host("api.example.com");
    assert_eq!(handler.process(&public).await.denied_status(), Some(401));
}

#[tokio::test]
async fn redeploy_replaces_whole_catalog() {
    let catalog = Arc::new(Catalog::default());
    let handler = RequestHandler::new(catalog.clone());
    let request = CheckRequest::http("GET", "/orders/v1/legacy/x");
    assert_eq!(handler.process(&request).await.denied_status(), Some(404));

    let registry = PolicyRegistry::new().register("tenant", Arc::new(RequireTenant));
    let next = CatalogConfig::from_toml(CATALOG)
        .unwrap()
        .into_snapshot_with(registry)
        .unwrap();
    catalog.reload(&StaticCatalogProvider::new(next)).unwrap();

    assert_eq!(handler.process(&request).await.denied_status(), Some(410));
}

/// A catalog stamped with `tag` in the API name and in two header policies
/// on the same resource.
fn generation(tag: &'static str) -> CatalogSnapshot {
    let stamp = |name: &'static str| {
        Arc::new(HeaderPolicy::new().set(
            HeaderName::from_static(name),
            HeaderValue::from_static(tag),
        ))
    };
    CatalogSnapshot::builder()
        .add_api(
            Api::builder(tag, "/stock", "v1")
                .resource(
                    Resource::new(Method::GET, PathTemplate::parse("/{item}").unwrap())
                        .policy("first", stamp("x-generation"))
                        .policy("second", stamp("x-generation-confirm")),
                )
                .build(),
        )
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checks_during_redeploy_see_one_whole_catalog() {
    let catalog = Arc::new(Catalog::new(generation("blue")));
    let handler = RequestHandler::new(catalog.clone());
    let done = Arc::new(AtomicBool::new(false));

    let deployer = {
        let catalog = catalog.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut flip = false;
            while !done.load(Ordering::SeqCst) {
                catalog.replace(generation(if flip { "blue" } else { "green" }));
                flip = !flip;
                tokio::task::yield_now().await;
            }
        })
    };

    let checkers: Vec<_> = (0..8)
        .map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move {
                let request = CheckRequest::http("GET", "/stock/v1/widget");
                for _ in 0..200 {
                    let response = handler.process(&request).await;
                    assert!(response.is_allowed());
                    let first = response.header("x-generation").map(str::to_owned);
                    let second = response.header("x-generation-confirm").map(str::to_owned);
                    assert!(matches!(first.as_deref(), Some("blue") | Some("green")));
                    assert_eq!(first, second);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for checker in checkers {
        checker.await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    deployer.await.unwrap();
}
