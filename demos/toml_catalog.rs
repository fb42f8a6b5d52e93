//! Envoy HTTP authorization service backed by a TOML catalog.
//!
//! Point Envoy's `ext_authz` filter (HTTP service mode) at this server.
//!
//! Run with: `cargo run --example toml_catalog`
//!
//! Test checks (what Envoy would send):
//! ```sh
//! # Valid key (200, internal-key listed in x-envoy-auth-headers-to-remove)
//! curl -v -X POST -H "Internal-Key: phone-secret" http://localhost:9191/soap/1.0.0/phoneverify
//!
//! # Missing key (401 with WWW-Authenticate)
//! curl -v -X POST http://localhost:9191/soap/1.0.0/phoneverify
//!
//! # Office-only resource from localhost (403)
//! curl -v http://localhost:9191/soap/1.0.0/reports
//!
//! # Retired resource (410)
//! curl -v http://localhost:9191/soap/1.0.0/legacy/lookup
//!
//! # Unknown path (404)
//! curl -v http://localhost:9191/unknown
//! ```

use gateway_authz::{http_service, Catalog, RequestHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG: &str = r#"
[policies.internal_key]
type = "api_key"
header = "Internal-Key"
keys = ["phone-secret"]
strip = true

[policies.tag]
type = "headers"
set = { "x-api-name" = "PhoneVerification" }

[policies.office]
type = "ip_filter"
allow = ["10.0.0.0/8"]

[policies.retired]
type = "deny"
status = 410
message = "This resource has been retired"

[[apis]]
name = "PhoneVerification"
context = "/soap/1.0.0"
version = "1.0.0"

[[apis.resources]]
path = "/phoneverify"
method = "POST"
policies = ["internal_key", "tag"]

[[apis.resources]]
path = "/reports"
method = "GET"
policies = ["office"]

[[apis.resources]]
path = "/legacy/**"
method = "GET"
policies = ["retired"]
"#;

// Alternative: load from a file at runtime, and redeploy with
// `catalog.reload(&TomlCatalogProvider::new("catalog.toml"))`.
// let catalog = Catalog::from_toml_file("catalog.toml")
//     .expect("Failed to load catalog file");

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_authz=debug,toml_catalog=info".into()),
        )
        .init();

    let catalog = Catalog::from_toml(CATALOG).expect("Failed to parse embedded catalog");
    for api in catalog.snapshot().apis() {
        tracing::info!(
            "Deployed {} {} at {} ({} resources)",
            api.name(),
            api.version(),
            api.context(),
            api.resources().len()
        );
    }

    let app = http_service::router(RequestHandler::new(Arc::new(catalog)));

    let addr = SocketAddr::from(([127, 0, 0, 1], 9191));
    tracing::info!("Authorization service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
