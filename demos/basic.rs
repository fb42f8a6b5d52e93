//! In-process authorization with `AuthzLayer` in front of axum handlers.
//!
//! Run with: `cargo run --example basic`
//!
//! Test with:
//! ```sh
//! # Order lookup with key (allowed; the handler never sees the key header)
//! curl -H "Internal-Key: secret" http://localhost:3000/orders/v1/42
//!
//! # Order lookup without key (401)
//! curl -v http://localhost:3000/orders/v1/42
//!
//! # Health check (no policies, allowed)
//! curl http://localhost:3000/health/v1/ping
//!
//! # Not in the catalog (404)
//! curl -v http://localhost:3000/admin
//! ```

use axum::{extract::Path, http::HeaderMap, routing::get, Router};
use gateway_authz::policies::{ApiKeyPolicy, HeaderPolicy};
use gateway_authz::{Api, AuthzLayer, CatalogSnapshot, PathTemplate, Resource};
use http::{HeaderName, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn order(Path(id): Path<String>, headers: HeaderMap) -> String {
    format!(
        "Order {id} (api: {}, key forwarded: {})",
        headers
            .get("x-api-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        headers.contains_key("internal-key")
    )
}

async fn ping() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_authz=debug,basic=debug".into()),
        )
        .init();

    let key = ApiKeyPolicy::new(HeaderName::from_static("internal-key"), ["secret"]).strip(true);
    let tag = HeaderPolicy::new().set(
        HeaderName::from_static("x-api-name"),
        HeaderValue::from_static("Orders"),
    );

    let catalog = CatalogSnapshot::builder()
        .add_api(
            Api::builder("Orders", "/orders/v1", "v1")
                .resource(
                    Resource::new(Method::GET, PathTemplate::parse("/{id}").unwrap())
                        .policy("internal_key", Arc::new(key))
                        .policy("tag", Arc::new(tag)),
                )
                .build(),
        )
        .add_api(
            Api::builder("Health", "/health/v1", "v1")
                .resource(Resource::new(Method::GET, PathTemplate::parse("/ping").unwrap()))
                .build(),
        )
        .build_catalog()
        .expect("Failed to build catalog");

    tracing::info!("Catalog configured: {} APIs", catalog.snapshot().apis().len());

    let app = Router::new()
        .route("/orders/v1/{id}", get(order))
        .route("/health/v1/ping", get(ping))
        .layer(AuthzLayer::new(Arc::new(catalog)));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
