//! Envoy's HTTP authorization service mode.
//!
//! In this mode the proxy forwards each request's method, path and selected
//! headers to the authorization server as a plain HTTP request. A `200`
//! answer allows the original request, with the answer's headers copied
//! upstream; any other status denies it and is returned to the client as is.
//! Headers to strip are listed in `x-envoy-auth-headers-to-remove`.

use crate::attributes::RequestAttributes;
use crate::catalog::ApiLookup;
use crate::decision::ResponseDecision;
use crate::handler::RequestHandler;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{HeaderName, HeaderValue, StatusCode};

/// Response header naming the headers to strip from the upstream request.
pub const HEADERS_TO_REMOVE: HeaderName = HeaderName::from_static("x-envoy-auth-headers-to-remove");

/// A router answering every request as an authorization check.
///
/// # Example
/// ```no_run
/// use gateway_authz::{http_service, Catalog, RequestHandler};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let catalog = Catalog::from_toml_file("catalog.toml").unwrap();
///     let app = http_service::router(RequestHandler::new(Arc::new(catalog)));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:9191").await.unwrap();
///     axum::serve(listener, app).await.unwrap();
/// }
/// ```
pub fn router<L: ApiLookup + 'static>(handler: RequestHandler<L>) -> Router {
    Router::new().fallback(check::<L>).with_state(handler)
}

async fn check<L: ApiLookup + 'static>(
    State(handler): State<RequestHandler<L>>,
    request: Request,
) -> Response {
    let attributes = RequestAttributes::from_http_request(&request);
    match handler.decide(&attributes).await {
        ResponseDecision::Allow(mutations) => {
            let mut headers = mutations.headers_to_set().clone();
            if !mutations.headers_to_remove().is_empty() {
                let names = mutations
                    .headers_to_remove()
                    .iter()
                    .map(HeaderName::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                // Header names are always valid header values.
                if let Ok(value) = HeaderValue::from_str(&names) {
                    headers.insert(HEADERS_TO_REMOVE, value);
                }
            }
            (StatusCode::OK, headers).into_response()
        }
        ResponseDecision::Deny(response) => response.into_response(),
    }
}
