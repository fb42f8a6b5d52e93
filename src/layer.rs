//! In-process authorization middleware for axum.
//!
//! [`AuthzLayer`] runs the decision core in front of an axum service instead
//! of behind a proxy's check call. Allowed requests are forwarded with the
//! header mutations applied; denied requests are answered directly.

use crate::attributes::RequestAttributes;
use crate::catalog::{ApiLookup, Catalog};
use crate::decision::ResponseDecision;
use crate::handler::RequestHandler;
use crate::pipeline::Pipeline;

use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower layer that authorizes every request against a catalog.
///
/// # Example
/// ```no_run
/// use axum::{routing::post, Router};
/// use gateway_authz::{AuthzLayer, Catalog};
/// use std::net::SocketAddr;
/// use std::sync::Arc;
///
/// async fn verify() -> &'static str {
///     "verified"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let catalog = Catalog::from_toml_file("catalog.toml").unwrap();
///
///     let app = Router::new()
///         .route("/soap/1.0.0/phoneverify", post(verify))
///         .layer(AuthzLayer::new(Arc::new(catalog)));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
///     axum::serve(
///         listener,
///         app.into_make_service_with_connect_info::<SocketAddr>()
///     ).await.unwrap();
/// }
/// ```
pub struct AuthzLayer<L = Catalog> {
    handler: RequestHandler<L>,
}

impl<L> Clone for AuthzLayer<L> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<L: ApiLookup> AuthzLayer<L> {
    /// Create a layer matching against `lookup` with the default pipeline.
    pub fn new(lookup: Arc<L>) -> Self {
        Self {
            handler: RequestHandler::new(lookup),
        }
    }

    /// Create a layer from an existing handler.
    pub fn from_handler(handler: RequestHandler<L>) -> Self {
        Self { handler }
    }

    /// Use a custom pipeline.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.handler = self.handler.with_pipeline(pipeline);
        self
    }

    /// The handler making the decisions.
    pub fn handler(&self) -> &RequestHandler<L> {
        &self.handler
    }
}

impl<S, L> Layer<S> for AuthzLayer<L> {
    type Service = AuthzMiddleware<S, L>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthzMiddleware {
            inner,
            handler: self.handler.clone(),
        }
    }
}

/// The authorization middleware service.
pub struct AuthzMiddleware<S, L = Catalog> {
    inner: S,
    handler: RequestHandler<L>,
}

impl<S: Clone, L> Clone for AuthzMiddleware<S, L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<S, L, ReqBody> Service<Request<ReqBody>> for AuthzMiddleware<S, L>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    L: ApiLookup + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let handler = self.handler.clone();
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let attributes = RequestAttributes::from_http_request(&request);

        Box::pin(async move {
            match handler.decide(&attributes).await {
                ResponseDecision::Allow(mutations) => {
                    tracing::trace!(
                        path = attributes.path(),
                        method = %attributes.method(),
                        "Request allowed"
                    );
                    mutations.apply_to(request.headers_mut());
                    inner.call(request).await
                }
                ResponseDecision::Deny(response) => Ok(response.into_response()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Api, PathTemplate, Resource};
    use crate::catalog::CatalogSnapshot;
    use crate::policies::ApiKeyPolicy;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use http::{HeaderMap, HeaderName, Method, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn echo_key(headers: HeaderMap) -> String {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("stripped")
            .to_string()
    }

    fn app() -> Router {
        let key = ApiKeyPolicy::new(HeaderName::from_static("x-api-key"), ["k1"]).strip(true);
        let catalog = CatalogSnapshot::builder()
            .add_api(
                Api::builder("Pets", "/pets", "v1")
                    .resource(
                        Resource::new(Method::GET, PathTemplate::parse("/{id}").unwrap())
                            .policy("key", Arc::new(key)),
                    )
                    .build(),
            )
            .build_catalog()
            .unwrap();

        Router::new()
            .route("/pets/{id}", get(echo_key))
            .layer(AuthzLayer::new(Arc::new(catalog)))
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_is_forwarded_with_mutations() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/pets/1")
                    .header("x-api-key", "k1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "stripped");
    }

    #[tokio::test]
    async fn test_denied_request_is_answered_directly() {
        let response = app()
            .oneshot(Request::builder().uri("/pets/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
        assert_eq!(body_text(response).await, "Invalid Credentials");
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let response = app()
            .oneshot(Request::builder().uri("/cats/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
