//! The inbound entry point for check calls.

use crate::attributes::RequestAttributes;
use crate::catalog::{ApiLookup, Catalog};
use crate::context::RequestContext;
use crate::decision::{DenyResponse, ResponseDecision};
use crate::error::NoMatch;
use crate::pipeline::Pipeline;
use crate::translate::translate;
use crate::wire::{CheckRequest, CheckResponse};
use std::sync::Arc;

/// Answers check calls: extract, match, evaluate, translate.
///
/// Every call produces a response; nothing is surfaced to the caller as an
/// error. Cloning is cheap and clones share the same catalog.
///
/// # Example
/// ```
/// use gateway_authz::{Api, CatalogSnapshot, CheckRequest, PathTemplate, RequestHandler, Resource};
/// use http::Method;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let catalog = CatalogSnapshot::builder()
///     .add_api(Api::builder("Pets", "/pets", "v1")
///         .resource(Resource::new(Method::GET, PathTemplate::parse("/{id}").unwrap()))
///         .build())
///     .build_catalog()
///     .unwrap();
/// let handler = RequestHandler::new(Arc::new(catalog));
///
/// let response = handler.process(&CheckRequest::http("GET", "/pets/1")).await;
/// assert!(response.is_allowed());
///
/// let response = handler.process(&CheckRequest::http("GET", "/cats/1")).await;
/// assert_eq!(response.denied_status(), Some(404));
/// # }
/// ```
pub struct RequestHandler<L = Catalog> {
    lookup: Arc<L>,
    pipeline: Pipeline,
}

// Manual Clone impl so `L` itself need not be Clone.
impl<L> Clone for RequestHandler<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: self.lookup.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<L: ApiLookup> RequestHandler<L> {
    /// Create a handler over `lookup` with the default pipeline.
    pub fn new(lookup: Arc<L>) -> Self {
        Self {
            lookup,
            pipeline: Pipeline::new(),
        }
    }

    /// Use a custom pipeline, e.g. one with a per-policy deadline.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The lookup this handler matches against.
    pub fn lookup(&self) -> &Arc<L> {
        &self.lookup
    }

    /// Answer one check request.
    ///
    /// A request whose attributes cannot be interpreted is denied with 400
    /// without consulting the catalog.
    pub async fn process(&self, request: &CheckRequest) -> CheckResponse {
        let attributes = match RequestAttributes::from_check_request(request) {
            Ok(attributes) => attributes,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed check request");
                return translate(ResponseDecision::Deny(DenyResponse::bad_request()));
            }
        };
        translate(self.decide(&attributes).await)
    }

    /// Match and evaluate already-extracted attributes.
    ///
    /// Requests that match no resource are denied with 404 and no policy
    /// runs.
    pub async fn decide(&self, attributes: &RequestAttributes) -> ResponseDecision {
        let route = match self.lookup.lookup(
            attributes.path(),
            attributes.method(),
            attributes.authority(),
        ) {
            Ok(route) => route,
            Err(reason) => {
                log_no_match(&reason, attributes);
                return ResponseDecision::Deny(DenyResponse::not_found());
            }
        };

        tracing::debug!(
            api = route.api.name(),
            version = route.api.version(),
            template = %route.resource.template(),
            method = %attributes.method(),
            "Request matched resource"
        );

        let ctx = RequestContext::build(&route, attributes);
        self.pipeline.evaluate(&ctx).await
    }
}

fn log_no_match(reason: &NoMatch, attributes: &RequestAttributes) {
    match reason {
        NoMatch::MethodNotAllowed { .. } => tracing::info!(
            path = attributes.path(),
            method = %attributes.method(),
            reason = %reason,
            "Method not allowed on resource"
        ),
        _ => tracing::info!(
            path = attributes.path(),
            method = %attributes.method(),
            authority = attributes.authority().unwrap_or(""),
            reason = %reason,
            "No matching resource"
        ),
    }
}
