//! Ordered policy evaluation.
//!
//! Policies of the matched resource run one at a time in configured order.
//! The first deny ends evaluation; a fault (error, panic or deadline) ends it
//! with an internal-error deny. If every policy continues, the request is
//! allowed with the header mutations accumulated in policy order.

use crate::context::RequestContext;
use crate::decision::{DenyResponse, ResponseDecision};
use crate::error::PolicyError;
use crate::policy::{PolicyOutcome, PolicyRef, PolicyState};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// The decision pipeline.
///
/// # Example
/// ```
/// use gateway_authz::Pipeline;
/// use std::time::Duration;
///
/// let pipeline = Pipeline::new().with_policy_timeout(Duration::from_millis(250));
/// assert_eq!(pipeline.policy_timeout(), Some(Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    policy_timeout: Option<Duration>,
}

impl Pipeline {
    /// A pipeline without a per-policy deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every policy invocation; exceeding the deadline is a fault.
    pub fn with_policy_timeout(mut self, timeout: Duration) -> Self {
        self.policy_timeout = Some(timeout);
        self
    }

    /// The per-policy deadline, if any.
    pub fn policy_timeout(&self) -> Option<Duration> {
        self.policy_timeout
    }

    /// Run the resource's policies against `ctx`.
    pub async fn evaluate(&self, ctx: &RequestContext) -> ResponseDecision {
        let policies = ctx.resource().policies();
        if policies.is_empty() {
            tracing::trace!(
                api = ctx.api().name(),
                template = %ctx.resource().template(),
                "Resource has no policies, allowing"
            );
            return ResponseDecision::allow();
        }

        let mut state = PolicyState::default();
        for (index, policy) in policies.iter().enumerate() {
            match self.run(policy, ctx, &state).await {
                Ok(PolicyOutcome::Continue(mutations)) => {
                    tracing::debug!(
                        policy = policy.name(),
                        index = index,
                        api = ctx.api().name(),
                        "Policy continued"
                    );
                    state.absorb(mutations);
                }
                Ok(PolicyOutcome::Deny(response)) => {
                    tracing::info!(
                        policy = policy.name(),
                        index = index,
                        api = ctx.api().name(),
                        path = ctx.path(),
                        method = %ctx.method(),
                        status = response.client_status().as_u16(),
                        "Policy denied request"
                    );
                    return ResponseDecision::Deny(response);
                }
                Err(err) => {
                    tracing::warn!(
                        policy = policy.name(),
                        index = index,
                        api = ctx.api().name(),
                        path = ctx.path(),
                        error = %err,
                        "Policy fault, denying request"
                    );
                    return ResponseDecision::Deny(DenyResponse::internal_error());
                }
            }
        }

        tracing::trace!(
            api = ctx.api().name(),
            policies = policies.len(),
            "All policies continued, allowing"
        );
        ResponseDecision::Allow(state.into_mutations())
    }

    async fn run(
        &self,
        policy: &PolicyRef,
        ctx: &RequestContext,
        state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        let call = AssertUnwindSafe(policy.policy().apply(ctx, state)).catch_unwind();
        let outcome = match self.policy_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| PolicyError::Timeout(limit))?,
            None => call.await,
        };
        outcome.map_err(|_| PolicyError::Panicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Api, PathTemplate, Resource};
    use crate::attributes::RequestAttributes;
    use crate::catalog::CatalogSnapshot;
    use crate::decision::HeaderMutations;
    use crate::policy::Policy;
    use async_trait::async_trait;
    use http::{HeaderName, HeaderValue, Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behaviour {
        Continue(HeaderMutations),
        Deny(StatusCode),
        Fault,
        Panic,
        Hang,
    }

    struct FakePolicy {
        behaviour: Behaviour,
        calls: AtomicUsize,
        seen_completed: AtomicUsize,
    }

    impl FakePolicy {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                seen_completed: AtomicUsize::new(usize::MAX),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Policy for FakePolicy {
        async fn apply(
            &self,
            _ctx: &RequestContext,
            state: &PolicyState,
        ) -> Result<PolicyOutcome, PolicyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_completed.store(state.completed(), Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Continue(mutations) => Ok(PolicyOutcome::Continue(mutations.clone())),
                Behaviour::Deny(status) => Ok(PolicyOutcome::Deny(DenyResponse::new(*status))),
                Behaviour::Fault => Err(PolicyError::internal("backend unreachable")),
                Behaviour::Panic => panic!("policy bug"),
                Behaviour::Hang => {
                    futures_util::future::pending::<()>().await;
                    Ok(PolicyOutcome::proceed())
                }
            }
        }
    }

    fn set(name: &'static str, value: &'static str) -> HeaderMutations {
        HeaderMutations::new().set(HeaderName::from_static(name), HeaderValue::from_static(value))
    }

    fn context_with(policies: &[(&str, Arc<FakePolicy>)]) -> RequestContext {
        let mut resource = Resource::new(Method::GET, PathTemplate::parse("/items").unwrap());
        for (name, policy) in policies {
            resource = resource.policy(*name, policy.clone());
        }
        let snapshot = CatalogSnapshot::builder()
            .add_api(Api::builder("Items", "/shop", "v1").resource(resource).build())
            .build()
            .unwrap();
        let attributes = RequestAttributes::new(Method::GET, "/shop/items");
        let route = snapshot
            .match_request(attributes.path(), attributes.method(), None)
            .unwrap();
        RequestContext::build(&route, &attributes)
    }

    #[tokio::test]
    async fn test_empty_policy_list_allows() {
        let ctx = context_with(&[]);
        let decision = Pipeline::new().evaluate(&ctx).await;
        assert_eq!(decision, ResponseDecision::allow());
    }

    #[tokio::test]
    async fn test_first_deny_short_circuits() {
        let p1 = FakePolicy::new(Behaviour::Deny(StatusCode::FORBIDDEN));
        let p2 = FakePolicy::new(Behaviour::Continue(HeaderMutations::new()));
        let p3 = FakePolicy::new(Behaviour::Continue(HeaderMutations::new()));
        let ctx = context_with(&[("p1", p1.clone()), ("p2", p2.clone()), ("p3", p3.clone())]);

        let decision = Pipeline::new().evaluate(&ctx).await;

        assert_eq!(decision.deny_status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
        assert_eq!(p3.calls(), 0);
    }

    #[tokio::test]
    async fn test_later_mutations_override_earlier() {
        let p1 = FakePolicy::new(Behaviour::Continue(set("x-tier", "gold").set(
            HeaderName::from_static("x-user"),
            HeaderValue::from_static("alice"),
        )));
        let p2 = FakePolicy::new(Behaviour::Continue(set("x-tier", "silver")));
        let ctx = context_with(&[("p1", p1.clone()), ("p2", p2.clone())]);

        let decision = Pipeline::new().evaluate(&ctx).await;

        let ResponseDecision::Allow(mutations) = decision else {
            panic!("expected allow");
        };
        assert_eq!(mutations.headers_to_set()["x-tier"], "silver");
        assert_eq!(mutations.headers_to_set()["x-user"], "alice");
        assert_eq!(p2.seen_completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deny_discards_earlier_mutations() {
        let p1 = FakePolicy::new(Behaviour::Continue(set("x-user", "alice")));
        let p2 = FakePolicy::new(Behaviour::Deny(StatusCode::TOO_MANY_REQUESTS));
        let ctx = context_with(&[("p1", p1), ("p2", p2)]);

        let ResponseDecision::Deny(response) = Pipeline::new().evaluate(&ctx).await else {
            panic!("expected deny");
        };
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers.is_empty());
    }

    #[tokio::test]
    async fn test_fault_fails_closed() {
        let p1 = FakePolicy::new(Behaviour::Fault);
        let p2 = FakePolicy::new(Behaviour::Continue(HeaderMutations::new()));
        let ctx = context_with(&[("p1", p1), ("p2", p2.clone())]);

        let decision = Pipeline::new().evaluate(&ctx).await;

        assert_eq!(decision.deny_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn test_panic_fails_closed() {
        let p1 = FakePolicy::new(Behaviour::Panic);
        let ctx = context_with(&[("p1", p1)]);

        let decision = Pipeline::new().evaluate(&ctx).await;
        assert_eq!(decision.deny_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_closed() {
        let p1 = FakePolicy::new(Behaviour::Hang);
        let ctx = context_with(&[("p1", p1)]);

        let decision = Pipeline::new()
            .with_policy_timeout(Duration::from_millis(50))
            .evaluate(&ctx)
            .await;
        assert_eq!(decision.deny_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
