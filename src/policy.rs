//! The policy capability invoked by the decision pipeline.
//!
//! A policy looks at the [`RequestContext`] and the mutations accumulated by the
//! policies that ran before it, and either lets the request continue (possibly
//! adding header mutations) or denies it.
//!
//! Policies that call out to remote services must bound their own latency;
//! [`Pipeline::with_policy_timeout`](crate::Pipeline::with_policy_timeout)
//! adds a deadline on top.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use gateway_authz::{DenyResponse, Policy, PolicyError, PolicyOutcome, PolicyState, RequestContext};
//!
//! /// Rejects requests that do not declare a tenant.
//! struct RequireTenant;
//!
//! #[async_trait]
//! impl Policy for RequireTenant {
//!     async fn apply(
//!         &self,
//!         ctx: &RequestContext,
//!         _state: &PolicyState,
//!     ) -> Result<PolicyOutcome, PolicyError> {
//!         if ctx.header("x-tenant").is_some() {
//!             Ok(PolicyOutcome::proceed())
//!         } else {
//!             Ok(PolicyOutcome::Deny(DenyResponse::forbidden()))
//!         }
//!     }
//! }
//! ```

use crate::context::RequestContext;
use crate::decision::{DenyResponse, HeaderMutations};
use crate::error::PolicyError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a policy decided.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// Let the next policy run, applying these mutations.
    Continue(HeaderMutations),
    /// Stop evaluation and reject the request.
    Deny(DenyResponse),
}

impl PolicyOutcome {
    /// Continue without mutations.
    pub fn proceed() -> Self {
        Self::Continue(HeaderMutations::default())
    }
}

/// State accumulated by the policies that already ran for this request.
#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    mutations: HeaderMutations,
    completed: usize,
}

impl PolicyState {
    /// Header mutations accumulated so far, in policy order.
    pub fn mutations(&self) -> &HeaderMutations {
        &self.mutations
    }

    /// Number of policies that continued before the current one.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub(crate) fn absorb(&mut self, mutations: HeaderMutations) {
        self.mutations.merge(mutations);
        self.completed += 1;
    }

    pub(crate) fn into_mutations(self) -> HeaderMutations {
        self.mutations
    }
}

/// A pluggable decision capability.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Decide on the request.
    ///
    /// Returning `Err` signals a fault, not a rejection: the pipeline denies
    /// with an internal error and runs no further policies.
    async fn apply(
        &self,
        ctx: &RequestContext,
        state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError>;
}

#[async_trait]
impl<T: Policy + ?Sized> Policy for Arc<T> {
    async fn apply(
        &self,
        ctx: &RequestContext,
        state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        (**self).apply(ctx, state).await
    }
}

#[async_trait]
impl<T: Policy + ?Sized> Policy for Box<T> {
    async fn apply(
        &self,
        ctx: &RequestContext,
        state: &PolicyState,
    ) -> Result<PolicyOutcome, PolicyError> {
        (**self).apply(ctx, state).await
    }
}

/// A named reference from a resource to a policy instance.
#[derive(Clone)]
pub struct PolicyRef {
    name: Arc<str>,
    policy: Arc<dyn Policy>,
}

impl PolicyRef {
    /// Create a named reference.
    pub fn new(name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        Self {
            name: Arc::from(name.into()),
            policy,
        }
    }

    /// Name used in configuration and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy instance.
    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }
}

impl fmt::Debug for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PolicyRef").field(&self.name).finish()
    }
}

/// Named policy instances that configuration can refer to.
///
/// Built-in policy types are constructed from configuration; custom policies
/// are registered here before the catalog is built.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy under `name`, replacing any previous entry.
    pub fn register(mut self, name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        self.insert(name, policy);
        self
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, policy: Arc<dyn Policy>) {
        self.policies.insert(name.into(), policy);
    }

    /// Resolve a name into a reference.
    pub fn resolve(&self, name: &str) -> Option<PolicyRef> {
        self.policies
            .get(name)
            .map(|policy| PolicyRef::new(name, policy.clone()))
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.policies.keys().collect();
        names.sort();
        f.debug_struct("PolicyRegistry").field("policies", &names).finish()
    }
}
