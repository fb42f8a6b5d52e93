//! Decision values produced by the pipeline.

use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Header additions and removals to apply to the forwarded request.
///
/// Setting a header that was marked for removal cancels the removal and vice
/// versa, so the accumulated mutations never contradict each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMutations {
    set: HeaderMap,
    remove: Vec<HeaderName>,
}

impl HeaderMutations {
    /// Create an empty set of mutations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any earlier value for the same name.
    pub fn set(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Mark a header for removal.
    pub fn remove(mut self, name: HeaderName) -> Self {
        self.delete(name);
        self
    }

    pub(crate) fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.remove.retain(|n| *n != name);
        self.set.insert(name, value);
    }

    pub(crate) fn delete(&mut self, name: HeaderName) {
        self.set.remove(&name);
        if !self.remove.contains(&name) {
            self.remove.push(name);
        }
    }

    /// Apply `later` on top of these mutations; `later` wins on conflicts.
    pub fn merge(&mut self, later: HeaderMutations) {
        for name in later.remove {
            self.delete(name);
        }
        let mut current: Option<HeaderName> = None;
        for (name, value) in later.set {
            // HeaderMap yields `None` names for extra values of the same header.
            match name {
                Some(name) => {
                    self.insert(name.clone(), value);
                    current = Some(name);
                }
                None => {
                    if let Some(name) = &current {
                        self.set.append(name.clone(), value);
                    }
                }
            }
        }
    }

    /// Headers to add or overwrite.
    pub fn headers_to_set(&self) -> &HeaderMap {
        &self.set
    }

    /// Headers to strip.
    pub fn headers_to_remove(&self) -> &[HeaderName] {
        &self.remove
    }

    /// Whether there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    /// Apply the mutations to a header map in place.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for name in self.set.keys() {
            headers.remove(name);
        }
        for (name, value) in &self.set {
            headers.append(name.clone(), value.clone());
        }
    }
}

/// The response sent to the client when a request is denied.
#[derive(Debug, Clone, PartialEq)]
pub struct DenyResponse {
    /// HTTP status returned to the client.
    pub status: StatusCode,
    /// Optional response body.
    pub body: Option<String>,
    /// Headers added to the denied response.
    pub headers: HeaderMap,
}

impl DenyResponse {
    /// Create a deny response with the given status.
    ///
    /// A status below 400 would read as an allow to the proxy and is
    /// replaced with 403.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status: error_status(status),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// The status the client is answered with.
    ///
    /// Always a client or server error, even if `status` was overwritten
    /// with a success or redirect code.
    pub fn client_status(&self) -> StatusCode {
        error_status(self.status)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// 400: the check request could not be interpreted.
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_body("Invalid request")
    }

    /// 401: credentials missing or invalid.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED).with_body("Invalid Credentials")
    }

    /// 403: the request is not permitted.
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN).with_body("Access denied")
    }

    /// 404: no resource matches the request.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND).with_body("No matching resource found")
    }

    /// 500: a policy failed to reach a decision.
    pub fn internal_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_body("Internal server error")
    }
}

fn error_status(status: StatusCode) -> StatusCode {
    if status.is_client_error() || status.is_server_error() {
        status
    } else {
        StatusCode::FORBIDDEN
    }
}

impl IntoResponse for DenyResponse {
    fn into_response(self) -> Response {
        let mut response = (self.client_status(), self.body.unwrap_or_default()).into_response();
        response.headers_mut().extend(self.headers);
        response
    }
}

/// The pipeline's terminal verdict for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseDecision {
    /// Forward the request after applying the mutations.
    Allow(HeaderMutations),
    /// Reject the request with the given response.
    Deny(DenyResponse),
}

impl ResponseDecision {
    /// Allow without mutations.
    pub fn allow() -> Self {
        Self::Allow(HeaderMutations::default())
    }

    /// Deny with the given response.
    pub fn deny(response: DenyResponse) -> Self {
        Self::Deny(response)
    }

    /// Check if the decision allows the request.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Status of a deny decision.
    pub fn deny_status(&self) -> Option<StatusCode> {
        match self {
            Self::Allow(_) => None,
            Self::Deny(response) => Some(response.client_status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &'static str) -> HeaderName {
        HeaderName::from_static(s)
    }

    fn value(s: &'static str) -> HeaderValue {
        HeaderValue::from_static(s)
    }

    #[test]
    fn test_merge_later_wins() {
        let mut acc = HeaderMutations::new()
            .set(name("x-tier"), value("gold"))
            .set(name("x-user"), value("alice"));
        acc.merge(HeaderMutations::new().set(name("x-tier"), value("silver")));

        assert_eq!(acc.headers_to_set()["x-tier"], "silver");
        assert_eq!(acc.headers_to_set()["x-user"], "alice");
    }

    #[test]
    fn test_set_and_remove_cancel() {
        let mut acc = HeaderMutations::new().remove(name("internal-key"));
        acc.merge(HeaderMutations::new().set(name("internal-key"), value("k")));
        assert!(acc.headers_to_remove().is_empty());
        assert_eq!(acc.headers_to_set()["internal-key"], "k");

        acc.merge(HeaderMutations::new().remove(name("internal-key")));
        assert!(acc.headers_to_set().get("internal-key").is_none());
        assert_eq!(acc.headers_to_remove(), &[name("internal-key")]);
    }

    #[test]
    fn test_apply_to() {
        let mut headers = HeaderMap::new();
        headers.insert(name("internal-key"), value("secret"));
        headers.insert(name("accept"), value("*/*"));

        HeaderMutations::new()
            .remove(name("internal-key"))
            .set(name("x-api"), value("soap"))
            .apply_to(&mut headers);

        assert!(headers.get("internal-key").is_none());
        assert_eq!(headers["x-api"], "soap");
        assert_eq!(headers["accept"], "*/*");
    }

    #[test]
    fn test_deny_into_response() {
        let response = DenyResponse::unauthorized()
            .with_header(name("www-authenticate"), value("ApiKey"))
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "ApiKey");
    }

    #[test]
    fn test_success_status_never_leaves_a_deny() {
        let built = DenyResponse::new(StatusCode::OK);
        assert_eq!(built.status, StatusCode::FORBIDDEN);

        let mut overwritten = DenyResponse::forbidden();
        overwritten.status = StatusCode::NO_CONTENT;
        assert_eq!(overwritten.client_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ResponseDecision::deny(overwritten.clone()).deny_status(),
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(overwritten.into_response().status(), StatusCode::FORBIDDEN);

        assert_eq!(DenyResponse::new(StatusCode::GONE).status, StatusCode::GONE);
    }

    #[test]
    fn test_decision_accessors() {
        assert!(ResponseDecision::allow().is_allowed());
        let deny = ResponseDecision::deny(DenyResponse::not_found());
        assert!(!deny.is_allowed());
        assert_eq!(deny.deny_status(), Some(StatusCode::NOT_FOUND));
    }
}
