//! Conversion of a [`ResponseDecision`] into the proxy's check response.
//!
//! Allow maps to gRPC `OK` with an ok response carrying the header mutations.
//! Deny maps to `PERMISSION_DENIED` with a denied response carrying the
//! status, headers and body the client will see.

use crate::decision::{DenyResponse, HeaderMutations, ResponseDecision};
use crate::wire::{
    CheckResponse, DeniedHttpResponse, HeaderValue, HeaderValueOption, HttpResponse, HttpStatus,
    OkHttpResponse, RpcStatus, CODE_OK, CODE_PERMISSION_DENIED,
};
use http::HeaderMap;

/// Translate a decision into a check response.
///
/// # Example
/// ```
/// use gateway_authz::{translate, DenyResponse, ResponseDecision};
///
/// let response = translate(ResponseDecision::deny(DenyResponse::unauthorized()));
/// assert_eq!(response.status.code, 7);
/// assert_eq!(response.denied_status(), Some(401));
/// ```
pub fn translate(decision: ResponseDecision) -> CheckResponse {
    match decision {
        ResponseDecision::Allow(mutations) => allowed(&mutations),
        ResponseDecision::Deny(response) => denied(response),
    }
}

fn allowed(mutations: &HeaderMutations) -> CheckResponse {
    CheckResponse {
        status: RpcStatus {
            code: CODE_OK,
            message: String::new(),
        },
        http_response: HttpResponse::OkResponse(OkHttpResponse {
            headers: header_options(mutations.headers_to_set()),
            headers_to_remove: mutations
                .headers_to_remove()
                .iter()
                .map(|name| name.as_str().to_string())
                .collect(),
        }),
    }
}

fn denied(response: DenyResponse) -> CheckResponse {
    CheckResponse {
        status: RpcStatus {
            code: CODE_PERMISSION_DENIED,
            message: String::new(),
        },
        http_response: HttpResponse::DeniedResponse(DeniedHttpResponse {
            status: HttpStatus {
                code: response.client_status().as_u16(),
            },
            headers: header_options(&response.headers),
            body: response.body.unwrap_or_default(),
        }),
    }
}

/// The first value of each name overwrites; further values of the same name
/// are appended.
fn header_options(headers: &HeaderMap) -> Vec<HeaderValueOption> {
    let mut options = Vec::with_capacity(headers.len());
    for name in headers.keys() {
        for (i, value) in headers.get_all(name).iter().enumerate() {
            options.push(HeaderValueOption {
                header: HeaderValue {
                    key: name.as_str().to_string(),
                    value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                },
                append: i > 0,
            });
        }
    }
    options
}
