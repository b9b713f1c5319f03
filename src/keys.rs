use serde::{Deserialize, Serialize};

/// Namespace prefix for every key this subsystem writes to the store
pub const KEY_PREFIX: &str = "rate_limit";

/// Caller identity attached to the request by the upstream auth layer.
/// The interceptors read it back out of the request extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedSubject(pub String);

/// The two keys a request is metered against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKeys {
    pub subject: String,
    pub endpoint: String,
}

/// Derive the subject and endpoint keys for one request.
///
/// The subject key prefers the authenticated identity over the caller
/// address. The endpoint name comes from the interceptor (a stable route
/// template, not a raw path), so handlers sharing a URL prefix stay distinct.
pub fn derive_keys(
    identity: Option<&str>,
    remote_addr: Option<&str>,
    endpoint: &str,
) -> RequestKeys {
    let identity = identity.filter(|id| !id.is_empty());
    let remote_addr = remote_addr.filter(|addr| !addr.is_empty());

    let subject = match (identity, remote_addr) {
        (Some(id), _) => format!("{}:user:{}", KEY_PREFIX, id),
        (None, Some(addr)) => format!("{}:ip:{}", KEY_PREFIX, addr),
        (None, None) => format!("{}:ip:unknown", KEY_PREFIX),
    };

    RequestKeys {
        subject,
        endpoint: format!("{}:endpoint:{}", KEY_PREFIX, endpoint),
    }
}
