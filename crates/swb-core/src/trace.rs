// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request/trace id propagation.
//!
//! Every inter-service HTTP call carries `X-Request-ID` and
//! `X-Trace-ID`. Ids are captured at the edge (or generated when
//! missing) and passed explicitly into any spawned background work:
//! the pull loop, dispatcher, callback pipeline, and export task all
//! forward the context they were born with.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the cross-service trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// A request/trace id pair, cloned into spawned tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Id of the originating request.
    pub request_id: String,
    /// Id of the cross-service trace.
    pub trace_id: String,
}

impl RequestContext {
    /// Fresh context with generated ids.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            trace_id: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Context from incoming header values, generating whichever id is
    /// missing or empty.
    #[must_use]
    pub fn from_headers(request_id: Option<&str>, trace_id: Option<&str>) -> Self {
        let fill = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
        };
        Self {
            request_id: fill(request_id),
            trace_id: fill(trace_id),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_headers_keeps_present_values() {
        let ctx = RequestContext::from_headers(Some("r1"), Some("t1"));
        assert_eq!(ctx.request_id, "r1");
        assert_eq!(ctx.trace_id, "t1");
    }

    #[test]
    fn from_headers_fills_missing_values() {
        let ctx = RequestContext::from_headers(Some(" "), None);
        assert!(!ctx.request_id.is_empty());
        assert_ne!(ctx.request_id, " ");
        assert!(!ctx.trace_id.is_empty());
    }
}
