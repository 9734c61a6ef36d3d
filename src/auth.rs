//! Bearer-token authentication and role classification.
//!
//! The router recognizes exactly two roles: `interactive` (latency-sensitive
//! callers, typically a human-facing UI) and `automation` (batch/background
//! callers that may tolerate preemption). Role drives warmup timeouts and
//! preemption eligibility throughout the lifecycle controller.

use serde::{Deserialize, Serialize};

use crate::config::Policy;
use crate::error::AdmitError;

/// The caller's classified role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Interactive,
    Automation,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Interactive => "interactive",
            Role::Automation => "automation",
        }
    }
}

/// Classify an `Authorization` header value into a [`Role`].
///
/// If `policy.require_api_key` is false, every caller is `interactive`
/// regardless of what header (if any) was sent. Otherwise the header must be
/// `Bearer <token>` (case-insensitive scheme) matching one of the two
/// configured tokens exactly.
pub fn authenticate(policy: &Policy, authorization: Option<&str>) -> Result<Role, AdmitError> {
    if !policy.require_api_key {
        return Ok(Role::Interactive);
    }

    let header = authorization.ok_or(AdmitError::Unauthorized)?;
    let token = strip_bearer(header).ok_or(AdmitError::Unauthorized)?;

    if policy.interactive_token.as_deref() == Some(token) {
        Ok(Role::Interactive)
    } else if policy.automation_token.as_deref() == Some(token) {
        Ok(Role::Automation)
    } else {
        Err(AdmitError::Unauthorized)
    }
}

fn strip_bearer(header: &str) -> Option<&str> {
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
