//
use std::fmt;

use crate::api::ApiProblem;

/// acme-twostep result.
pub type Result<T> = ::std::result::Result<T, Error>;

/// acme-twostep errors.
///
/// The variants separate outcomes a caller can retry from outcomes that
/// need remediation first: [`Transient`] and [`Timeout`] are safe to retry
/// as-is, [`Validation`] is retryable per domain once the challenge
/// material is fixed, the rest are fatal to the current step.
///
/// [`Transient`]: enum.Error.html#variant.Transient
/// [`Timeout`]: enum.Error.html#variant.Timeout
/// [`Validation`]: enum.Error.html#variant.Validation
#[derive(Debug)]
pub enum Error {
    /// Connectivity-level failure (connection refused, read timeout).
    Transient(String),
    /// The response violated the expected ACME structure or contract.
    Protocol(String),
    /// The CA declared rate limiting. Back off before retrying.
    RateLimited(String),
    /// A challenge or order ended up `invalid`. Carries the CA's problem
    /// detail verbatim, and the domain when one is known.
    Validation {
        domain: Option<String>,
        detail: String,
    },
    /// A polling bound elapsed without an explicit outcome. The order is
    /// left pending, so retrying is safe.
    Timeout(String),
    /// Persisted session state is missing or corrupt.
    Serialization(String),
    /// Caller input rejected before any network call.
    InvalidInput(String),
}

impl Error {
    /// Whether retrying the same call without remediation can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Transient(s) => write!(f, "network failure: {}", s),
            Error::Protocol(s) => write!(f, "protocol error: {}", s),
            Error::RateLimited(s) => write!(f, "rate limited: {}", s),
            Error::Validation { domain, detail } => match domain {
                Some(domain) => write!(f, "validation failed for {}: {}", domain, detail),
                None => write!(f, "validation failed: {}", detail),
            },
            Error::Timeout(s) => write!(f, "timed out: {}", s),
            Error::Serialization(s) => write!(f, "session state error: {}", s),
            Error::InvalidInput(s) => write!(f, "invalid input: {}", s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(format!("unexpected json: {}", e))
    }
}

impl From<ApiProblem> for Error {
    fn from(p: ApiProblem) -> Self {
        if p.is_rate_limited() {
            Error::RateLimited(p.to_string())
        } else {
            Error::Protocol(p.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_limit_problem_maps_to_rate_limited() {
        let p = ApiProblem {
            _type: "urn:ietf:params:acme:error:rateLimited".into(),
            detail: Some("too many new orders".into()),
            subproblems: None,
        };
        match Error::from(p) {
            Error::RateLimited(s) => assert!(s.contains("too many new orders")),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transient("reset".into()).is_retryable());
        assert!(Error::Timeout("poll".into()).is_retryable());
        assert!(!Error::Protocol("bad body".into()).is_retryable());
        assert!(!Error::Serialization("gone".into()).is_retryable());
    }
}
