use secrecy::{ExposeSecret, SecretString};

use crate::error::{CoreResult, GenProxyError};

/// Header carrying the shared secret on inbound requests.
pub const SECRET_HEADER: &str = "x-proxy-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized,
    Forbidden,
}

/// Shared-secret gate. An unconfigured secret rejects everything.
#[derive(Debug, Clone)]
pub struct Authenticator {
    expected: Option<SecretString>,
}

impl Authenticator {
    pub fn new(expected: Option<SecretString>) -> Self {
        Self { expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty())
    }

    pub fn check(&self, presented: Option<&str>) -> AuthDecision {
        let Some(expected) = &self.expected else {
            return AuthDecision::Forbidden;
        };
        let expected = expected.expose_secret().as_bytes();
        match presented {
            Some(p) if !expected.is_empty() && !p.is_empty() && ct_eq(p.as_bytes(), expected) => {
                AuthDecision::Authorized
            }
            _ => AuthDecision::Forbidden,
        }
    }

    pub fn authorize(&self, presented: Option<&str>) -> CoreResult<()> {
        match self.check(presented) {
            AuthDecision::Authorized => Ok(()),
            AuthDecision::Forbidden => Err(GenProxyError::Forbidden),
        }
    }
}

// Length still leaks; the content comparison does not short-circuit.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(secret: Option<&str>) -> Authenticator {
        Authenticator::new(secret.map(|s| SecretString::new(s.into())))
    }

    #[test]
    fn matching_secret_is_authorized() {
        assert_eq!(auth(Some("s3cret")).check(Some("s3cret")), AuthDecision::Authorized);
    }

    #[test]
    fn mismatch_or_missing_header_is_forbidden() {
        let a = auth(Some("s3cret"));
        assert_eq!(a.check(Some("s3creT")), AuthDecision::Forbidden);
        assert_eq!(a.check(Some("s3cret ")), AuthDecision::Forbidden);
        assert_eq!(a.check(None), AuthDecision::Forbidden);
        assert_eq!(a.check(Some("")), AuthDecision::Forbidden);
    }

    #[test]
    fn unconfigured_secret_fails_closed() {
        let a = auth(None);
        assert_eq!(a.check(None), AuthDecision::Forbidden);
        assert_eq!(a.check(Some("")), AuthDecision::Forbidden);
        assert_eq!(a.check(Some("anything")), AuthDecision::Forbidden);

        let empty = auth(Some(""));
        assert_eq!(empty.check(Some("")), AuthDecision::Forbidden);
        assert!(!a.is_configured());
        assert!(!empty.is_configured());
        assert!(auth(Some("x")).is_configured());
    }

    #[test]
    fn authorize_maps_to_forbidden_error() {
        let err = auth(Some("x")).authorize(Some("y")).unwrap_err();
        assert!(matches!(err, GenProxyError::Forbidden));
        auth(Some("x")).authorize(Some("x")).unwrap();
    }
}
