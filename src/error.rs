use std::fmt;

use thiserror::Error;

use crate::challenge::{ChallengeKind, ChallengeStatus};

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("pem parse error: {0}")]
    Pem(#[from] pem::PemError),
    #[error("x509 parse error: {0}")]
    X509(String),
    #[error("no private key found")]
    MissingPrivateKey,
    #[error("no certificate found")]
    MissingCertificate,
    #[error("unsupported private key: {0}")]
    UnsupportedKey(#[from] rustls::Error),
    #[error("account keys do not carry a validity period")]
    NoValidityPeriod,
    #[error("timestamp out of range")]
    TimestampOutOfRange,
    #[error("certificate generation error: {0}")]
    Rcgen(#[from] rcgen::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Opaque failure reported by the protocol client adapter.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProtocolError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Final outcome of one challenge of an order that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub token: String,
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
    pub error_type: Option<String>,
    pub detail: Option<String>,
}

impl ChallengeOutcome {
    /// Invalid challenges and challenges the authority attached an error to.
    pub fn is_failure(&self) -> bool {
        self.status == ChallengeStatus::Invalid || self.error_type.is_some()
    }
}

impl fmt::Display for ChallengeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (challenge type {}, status {:?})",
            self.error_type.as_deref().unwrap_or("errortype null"),
            self.detail.as_deref().unwrap_or("null errordetails"),
            self.kind,
            self.status,
        )
    }
}

/// Aggregated validation failure. Lists every challenge of the order, not
/// only the first one that failed.
#[derive(Error, Debug, Clone)]
pub struct OrderInvalidError {
    pub challenges: Vec<ChallengeOutcome>,
}

impl OrderInvalidError {
    pub fn failures(&self) -> impl Iterator<Item = &ChallengeOutcome> {
        self.challenges.iter().filter(|c| c.is_failure())
    }
}

impl fmt::Display for OrderInvalidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "one or more challenges were invalid, make sure the issuing authority \
             can reach the domains being validated: "
        )?;
        for (i, outcome) in self.challenges.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", outcome)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum RenewalError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("order invalid: {0}")]
    OrderInvalid(#[from] OrderInvalidError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("renewal attempt cancelled")]
    Cancelled,
    #[error("{trigger:?} is not allowed in state {state:?}")]
    InvalidTransition {
        state: crate::ServiceState,
        trigger: crate::Trigger,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        token: &str,
        status: ChallengeStatus,
        error: Option<(&str, &str)>,
    ) -> ChallengeOutcome {
        ChallengeOutcome {
            token: token.to_string(),
            kind: ChallengeKind::Http01,
            status,
            error_type: error.map(|e| e.0.to_string()),
            detail: error.map(|e| e.1.to_string()),
        }
    }

    #[test]
    fn order_invalid_lists_every_challenge() {
        let err = OrderInvalidError {
            challenges: vec![
                outcome(
                    "a",
                    ChallengeStatus::Invalid,
                    Some(("urn:ietf:params:acme:error:unauthorized", "bad token")),
                ),
                outcome("b", ChallengeStatus::Valid, None),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("unauthorized: bad token (challenge type http-01"));
        assert!(message.contains("status Valid"));
        assert_eq!(err.failures().count(), 1);
    }

    #[test]
    fn errored_challenge_counts_as_failure() {
        let pending = outcome("c", ChallengeStatus::Pending, Some(("rateLimited", "slow down")));
        assert!(pending.is_failure());
        assert!(!outcome("d", ChallengeStatus::Pending, None).is_failure());
    }
}
