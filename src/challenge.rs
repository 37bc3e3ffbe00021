use std::fmt;

use serde::{Deserialize, Serialize};

const DNS_CHALLENGE_PREFIX: &str = "_acme-challenge.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Http01 => write!(f, "http-01"),
            ChallengeKind::Dns01 => write!(f, "dns-01"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// A challenge response that has to be servable while its order is being
/// validated.
///
/// For [ChallengeKind::Http01] the `token` is the raw token from the
/// `/.well-known/acme-challenge/<token>` path and `response` the key
/// authorization to answer with. For [ChallengeKind::Dns01] the `token` is the
/// TXT record value to publish under [ChallengeRecord::dns_record_name].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub token: String,
    pub response: String,
    pub domains: Vec<String>,
    pub kind: ChallengeKind,
}

impl ChallengeRecord {
    /// Name of the TXT record validating `domain`, wildcard label stripped.
    pub fn dns_record_name(domain: &str) -> String {
        let domain = domain.strip_prefix("*.").unwrap_or(domain);
        format!("{}{}", DNS_CHALLENGE_PREFIX, domain)
    }
}
