//! Boundary to the ACME wire client.
//!
//! Request signing, nonces and JWS are the adapter's business. The renewal
//! engine only needs the order, authorization, challenge and finalize calls
//! below. Handles carry the resource URLs the adapter needs to find the
//! objects again.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AccountKey, ChallengeKind, ChallengeStatus, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHandle {
    pub url: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeHandle {
    pub url: String,
    pub kind: ChallengeKind,
    pub token: String,
    pub key_authorization: String,
}

/// Error document the authority attached to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeState {
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
    pub error: Option<Problem>,
}

/// Entry point of the protocol client: turns account credentials into an
/// authenticated account.
#[async_trait]
pub trait AcmeDirectory: Send + Sync {
    async fn login(
        &self,
        directory_url: &str,
        account_key: &AccountKey,
    ) -> Result<Arc<dyn AcmeAccount>, ProtocolError>;

    /// Creates an account, agreeing to the terms of service.
    async fn register(
        &self,
        directory_url: &str,
        contact: &[String],
    ) -> Result<(Arc<dyn AcmeAccount>, AccountKey), ProtocolError>;
}

#[async_trait]
pub trait AcmeAccount: Send + Sync {
    async fn new_order(&self, domains: &[String]) -> Result<OrderHandle, ProtocolError>;

    async fn authorizations(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<AuthorizationHandle>, ProtocolError>;

    /// `None` when the authorization offers no challenge of `kind`, e.g.
    /// because it is already valid.
    async fn challenge(
        &self,
        authorization: &AuthorizationHandle,
        kind: ChallengeKind,
    ) -> Result<Option<ChallengeHandle>, ProtocolError>;

    /// Tells the authority the challenge response is in place.
    async fn validate(&self, challenge: &ChallengeHandle) -> Result<ChallengeState, ProtocolError>;

    /// Re-fetches the challenge.
    async fn resource(&self, challenge: &ChallengeHandle) -> Result<ChallengeState, ProtocolError>;

    /// Finalizes the order with a DER encoded CSR and downloads the PEM chain.
    async fn generate(&self, order: &OrderHandle, csr_der: &[u8]) -> Result<String, ProtocolError>;
}
