use std::fmt::Display;

use async_trait::async_trait;

use crate::{CertificateKind, ChallengeKind, ChallengeRecord, StoreError};

/// Backend holding account keys and site certificates as raw bytes.
#[async_trait]
pub trait CertificateStore: Send + Sync + Display {
    async fn persist(&self, kind: CertificateKind, bytes: &[u8]) -> Result<(), StoreError>;
    async fn retrieve(&self, kind: CertificateKind) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Backend publishing challenge responses so the issuing authority can read
/// them back during validation.
#[async_trait]
pub trait ChallengeStore: Send + Sync + Display {
    fn accepts(&self, kind: ChallengeKind) -> bool;
    async fn persist(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError>;
    async fn retrieve(&self) -> Result<Vec<ChallengeRecord>, StoreError>;
    async fn delete(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError>;
}
