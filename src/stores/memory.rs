use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    CertificateKind, CertificateStore, ChallengeKind, ChallengeRecord, ChallengeStore, StoreError,
};

/// Process-local certificate store. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryCertificateStore {
    entries: Arc<Mutex<HashMap<CertificateKind, Vec<u8>>>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for MemoryCertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryCertificateStore")
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn persist(&self, kind: CertificateKind, bytes: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if bytes.is_empty() {
            entries.remove(&kind);
        } else {
            entries.insert(kind, bytes.to_vec());
        }
        Ok(())
    }

    async fn retrieve(&self, kind: CertificateKind) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().await.get(&kind).cloned())
    }
}

/// Process-local challenge store. Clones share the same contents.
#[derive(Clone)]
pub struct MemoryChallengeStore {
    kinds: Vec<ChallengeKind>,
    records: Arc<Mutex<Vec<ChallengeRecord>>>,
}

impl Default for MemoryChallengeStore {
    fn default() -> Self {
        Self {
            kinds: vec![ChallengeKind::Http01, ChallengeKind::Dns01],
            records: Default::default(),
        }
    }
}

impl MemoryChallengeStore {
    /// Accepts every challenge kind.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_only() -> Self {
        Self {
            kinds: vec![ChallengeKind::Http01],
            ..Self::default()
        }
    }
}

impl fmt::Display for MemoryChallengeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryChallengeStore({:?})", self.kinds)
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    fn accepts(&self, kind: ChallengeKind) -> bool {
        self.kinds.contains(&kind)
    }

    async fn persist(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.retain(|r| challenges.iter().all(|c| c.token != r.token));
        records.extend_from_slice(challenges);
        Ok(())
    }

    async fn retrieve(&self) -> Result<Vec<ChallengeRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn delete(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .retain(|r| challenges.iter().all(|c| c.token != r.token));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str) -> ChallengeRecord {
        ChallengeRecord {
            token: token.into(),
            response: "response".into(),
            domains: vec!["example.com".into()],
            kind: ChallengeKind::Http01,
        }
    }

    #[tokio::test]
    async fn empty_bytes_clear_entry() {
        let store = MemoryCertificateStore::new();
        store.persist(CertificateKind::SiteCertificate, b"cert").await.unwrap();
        store.persist(CertificateKind::SiteCertificate, b"").await.unwrap();
        assert_eq!(store.retrieve(CertificateKind::SiteCertificate).await.unwrap(), None);
    }

    #[tokio::test]
    async fn persist_replaces_same_token_and_delete_is_idempotent() {
        let store = MemoryChallengeStore::new();
        store.persist(&[record("a"), record("b")]).await.unwrap();
        store.persist(&[record("a")]).await.unwrap();
        assert_eq!(store.retrieve().await.unwrap().len(), 2);

        store.delete(&[record("a")]).await.unwrap();
        store.delete(&[record("a")]).await.unwrap();
        assert_eq!(store.retrieve().await.unwrap(), vec![record("b")]);
    }
}
