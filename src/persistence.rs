use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use crate::{
    AccountKey, Certificate, CertificateKind, CertificateStore, ChallengeKind, ChallengeRecord,
    ChallengeStore, SiteCertificate, StoreError,
};

/// Fans persistence out over the registered stores.
///
/// Certificates are written to every store and read back from the first store
/// (in registration order) that has them. Challenges are routed to the stores
/// accepting their kind and read back from all stores.
#[derive(Clone, Default)]
pub struct PersistenceService {
    certificate_stores: Vec<Arc<dyn CertificateStore>>,
    challenge_stores: Vec<Arc<dyn ChallengeStore>>,
}

impl PersistenceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn certificate_store(mut self, store: impl CertificateStore + 'static) -> Self {
        self.certificate_stores.push(Arc::new(store));
        self
    }

    pub fn challenge_store(mut self, store: impl ChallengeStore + 'static) -> Self {
        self.challenge_stores.push(Arc::new(store));
        self
    }

    pub async fn persist_account_key(&self, key: &AccountKey) {
        self.persist(CertificateKind::AccountKey, key.raw_bytes()).await
    }

    pub async fn persist_site_certificate(&self, certificate: &SiteCertificate) {
        self.persist(CertificateKind::SiteCertificate, certificate.raw_bytes())
            .await;
        log::info!(
            "certificate {} persisted for later use",
            certificate.thumbprint()
        );
    }

    pub async fn retrieve_account_key(&self) -> Option<AccountKey> {
        self.retrieve(CertificateKind::AccountKey)
            .await
            .map(AccountKey::new)
    }

    pub async fn retrieve_site_certificate(&self) -> Option<SiteCertificate> {
        let bytes = self.retrieve(CertificateKind::SiteCertificate).await?;
        match SiteCertificate::from_pem(bytes) {
            Ok(certificate) => Some(certificate),
            Err(err) => {
                log::warn!("ignoring unreadable persisted site certificate: {}", err);
                None
            }
        }
    }

    /// Writes to every certificate store concurrently. A failing store is
    /// logged and does not affect the others.
    pub async fn persist(&self, kind: CertificateKind, bytes: &[u8]) {
        let results = join_all(
            self.certificate_stores
                .iter()
                .map(|store| store.persist(kind, bytes)),
        )
        .await;
        for (store, result) in self.certificate_stores.iter().zip(results) {
            if let Err(err) = result {
                log::warn!("could not persist {} to {}: {}", kind, store, err);
            }
        }
    }

    /// First non-empty result in registration order.
    pub async fn retrieve(&self, kind: CertificateKind) -> Option<Vec<u8>> {
        for store in &self.certificate_stores {
            match store.retrieve(kind).await {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    log::debug!("loaded {} from {}", kind, store);
                    return Some(bytes);
                }
                Ok(_) => log::trace!("no {} in {}", kind, store),
                Err(err) => log::warn!("could not load {} from {}: {}", kind, store, err),
            }
        }
        None
    }

    /// Publishes challenges to the stores accepting their kind.
    ///
    /// Fails if, for some challenge kind, every store that should have taken
    /// it failed. Challenges no store accepts are dropped with a warning.
    pub async fn persist_challenges(
        &self,
        challenges: &[ChallengeRecord],
    ) -> Result<(), StoreError> {
        self.warn_unrouted(challenges);
        let routed = self.route(challenges);
        let results = join_all(routed.iter().map(|(store, records)| store.persist(records))).await;

        let mut succeeded = HashSet::new();
        let mut failed = Vec::new();
        for ((store, records), result) in routed.iter().zip(results) {
            let kinds = records.iter().map(|r| r.kind);
            match result {
                Ok(()) => succeeded.extend(kinds),
                Err(err) => {
                    log::warn!("could not persist challenges to {}: {}", store, err);
                    failed.push((kinds.collect::<Vec<_>>(), err));
                }
            }
        }
        for (kinds, err) in failed {
            if kinds.iter().any(|kind| !succeeded.contains(kind)) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Concatenation of every store's challenges.
    pub async fn retrieve_challenges(&self) -> Vec<ChallengeRecord> {
        let results = join_all(self.challenge_stores.iter().map(|store| store.retrieve())).await;
        let mut challenges = Vec::new();
        for (store, result) in self.challenge_stores.iter().zip(results) {
            match result {
                Ok(records) => challenges.extend(records),
                Err(err) => log::warn!("could not load challenges from {}: {}", store, err),
            }
        }
        challenges
    }

    /// Removes challenges from the stores accepting their kind. Failures are
    /// logged only; deleting is cleanup and repeating it is harmless.
    pub async fn delete_challenges(&self, challenges: &[ChallengeRecord]) {
        let routed = self.route(challenges);
        let results = join_all(routed.iter().map(|(store, records)| store.delete(records))).await;
        for ((store, _), result) in routed.iter().zip(results) {
            if let Err(err) = result {
                log::warn!("could not delete challenges from {}: {}", store, err);
            }
        }
    }

    /// Looks up the HTTP-01 response for `token`.
    pub async fn find_challenge(&self, token: &str) -> Option<ChallengeRecord> {
        self.retrieve_challenges()
            .await
            .into_iter()
            .find(|c| c.kind == ChallengeKind::Http01 && c.token == token)
    }

    fn route(
        &self,
        challenges: &[ChallengeRecord],
    ) -> Vec<(&Arc<dyn ChallengeStore>, Vec<ChallengeRecord>)> {
        self.challenge_stores
            .iter()
            .map(|store| {
                let accepted = challenges
                    .iter()
                    .filter(|c| store.accepts(c.kind))
                    .cloned()
                    .collect::<Vec<_>>();
                (store, accepted)
            })
            .filter(|(_, accepted)| !accepted.is_empty())
            .collect()
    }

    fn warn_unrouted(&self, challenges: &[ChallengeRecord]) {
        for challenge in challenges {
            if !self.challenge_stores.iter().any(|s| s.accepts(challenge.kind)) {
                log::warn!(
                    "no challenge store accepts {} challenges, dropping challenge for {:?}",
                    challenge.kind,
                    challenge.domains
                );
            }
        }
    }
}
