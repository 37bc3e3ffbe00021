use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::authenticator::AcmeAuthenticator;
use crate::issuer::{IssuanceClient, PlacedOrder};
use crate::protocol::{AcmeAccount, AcmeDirectory};
use crate::{
    Certificate, CertificateValidator, PersistenceService, RenewalConfig, RenewalError,
    RenewalPolicy, SiteCertificate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStatus {
    /// The certificate passed in is still good.
    Unchanged,
    /// A valid certificate was found in the stores.
    LoadedFromStore,
    /// A new certificate was issued and persisted.
    Renewed,
}

#[derive(Debug, Clone)]
pub struct RenewalResult {
    pub certificate: Arc<SiteCertificate>,
    pub status: RenewalStatus,
}

/// Produces a usable site certificate: keeps the current one, loads a
/// persisted one, or orders a new one, in that order of preference.
pub struct CertificateProvider {
    domains: Vec<String>,
    validator: CertificateValidator,
    persistence: PersistenceService,
    authenticator: AcmeAuthenticator,
    issuer: IssuanceClient,
}

impl CertificateProvider {
    pub fn new(
        config: &RenewalConfig,
        persistence: PersistenceService,
        directory: Arc<dyn AcmeDirectory>,
    ) -> Self {
        Self {
            domains: config.domains.clone(),
            validator: CertificateValidator::new(RenewalPolicy::from(config)),
            persistence,
            authenticator: AcmeAuthenticator::new(config, directory),
            issuer: IssuanceClient::new(config),
        }
    }

    pub fn persistence(&self) -> &PersistenceService {
        &self.persistence
    }

    pub async fn renew_if_needed(
        &self,
        current: Option<Arc<SiteCertificate>>,
        cancel: &CancellationToken,
    ) -> Result<RenewalResult, RenewalError> {
        log::info!("checking whether the in-memory certificate needs renewal");
        if let Some(current) = current {
            if self.validator.is_valid(Some(&*current)) {
                log::info!("in-memory certificate {} is valid", current.thumbprint());
                return Ok(RenewalResult {
                    certificate: current,
                    status: RenewalStatus::Unchanged,
                });
            }
        }

        log::info!("checking for a valid persisted certificate");
        if let Some(persisted) = self.persistence.retrieve_site_certificate().await {
            if self.validator.is_valid(Some(&persisted)) {
                log::info!(
                    "persisted certificate {} is valid and will be used",
                    persisted.thumbprint()
                );
                return Ok(RenewalResult {
                    certificate: Arc::new(persisted),
                    status: RenewalStatus::LoadedFromStore,
                });
            }
        }

        log::info!("no valid certificate found, requesting a new one");
        if cancel.is_cancelled() {
            return Err(RenewalError::Cancelled);
        }
        let certificate = self.request_new_certificate(cancel).await?;
        Ok(RenewalResult {
            certificate: Arc::new(certificate),
            status: RenewalStatus::Renewed,
        })
    }

    async fn request_new_certificate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SiteCertificate, RenewalError> {
        let account = self.authenticator.authenticate(&self.persistence).await?;
        let placed = self.issuer.place_order(account.as_ref(), &self.domains).await?;

        let result = self.publish_and_finalize(account.as_ref(), &placed, cancel).await;
        self.persistence.delete_challenges(&placed.challenges).await;
        result
    }

    async fn publish_and_finalize(
        &self,
        account: &dyn AcmeAccount,
        placed: &PlacedOrder,
        cancel: &CancellationToken,
    ) -> Result<SiteCertificate, RenewalError> {
        self.persistence.persist_challenges(&placed.challenges).await?;
        let bundle = self.issuer.finalize_order(account, placed, cancel).await?;
        let certificate = SiteCertificate::from_pem(bundle)?;
        self.persistence.persist_site_certificate(&certificate).await;
        Ok(certificate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCertificateStore;
    use crate::test_support::{
        fresh_bundle, self_signed, CountingChallengeStore, MockAcme, Script,
    };
    use crate::{CertificateKind, CertificateStore, ChallengeStatus, ChallengeStore};
    use chrono::{Duration, Utc};
    use std::sync::atomic::Ordering;

    struct Fixture {
        acme: MockAcme,
        certificates: MemoryCertificateStore,
        challenges: CountingChallengeStore,
        provider: CertificateProvider,
    }

    fn fixture(configure: impl FnOnce(MockAcme) -> MockAcme) -> Fixture {
        fixture_with(CountingChallengeStore::new(), configure)
    }

    fn fixture_with(
        challenges: CountingChallengeStore,
        configure: impl FnOnce(MockAcme) -> MockAcme,
    ) -> Fixture {
        let config = RenewalConfig::new(["example.com"])
            .poll_interval(std::time::Duration::from_millis(5));
        let certificates = MemoryCertificateStore::new();
        let persistence = PersistenceService::new()
            .certificate_store(certificates.clone())
            .challenge_store(challenges.clone());
        let acme = configure(MockAcme::new(config.domains()).published_in(persistence.clone()));
        let provider = CertificateProvider::new(&config, persistence, acme.directory());
        Fixture {
            acme,
            certificates,
            challenges,
            provider,
        }
    }

    fn current(days: i64) -> Arc<SiteCertificate> {
        Arc::new(SiteCertificate::from_pem(fresh_bundle(&["example.com"], days)).unwrap())
    }

    #[tokio::test]
    async fn valid_current_certificate_is_kept() {
        let f = fixture(|acme| acme);
        let cert = current(90);
        let result = f
            .provider
            .renew_if_needed(Some(cert.clone()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, RenewalStatus::Unchanged);
        assert!(Arc::ptr_eq(&result.certificate, &cert));
        assert_eq!(f.acme.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_persisted_certificate_is_loaded() {
        let f = fixture(|acme| acme);
        let bundle = fresh_bundle(&["example.com"], 90);
        f.certificates
            .persist(CertificateKind::SiteCertificate, &bundle)
            .await
            .unwrap();
        let result = f
            .provider
            .renew_if_needed(Some(current(10)), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.status, RenewalStatus::LoadedFromStore);
        assert_eq!(result.certificate.raw_bytes(), &bundle[..]);
        assert_eq!(f.acme.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_certificates_are_renewed() {
        let f = fixture(|acme| {
            acme.script("example.com", Script::pending_then(2, ChallengeStatus::Valid))
        });
        let now = Utc::now();
        let expiring = self_signed(
            &["example.com"],
            now - Duration::days(80),
            now + Duration::days(10),
        );
        f.certificates
            .persist(CertificateKind::SiteCertificate, &expiring)
            .await
            .unwrap();

        let result = f
            .provider
            .renew_if_needed(None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, RenewalStatus::Renewed);
        assert_eq!(result.certificate.domains(), ["example.com"]);
        assert_eq!(
            f.certificates
                .retrieve(CertificateKind::SiteCertificate)
                .await
                .unwrap()
                .unwrap(),
            result.certificate.raw_bytes()
        );
        assert!(f
            .certificates
            .retrieve(CertificateKind::AccountKey)
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.acme.unpublished_validations.load(Ordering::SeqCst), 0);
        assert!(f.challenges.retrieve().await.unwrap().is_empty());
        assert_eq!(f.challenges.deletes(), 1);
    }

    #[tokio::test]
    async fn challenges_are_deleted_when_validation_fails() {
        let f = fixture(|acme| {
            acme.script(
                "example.com",
                Script::fixed(ChallengeStatus::Invalid)
                    .with_error("unauthorized", "wrong response"),
            )
        });
        let err = f
            .provider
            .renew_if_needed(None, &CancellationToken::new())
            .await
            .unwrap_err();

        let invalid = match err {
            RenewalError::OrderInvalid(invalid) => invalid,
            other => panic!("unexpected error {:?}", other),
        };
        assert_eq!(invalid.challenges[0].detail.as_deref(), Some("wrong response"));
        assert!(f.challenges.retrieve().await.unwrap().is_empty());
        assert_eq!(f.challenges.deletes(), 1);
        assert_eq!(
            f.certificates
                .retrieve(CertificateKind::SiteCertificate)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn challenges_are_deleted_when_cancelled() {
        let f = fixture(|acme| acme.script("example.com", Script::fixed(ChallengeStatus::Pending)));
        let cancel = CancellationToken::new();
        let attempt = f.provider.renew_if_needed(None, &cancel);
        let canceller = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(attempt, canceller);

        assert!(matches!(result, Err(RenewalError::Cancelled)));
        assert!(f.challenges.retrieve().await.unwrap().is_empty());
        assert_eq!(f.challenges.deletes(), 1);
    }

    #[tokio::test]
    async fn failed_publication_aborts_before_validation() {
        let f = fixture_with(CountingChallengeStore::failing(), |acme| acme);
        let err = f
            .provider
            .renew_if_needed(None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RenewalError::Storage(_)));
        assert_eq!(f.acme.orders.load(Ordering::SeqCst), 1);
        assert_eq!(f.acme.validations.load(Ordering::SeqCst), 0);
        assert!(f.acme.csr_received.lock().unwrap().is_none());
        assert_eq!(f.challenges.deletes(), 1);
        assert_eq!(
            f.certificates
                .retrieve(CertificateKind::SiteCertificate)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn protocol_errors_propagate() {
        let f = fixture(|acme| acme.failing_orders());
        let err = f
            .provider
            .renew_if_needed(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RenewalError::Protocol(_)));
        assert_eq!(f.challenges.deletes(), 0);
    }
}
