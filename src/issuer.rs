use std::time::Duration;

use base64::prelude::*;
use futures::future::try_join_all;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use tokio_util::sync::CancellationToken;

use crate::certificate::bundle_pem;
use crate::protocol::{AcmeAccount, ChallengeHandle, ChallengeState, OrderHandle};
use crate::{
    CertificateError, ChallengeKind, ChallengeOutcome, ChallengeRecord, ChallengeStatus, CsrInfo,
    KeyAlgorithm, OrderInvalidError, RenewalConfig, RenewalError,
};

/// An order whose challenges are known but not yet published or validated.
/// Lives for a single renewal attempt.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub domains: Vec<String>,
    pub challenges: Vec<ChallengeRecord>,
    pub order: OrderHandle,
    pub challenge_handles: Vec<ChallengeHandle>,
}

/// Drives one order from placement to a signed certificate.
#[derive(Debug, Clone)]
pub struct IssuanceClient {
    challenge_kind: ChallengeKind,
    csr: CsrInfo,
    key_algorithm: KeyAlgorithm,
    poll_interval: Duration,
}

impl IssuanceClient {
    pub fn new(config: &RenewalConfig) -> Self {
        Self {
            challenge_kind: config.challenge_kind,
            csr: config.csr.clone(),
            key_algorithm: config.key_algorithm,
            poll_interval: config.poll_interval,
        }
    }

    pub async fn place_order(
        &self,
        account: &dyn AcmeAccount,
        domains: &[String],
    ) -> Result<PlacedOrder, RenewalError> {
        log::info!("ordering certificate for domains {:?}", domains);
        let order = account.new_order(domains).await?;
        let authorizations = account.authorizations(&order).await?;
        let handles = try_join_all(
            authorizations
                .iter()
                .map(|auth| account.challenge(auth, self.challenge_kind)),
        )
        .await?;

        let mut challenges = Vec::new();
        let mut challenge_handles = Vec::new();
        for (auth, handle) in authorizations.iter().zip(handles) {
            let handle = match handle {
                Some(handle) => handle,
                None => {
                    log::debug!(
                        "no {} challenge for {}, skipping",
                        self.challenge_kind,
                        auth.domain
                    );
                    continue;
                }
            };
            let token = match handle.kind {
                ChallengeKind::Dns01 => dns_txt_value(&handle.key_authorization),
                ChallengeKind::Http01 => handle.token.clone(),
            };
            challenges.push(ChallengeRecord {
                token,
                response: handle.key_authorization.clone(),
                domains: vec![auth.domain.clone()],
                kind: handle.kind,
            });
            challenge_handles.push(handle);
        }

        Ok(PlacedOrder {
            domains: domains.to_vec(),
            challenges,
            order,
            challenge_handles,
        })
    }

    /// Validates the order's challenges and returns the signed certificate as
    /// a PEM bundle. The challenge responses must already be published.
    ///
    /// The private key is bundled as plain PEM, without password protection.
    /// Stores holding the bundle are responsible for protecting it at rest.
    pub async fn finalize_order(
        &self,
        account: &dyn AcmeAccount,
        placed: &PlacedOrder,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RenewalError> {
        self.validate_challenges(account, &placed.challenge_handles, cancel)
            .await?;

        log::info!("acquiring certificate through signing request");
        let (key_pair, csr_der) = self.certificate_signing_request(&placed.domains)?;
        let chain = account.generate(&placed.order, &csr_der).await?;
        log::info!("certificate acquired");
        Ok(bundle_pem(&key_pair.serialize_pem(), &chain))
    }

    async fn validate_challenges(
        &self,
        account: &dyn AcmeAccount,
        handles: &[ChallengeHandle],
        cancel: &CancellationToken,
    ) -> Result<(), RenewalError> {
        log::info!("validating all pending order authorizations");
        let states = self.poll_until_settled(account, handles, cancel).await?;
        if states.iter().all(|s| s.status == ChallengeStatus::Valid) {
            return Ok(());
        }

        let challenges = handles
            .iter()
            .zip(states)
            .map(|(handle, state)| {
                let (error_type, detail) = match state.error {
                    Some(problem) => (problem.error_type, problem.detail),
                    None => (None, None),
                };
                ChallengeOutcome {
                    token: handle.token.clone(),
                    kind: state.kind,
                    status: state.status,
                    error_type,
                    detail,
                }
            })
            .collect();
        Err(OrderInvalidError { challenges }.into())
    }

    /// Polls until every challenge is valid or one of them is invalid.
    async fn poll_until_settled(
        &self,
        account: &dyn AcmeAccount,
        handles: &[ChallengeHandle],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChallengeState>, RenewalError> {
        let mut states = try_join_all(handles.iter().map(|h| account.validate(h))).await?;
        loop {
            let all_valid = states.iter().all(|s| s.status == ChallengeStatus::Valid);
            let any_invalid = states.iter().any(|s| s.status == ChallengeStatus::Invalid);
            if all_valid || any_invalid {
                return Ok(states);
            }
            log::trace!("challenges pending, polling again in {:?}", self.poll_interval);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RenewalError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            states = try_join_all(handles.iter().map(|h| account.resource(h))).await?;
        }
    }

    fn certificate_signing_request(
        &self,
        domains: &[String],
    ) -> Result<(KeyPair, Vec<u8>), CertificateError> {
        let key_pair = KeyPair::generate_for(self.key_algorithm.signature_algorithm())?;
        let mut params = CertificateParams::new(domains.to_vec())?;
        params.distinguished_name = distinguished_name(&self.csr);
        let csr = params.serialize_request(&key_pair)?;
        let der = csr.der().to_vec();
        Ok((key_pair, der))
    }
}

fn distinguished_name(csr: &CsrInfo) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    let fields = [
        (DnType::CommonName, &csr.common_name),
        (DnType::OrganizationName, &csr.organization),
        (DnType::OrganizationalUnitName, &csr.organization_unit),
        (DnType::LocalityName, &csr.locality),
        (DnType::StateOrProvinceName, &csr.state),
        (DnType::CountryName, &csr.country_name),
    ];
    for (ty, value) in fields {
        if let Some(value) = value {
            name.push(ty, value.as_str());
        }
    }
    name
}

/// TXT record value for a DNS-01 challenge.
pub(crate) fn dns_txt_value(key_authorization: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(digest(&SHA256, key_authorization.as_bytes()))
}
