//! Fixtures shared by the unit tests: self-signed bundles and a scripted
//! in-process authority.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::protocol::{
    AcmeAccount, AcmeDirectory, AuthorizationHandle, ChallengeHandle, ChallengeState, OrderHandle,
    Problem,
};
use crate::stores::{MemoryChallengeStore, TestStore};
use crate::{
    AccountKey, ChallengeKind, ChallengeRecord, ChallengeStatus, ChallengeStore,
    PersistenceService, ProtocolError, StoreError,
};

pub(crate) fn self_signed(
    domains: &[&str],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Vec<u8> {
    let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    TestStore::sign(&domains, not_before, not_after).unwrap()
}

/// Bundle valid from a minute ago for `days`.
pub(crate) fn fresh_bundle(domains: &[&str], days: i64) -> Vec<u8> {
    let now = Utc::now();
    self_signed(domains, now - Duration::minutes(1), now + Duration::days(days))
}

/// The certificate part of a bundle.
fn chain_of(bundle: &[u8]) -> String {
    let text = String::from_utf8(bundle.to_vec()).unwrap();
    let start = text.find("-----BEGIN CERTIFICATE-----").unwrap();
    text[start..].to_string()
}

/// Statuses a challenge reports: the first on `validate`, one more per
/// `resource` call, the last one repeating.
#[derive(Clone)]
pub(crate) struct Script {
    statuses: Vec<ChallengeStatus>,
    error: Option<Problem>,
}

impl Script {
    pub(crate) fn fixed(status: ChallengeStatus) -> Self {
        Self {
            statuses: vec![status],
            error: None,
        }
    }

    pub(crate) fn pending_then(pending: usize, status: ChallengeStatus) -> Self {
        let mut statuses = vec![ChallengeStatus::Pending; pending];
        statuses.push(status);
        Self {
            statuses,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error_type: &str, detail: &str) -> Self {
        self.error = Some(Problem {
            error_type: Some(error_type.to_string()),
            detail: Some(detail.to_string()),
        });
        self
    }

    fn at(&self, step: usize) -> ChallengeStatus {
        self.statuses[step.min(self.statuses.len() - 1)]
    }
}

#[derive(Default)]
pub(crate) struct MockState {
    domains: Vec<String>,
    scripts: HashMap<String, Script>,
    already_valid: HashSet<String>,
    /// Number of orders rejected before the authority starts accepting them.
    fail_orders: usize,
    published_in: Option<PersistenceService>,
    steps: Mutex<HashMap<String, usize>>,
    pub chain: String,
    pub csr_received: Mutex<Option<Vec<u8>>>,
    pub logins: AtomicUsize,
    pub registrations: AtomicUsize,
    pub orders: AtomicUsize,
    pub validations: AtomicUsize,
    pub resource_calls: AtomicUsize,
    pub unpublished_validations: AtomicUsize,
}

/// Authority answering every call from memory. Every challenge is valid
/// unless scripted otherwise.
#[derive(Clone)]
pub(crate) struct MockAcme {
    state: Arc<MockState>,
}

impl Deref for MockAcme {
    type Target = MockState;

    fn deref(&self) -> &MockState {
        &self.state
    }
}

impl MockAcme {
    pub(crate) fn new(domains: &[String]) -> Self {
        let names: Vec<&str> = domains.iter().map(|d| d.as_str()).collect();
        Self {
            state: Arc::new(MockState {
                domains: domains.to_vec(),
                chain: chain_of(&fresh_bundle(&names, 90)),
                ..Default::default()
            }),
        }
    }

    fn configure(&mut self) -> &mut MockState {
        Arc::get_mut(&mut self.state).expect("configure the mock before sharing it")
    }

    pub(crate) fn script(mut self, domain: &str, script: Script) -> Self {
        self.configure().scripts.insert(domain.to_string(), script);
        self
    }

    pub(crate) fn already_valid(mut self, domain: &str) -> Self {
        self.configure().already_valid.insert(domain.to_string());
        self
    }

    pub(crate) fn failing_orders(self) -> Self {
        self.failing_first_orders(usize::MAX)
    }

    pub(crate) fn failing_first_orders(mut self, count: usize) -> Self {
        self.configure().fail_orders = count;
        self
    }

    /// Issued certificates expire after `days`.
    pub(crate) fn issuing_days(mut self, days: i64) -> Self {
        let state = self.configure();
        let names: Vec<&str> = state.domains.iter().map(|d| d.as_str()).collect();
        state.chain = chain_of(&fresh_bundle(&names, days));
        self
    }

    /// Counts validations of challenges not present in `persistence`.
    pub(crate) fn published_in(mut self, persistence: PersistenceService) -> Self {
        self.configure().published_in = Some(persistence);
        self
    }

    pub(crate) fn directory(&self) -> Arc<dyn AcmeDirectory> {
        Arc::new(self.clone())
    }

    fn domain_of(challenge: &ChallengeHandle) -> &str {
        challenge.token.trim_start_matches("token-")
    }

    fn state_at(&self, challenge: &ChallengeHandle, step: usize) -> ChallengeState {
        let script = self
            .scripts
            .get(Self::domain_of(challenge))
            .cloned()
            .unwrap_or_else(|| Script::fixed(ChallengeStatus::Valid));
        ChallengeState {
            kind: challenge.kind,
            status: script.at(step),
            error: script.error,
        }
    }
}

#[async_trait]
impl AcmeDirectory for MockAcme {
    async fn login(
        &self,
        _directory_url: &str,
        _account_key: &AccountKey,
    ) -> Result<Arc<dyn AcmeAccount>, ProtocolError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }

    async fn register(
        &self,
        _directory_url: &str,
        _contact: &[String],
    ) -> Result<(Arc<dyn AcmeAccount>, AccountKey), ProtocolError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok((
            Arc::new(self.clone()),
            AccountKey::new(b"mock-account-key".to_vec()),
        ))
    }
}

#[async_trait]
impl AcmeAccount for MockAcme {
    async fn new_order(&self, domains: &[String]) -> Result<OrderHandle, ProtocolError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_orders {
            return Err(ProtocolError::new("rate limited"));
        }
        assert_eq!(domains, self.domains);
        Ok(OrderHandle {
            url: format!("https://acme.test/order/{}", n),
        })
    }

    async fn authorizations(
        &self,
        _order: &OrderHandle,
    ) -> Result<Vec<AuthorizationHandle>, ProtocolError> {
        Ok(self
            .domains
            .iter()
            .map(|domain| AuthorizationHandle {
                url: format!("https://acme.test/authz/{}", domain),
                domain: domain.clone(),
            })
            .collect())
    }

    async fn challenge(
        &self,
        authorization: &AuthorizationHandle,
        kind: ChallengeKind,
    ) -> Result<Option<ChallengeHandle>, ProtocolError> {
        if self.already_valid.contains(&authorization.domain) {
            return Ok(None);
        }
        let token = format!("token-{}", authorization.domain);
        Ok(Some(ChallengeHandle {
            url: format!("https://acme.test/chall/{}", authorization.domain),
            kind,
            key_authorization: format!("{}.thumbprint", token),
            token,
        }))
    }

    async fn validate(&self, challenge: &ChallengeHandle) -> Result<ChallengeState, ProtocolError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if let Some(persistence) = &self.published_in {
            let published = persistence
                .retrieve_challenges()
                .await
                .iter()
                .any(|c| c.response == challenge.key_authorization);
            if !published {
                self.unpublished_validations.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.steps.lock().unwrap().insert(challenge.token.clone(), 0);
        Ok(self.state_at(challenge, 0))
    }

    async fn resource(&self, challenge: &ChallengeHandle) -> Result<ChallengeState, ProtocolError> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            let step = steps.entry(challenge.token.clone()).or_insert(0);
            *step += 1;
            *step
        };
        Ok(self.state_at(challenge, step))
    }

    async fn generate(
        &self,
        _order: &OrderHandle,
        csr_der: &[u8],
    ) -> Result<String, ProtocolError> {
        *self.csr_received.lock().unwrap() = Some(csr_der.to_vec());
        Ok(self.chain.clone())
    }
}

/// Memory challenge store counting deletes, optionally refusing every write.
#[derive(Clone, Default)]
pub(crate) struct CountingChallengeStore {
    inner: MemoryChallengeStore,
    failing: bool,
    deletes: Arc<AtomicUsize>,
}

impl CountingChallengeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl fmt::Display for CountingChallengeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CountingChallengeStore")
    }
}

#[async_trait]
impl ChallengeStore for CountingChallengeStore {
    fn accepts(&self, kind: ChallengeKind) -> bool {
        self.inner.accepts(kind)
    }

    async fn persist(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Backend("down".into()));
        }
        self.inner.persist(challenges).await
    }

    async fn retrieve(&self) -> Result<Vec<ChallengeRecord>, StoreError> {
        self.inner.retrieve().await
    }

    async fn delete(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(challenges).await
    }
}
