use std::time::Duration;

use crate::{ChallengeKind, RenewalError};

pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_PRODUCTION_DIRECTORY: &str =
    "https://acme-v02.api.letsencrypt.org/directory";

/// What happens when a renewal attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalFailMode {
    /// The background task ends with the error and the timer is disarmed.
    Unhandled,
    /// Log the error and keep the normal renewal period.
    LogAndContinue,
    /// Log the error and try again after the retry interval.
    LogAndRetry,
}

/// Controls the first firing of the renewal timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Fire as soon as the service is started.
    Immediate,
    /// Fire once the challenge server signals that it is ready to answer.
    Delayed,
    /// Fire when the host calls [crate::RenewalService::trigger].
    Manual,
}

/// Key type of the certificate signing request. Only curves public ACME
/// authorities accept are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    pub(crate) fn signature_algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }
}

/// Subject fields of the certificate signing request. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrInfo {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub country_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenewalConfig {
    pub(crate) domains: Vec<String>,
    pub(crate) contact: Vec<String>,
    pub(crate) directory_url: String,
    pub(crate) renew_before_expiry: Option<Duration>,
    pub(crate) renew_after_issue: Option<Duration>,
    pub(crate) fail_mode: RenewalFailMode,
    pub(crate) startup_mode: StartupMode,
    pub(crate) startup_delay: Duration,
    pub(crate) renewal_period: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) challenge_kind: ChallengeKind,
    pub(crate) csr: CsrInfo,
    pub(crate) key_algorithm: KeyAlgorithm,
}

impl RenewalConfig {
    /// Defaults: Let's Encrypt staging directory, renew 30 days before
    /// expiry, hourly checks, one minute retry interval, HTTP-01 challenges.
    pub fn new(domains: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for domain in domains {
            let domain = domain.as_ref().to_string();
            if !unique.contains(&domain) {
                unique.push(domain);
            }
        }
        Self {
            domains: unique,
            contact: vec![],
            directory_url: LETS_ENCRYPT_STAGING_DIRECTORY.into(),
            renew_before_expiry: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            renew_after_issue: None,
            fail_mode: RenewalFailMode::LogAndContinue,
            startup_mode: StartupMode::Immediate,
            startup_delay: Duration::ZERO,
            renewal_period: Duration::from_secs(60 * 60),
            retry_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            challenge_kind: ChallengeKind::Http01,
            csr: CsrInfo::default(),
            key_algorithm: KeyAlgorithm::EcdsaP256,
        }
    }

    /// Set custom directory
    pub fn directory(mut self, directory_url: impl AsRef<str>) -> Self {
        self.directory_url = directory_url.as_ref().into();
        self
    }

    /// Use Let's Encrypt production directory if `true`, staging otherwise.
    pub fn directory_lets_encrypt(mut self, production: bool) -> Self {
        self.directory_url = match production {
            true => LETS_ENCRYPT_PRODUCTION_DIRECTORY,
            false => LETS_ENCRYPT_STAGING_DIRECTORY,
        }
        .into();
        self
    }

    pub fn contact(mut self, contact: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.contact = contact.into_iter().map(|c| c.as_ref().into()).collect();
        self
    }

    pub fn contact_push(mut self, contact: impl AsRef<str>) -> Self {
        self.contact.push(contact.as_ref().into());
        self
    }

    pub fn renew_before_expiry(mut self, window: Option<Duration>) -> Self {
        self.renew_before_expiry = window;
        self
    }

    pub fn renew_after_issue(mut self, window: Option<Duration>) -> Self {
        self.renew_after_issue = window;
        self
    }

    pub fn fail_mode(mut self, fail_mode: RenewalFailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    pub fn startup_mode(mut self, startup_mode: StartupMode) -> Self {
        self.startup_mode = startup_mode;
        self
    }

    /// Extra wait before the first firing, applied in every startup mode.
    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn renewal_period(mut self, period: Duration) -> Self {
        self.renewal_period = period;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn challenge_kind(mut self, kind: ChallengeKind) -> Self {
        self.challenge_kind = kind;
        self
    }

    pub fn csr(mut self, csr: CsrInfo) -> Self {
        self.csr = csr;
        self
    }

    pub fn key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = algorithm;
        self
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    pub fn validate(&self) -> Result<(), RenewalError> {
        if self.renew_before_expiry.is_none() && self.renew_after_issue.is_none() {
            return Err(RenewalError::Configuration(
                "neither renew_before_expiry nor renew_after_issue is set, \
                 the certificate would never be renewed"
                    .into(),
            ));
        }
        if self.domains.is_empty() {
            return Err(RenewalError::Configuration("no domains configured".into()));
        }
        if self.renewal_period.is_zero() || self.retry_interval.is_zero() {
            return Err(RenewalError::Configuration(
                "renewal period and retry interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
