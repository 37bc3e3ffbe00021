use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{Certificate, CertificateError, RenewalConfig};

const MAX_WINDOW_SECS: u64 = i64::MAX as u64 / 1000;

/// Margins that trigger replacement of a still-working certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub renew_before_expiry: Option<Duration>,
    pub renew_after_issue: Option<Duration>,
}

impl From<&RenewalConfig> for RenewalPolicy {
    fn from(config: &RenewalConfig) -> Self {
        Self {
            renew_before_expiry: config.renew_before_expiry,
            renew_after_issue: config.renew_after_issue,
        }
    }
}

/// Decides whether a certificate can stay in use.
///
/// Never fails: anything that cannot be inspected is reported as not valid.
#[derive(Debug, Clone)]
pub struct CertificateValidator {
    policy: RenewalPolicy,
}

impl CertificateValidator {
    pub fn new(policy: RenewalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RenewalPolicy {
        self.policy
    }

    pub fn is_valid(&self, certificate: Option<&dyn Certificate>) -> bool {
        self.is_valid_at(certificate, Utc::now())
    }

    pub fn is_valid_at(&self, certificate: Option<&dyn Certificate>, now: DateTime<Utc>) -> bool {
        let certificate = match certificate {
            Some(certificate) => certificate,
            None => return false,
        };
        match self.check(certificate, now) {
            Ok(valid) => valid,
            Err(err) => {
                log::error!("error inspecting certificate {}: {}", certificate.thumbprint(), err);
                false
            }
        }
    }

    fn check(
        &self,
        certificate: &dyn Certificate,
        now: DateTime<Utc>,
    ) -> Result<bool, CertificateError> {
        let not_before = certificate.not_before()?;
        let not_after = certificate.not_after()?;
        log::trace!(
            "validating {} (not before {}, not after {}) against {:?}",
            certificate.thumbprint(),
            not_before,
            not_after,
            self.policy
        );

        if let Some(window) = self.policy.renew_before_expiry {
            if not_after - now < window_to_chrono(window) {
                return Ok(false);
            }
        }
        if let Some(window) = self.policy.renew_after_issue {
            if now - not_before > window_to_chrono(window) {
                return Ok(false);
            }
        }
        if not_before > now || not_after < now {
            return Ok(false);
        }
        Ok(true)
    }
}

fn window_to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::seconds(window.as_secs().min(MAX_WINDOW_SECS) as i64)
}
