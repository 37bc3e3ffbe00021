use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::{Certificate, SiteCertificate};

/// Read handle on the renewal service's current certificate. Clones observe
/// the same slot.
#[derive(Clone, Default)]
pub struct CurrentCertificate {
    slot: Arc<RwLock<Option<Arc<SiteCertificate>>>>,
}

impl CurrentCertificate {
    pub fn get(&self) -> Option<Arc<SiteCertificate>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace(&self, certificate: Arc<SiteCertificate>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(certificate);
    }
}

impl fmt::Debug for CurrentCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(certificate) => write!(f, "CurrentCertificate({})", certificate.thumbprint()),
            None => write!(f, "CurrentCertificate(None)"),
        }
    }
}

/// Serves the current certificate for every handshake.
#[derive(Debug, Clone)]
pub struct ResolvesServerCertRenewal {
    current: CurrentCertificate,
}

impl ResolvesServerCertRenewal {
    pub fn new(current: CurrentCertificate) -> Arc<Self> {
        Arc::new(Self { current })
    }
}

impl ResolvesServerCert for ResolvesServerCertRenewal {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let certificate = self.current.get();
        if certificate.is_none() {
            log::debug!(
                "no certificate yet, rejecting handshake for {:?}",
                client_hello.server_name()
            );
        }
        certificate.map(|c| c.certified_key())
    }
}
