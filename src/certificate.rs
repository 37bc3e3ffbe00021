use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use rustls::sign::CertifiedKey;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::CertificateError;

/// The two kinds of material the certificate stores hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateKind {
    AccountKey,
    SiteCertificate,
}

impl fmt::Display for CertificateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateKind::AccountKey => write!(f, "account_key"),
            CertificateKind::SiteCertificate => write!(f, "site_certificate"),
        }
    }
}

/// Shape shared by account keys and site certificates.
pub trait Certificate: Send + Sync {
    fn not_before(&self) -> Result<DateTime<Utc>, CertificateError>;
    fn not_after(&self) -> Result<DateTime<Utc>, CertificateError>;
    /// Hex encoded SHA-256 fingerprint.
    fn thumbprint(&self) -> &str;
    fn raw_bytes(&self) -> &[u8];
}

/// Credentials of the issuing-authority account, as produced by the protocol
/// client when the account was registered. Opaque to this crate.
#[derive(Clone)]
pub struct AccountKey {
    raw: Vec<u8>,
    thumbprint: String,
}

impl AccountKey {
    pub fn new(raw: Vec<u8>) -> Self {
        let thumbprint = sha256_hex(&raw);
        Self { raw, thumbprint }
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

impl Certificate for AccountKey {
    fn not_before(&self) -> Result<DateTime<Utc>, CertificateError> {
        Err(CertificateError::NoValidityPeriod)
    }

    fn not_after(&self) -> Result<DateTime<Utc>, CertificateError> {
        Err(CertificateError::NoValidityPeriod)
    }

    fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// A certificate chain together with its private key, usable for TLS
/// termination.
///
/// The raw form is a PEM bundle holding one private key and the chain, leaf
/// first. This is the exact byte sequence that gets persisted.
pub struct SiteCertificate {
    raw: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    thumbprint: String,
    domains: Vec<String>,
    certified_key: Arc<CertifiedKey>,
}

impl SiteCertificate {
    pub fn from_pem(raw: Vec<u8>) -> Result<Self, CertificateError> {
        let pems = pem::parse_many(&raw)?;
        let mut key = None;
        let mut chain = Vec::new();
        for pem in pems {
            let contents = pem.contents().to_vec();
            match pem.tag() {
                "CERTIFICATE" => chain.push(CertificateDer::from(contents)),
                "PRIVATE KEY" => {
                    key = Some(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(contents)))
                }
                "EC PRIVATE KEY" => {
                    key = Some(PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(contents)))
                }
                "RSA PRIVATE KEY" => {
                    key = Some(PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(contents)))
                }
                other => log::debug!("ignoring pem section {}", other),
            }
        }
        let key = key.ok_or(CertificateError::MissingPrivateKey)?;
        let leaf = chain.first().ok_or(CertificateError::MissingCertificate)?;

        let (_, parsed) =
            parse_x509_certificate(leaf).map_err(|e| CertificateError::X509(e.to_string()))?;
        let validity = parsed.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;
        let domains = match parsed.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertificateError::X509(e.to_string())),
        };
        let thumbprint = sha256_hex(leaf);

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;
        let certified_key = Arc::new(CertifiedKey::new(chain, signing_key));

        Ok(Self {
            raw,
            not_before,
            not_after,
            thumbprint,
            domains,
            certified_key,
        })
    }

    /// DNS names from the leaf's subject alternative name extension.
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }
}

impl Certificate for SiteCertificate {
    fn not_before(&self) -> Result<DateTime<Utc>, CertificateError> {
        Ok(self.not_before)
    }

    fn not_after(&self) -> Result<DateTime<Utc>, CertificateError> {
        Ok(self.not_after)
    }

    fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Debug for SiteCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCertificate")
            .field("thumbprint", &self.thumbprint)
            .field("domains", &self.domains)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Private key first, then the chain.
pub(crate) fn bundle_pem(key_pem: &str, chain_pem: &str) -> Vec<u8> {
    [key_pem, "\n", chain_pem].concat().into_bytes()
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or(CertificateError::TimestampOutOfRange)
}

fn sha256_hex(data: &[u8]) -> String {
    digest(&SHA256, data)
        .as_ref()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
