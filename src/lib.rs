//! An async, [tokio] based certificate renewal engine for [ACME] issuing authorities such as
//! [Let's Encrypt](https://letsencrypt.org/).
//!
//! The engine decides when the certificate a process is serving must be replaced, drives an order
//! through the issuing authority, publishes the domain validation challenges while the order is
//! validated and keeps account keys and certificates in pluggable stores.
//! The ACME wire protocol itself (request signing, nonces, JWS) is left to an adapter implementing
//! the traits in the [protocol] module.
//!
//! To use acme-renewal add the following lines to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! acme-renewal = "*"
//! ```
//!
//! ## High-level API
//!
//! The [RenewalService] runs a background timer. Every firing checks the current certificate,
//! falls back to a persisted one and orders a new certificate when neither is valid anymore.
//! A rustls server picks up each new certificate through [ResolvesServerCertRenewal].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acme_renewal::protocol::AcmeDirectory;
//! use acme_renewal::stores::DirStore;
//! use acme_renewal::{
//!     PersistenceService, RenewalConfig, RenewalService, ResolvesServerCertRenewal,
//! };
//!
//! async fn serve(directory: Arc<dyn AcmeDirectory>) {
//!     simple_logger::init_with_level(log::Level::Info).unwrap();
//!
//!     let store = DirStore::new("./acme_renewal_store");
//!     let persistence = PersistenceService::new()
//!         .certificate_store(store.clone())
//!         .challenge_store(store);
//!     let config = RenewalConfig::new(["example.com"])
//!         .contact_push("mailto:admin@example.com");
//!
//!     let service = RenewalService::new(config, persistence, directory);
//!     let resolver = ResolvesServerCertRenewal::new(service.certificate_accessor());
//!     let tls_config = rustls::ServerConfig::builder()
//!         .with_no_client_auth()
//!         .with_cert_resolver(resolver);
//!
//!     service.start().await.unwrap();
//!     // accept connections with `tls_config`, answer
//!     // `/.well-known/acme-challenge/<token>` from `service.find_challenge(token)`
//!     # drop(tls_config);
//!     service.join().await.unwrap();
//! }
//! ```
//!
//! Note that [RenewalConfig] uses the let's encrypt staging directory by default.
//! The production directory imposes strict rate limits, which are easily exhausted accidentally
//! during testing and development.
//!
//! ## Startup and failure modes
//!
//! The first timer firing happens right after [RenewalService::start] ([StartupMode::Immediate]),
//! once the challenge endpoint called [RenewalService::signal_ready] ([StartupMode::Delayed]) or
//! once the host called [RenewalService::trigger] ([StartupMode::Manual]).
//! A failed attempt is either logged ([RenewalFailMode::LogAndContinue]), logged and retried after
//! a short interval ([RenewalFailMode::LogAndRetry]), or ends the service, surfacing the error from
//! [RenewalService::join] ([RenewalFailMode::Unhandled]).
//!
//! ## Persistence
//!
//! A production server using the let's encrypt production directory must persist both the account
//! key and the certificate to avoid exhausting the let's encrypt API rate limits.
//! [PersistenceService] writes certificates to every [CertificateStore] and reads them back from
//! the first store that has them. Challenges are routed to the [ChallengeStore]s accepting their
//! kind. A directory based store is provided by [stores::DirStore], DNS-01 challenges can be
//! published through [stores::DnsChallengeStore].
//!
//! [ACME]: https://en.wikipedia.org/wiki/Automatic_Certificate_Management_Environment

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod authenticator;
mod cache;
mod certificate;
mod challenge;
mod config;
mod error;
mod issuer;
mod persistence;
pub mod protocol;
mod provider;
mod resolver;
mod service;
mod state;
pub mod stores;
mod validator;

#[cfg(test)]
mod test_support;

pub use authenticator::*;
pub use cache::*;
pub use certificate::*;
pub use challenge::*;
pub use config::*;
pub use error::*;
pub use issuer::*;
pub use persistence::*;
pub use provider::*;
pub use resolver::*;
pub use service::*;
pub use state::{ServiceState, Trigger};
pub use validator::*;
