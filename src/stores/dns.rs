use std::fmt;

use async_trait::async_trait;

use crate::{ChallengeKind, ChallengeRecord, ChallengeStore, StoreError};

const TXT_RECORD_TYPE: &str = "TXT";

/// Creates and removes TXT records at a DNS provider.
#[async_trait]
pub trait DnsRecordPublisher: Send + Sync + fmt::Display {
    async fn create_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<(), StoreError>;
    async fn delete_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<(), StoreError>;
}

/// Publishes DNS-01 challenges as `_acme-challenge` TXT records, one per
/// domain of each challenge. Nothing can be read back.
pub struct DnsChallengeStore<P> {
    publisher: P,
}

impl<P: DnsRecordPublisher> DnsChallengeStore<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    pub fn into_inner(self) -> P {
        self.publisher
    }
}

impl<P: DnsRecordPublisher> fmt::Display for DnsChallengeStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DnsChallengeStore({})", self.publisher)
    }
}

#[async_trait]
impl<P: DnsRecordPublisher> ChallengeStore for DnsChallengeStore<P> {
    fn accepts(&self, kind: ChallengeKind) -> bool {
        kind == ChallengeKind::Dns01
    }

    async fn persist(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        for challenge in challenges.iter().filter(|c| c.kind == ChallengeKind::Dns01) {
            for domain in &challenge.domains {
                let name = ChallengeRecord::dns_record_name(domain);
                log::trace!("creating {} record {}", TXT_RECORD_TYPE, name);
                self.publisher
                    .create_record(&name, TXT_RECORD_TYPE, &challenge.token)
                    .await?;
            }
        }
        Ok(())
    }

    async fn retrieve(&self) -> Result<Vec<ChallengeRecord>, StoreError> {
        Ok(Vec::new())
    }

    /// Attempts every record and reports the first failure.
    async fn delete(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        let mut first_error = None;
        for challenge in challenges.iter().filter(|c| c.kind == ChallengeKind::Dns01) {
            for domain in &challenge.domains {
                let name = ChallengeRecord::dns_record_name(domain);
                log::trace!("deleting {} record {}", TXT_RECORD_TYPE, name);
                if let Err(err) = self
                    .publisher
                    .delete_record(&name, TXT_RECORD_TYPE, &challenge.token)
                    .await
                {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
