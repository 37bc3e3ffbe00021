use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    CertificateKind, CertificateStore, ChallengeKind, ChallengeRecord, ChallengeStore, StoreError,
};

const CHALLENGES_FILE: &str = "challenges.json";

/// Directory backed store for certificates and HTTP-01 challenges.
///
/// Layout: `<dir>/account_key`, `<dir>/site_certificate` and
/// `<dir>/challenges.json`. Files are replaced atomically.
#[derive(Clone)]
pub struct DirStore {
    dir: PathBuf,
    challenges: Arc<Mutex<()>>,
}

impl DirStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            challenges: Default::default(),
        }
    }

    fn path(&self, kind: CertificateKind) -> PathBuf {
        self.dir.join(kind.to_string())
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_challenges(&self) -> Result<Vec<ChallengeRecord>, StoreError> {
        match self.read(&self.dir.join(CHALLENGES_FILE)).await? {
            Some(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn write_challenges(&self, records: &[ChallengeRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        self.write(&self.dir.join(CHALLENGES_FILE), &json).await
    }
}

impl fmt::Display for DirStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirStore({})", self.dir.display())
    }
}

#[async_trait]
impl CertificateStore for DirStore {
    async fn persist(&self, kind: CertificateKind, bytes: &[u8]) -> Result<(), StoreError> {
        self.write(&self.path(kind), bytes).await
    }

    async fn retrieve(&self, kind: CertificateKind) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(&self.path(kind)).await
    }
}

#[async_trait]
impl ChallengeStore for DirStore {
    fn accepts(&self, kind: ChallengeKind) -> bool {
        kind == ChallengeKind::Http01
    }

    async fn persist(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        let _guard = self.challenges.lock().await;
        let mut records = self.read_challenges().await?;
        records.retain(|r| challenges.iter().all(|c| c.token != r.token));
        records.extend_from_slice(challenges);
        self.write_challenges(&records).await
    }

    async fn retrieve(&self) -> Result<Vec<ChallengeRecord>, StoreError> {
        let _guard = self.challenges.lock().await;
        self.read_challenges().await
    }

    async fn delete(&self, challenges: &[ChallengeRecord]) -> Result<(), StoreError> {
        let _guard = self.challenges.lock().await;
        let mut records = self.read_challenges().await?;
        let before = records.len();
        records.retain(|r| challenges.iter().all(|c| c.token != r.token));
        if records.len() == before {
            return Ok(());
        }
        self.write_challenges(&records).await
    }
}
