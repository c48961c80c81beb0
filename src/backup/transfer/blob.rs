use crate::backup::coordinator::{TaskCoordinator, UnitOfWork};
use crate::backup::function_path;
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use bon::Builder;
use derive_more::{Display, From};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use validator::Validate;

/// Identifier a [`BlobStore`] hands back for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(Arc<str>);

impl BlobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlobId {
    fn from(value: String) -> Self {
        BlobId(value.into())
    }
}

/// Remote object storage, treated as an opaque capability.
///
/// Implementations report an unreachable or refusing remote as
/// [`Error::TransportFailure`]; that is the only kind a [`RetryPolicy`]
/// retries.
pub trait BlobStore: Send + Sync {
    /// Stores `local` as `name` under `folder`.
    fn put(&self, local: &Path, folder: &str, name: &str) -> Result<BlobId>;

    /// Fetches a blob by id or by bare name into the file `dest`.
    fn get(&self, id_or_name: &str, dest: &Path) -> Result<PathBuf>;

    /// Blobs under `folder`, sorted.
    fn list(&self, folder: &str) -> Result<Vec<BlobId>>;

    /// Removes the blob `id`. Removing a blob that is already gone succeeds.
    fn delete(&self, id: &BlobId) -> Result<()>;
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(1)
}

/// How often a transfer unit retries a transport failure before giving up.
/// The wait grows linearly: `backoff`, `2 * backoff`, ...
#[derive(Clone, Debug, PartialEq, Eq, Validate, Serialize, Deserialize, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RetryPolicy {
    #[validate(range(min = 1, max = 20))]
    #[serde(default = "default_attempts")]
    #[builder(default = default_attempts())]
    attempts: u32,
    #[serde(default = "default_backoff", with = "humantime_serde")]
    #[builder(default = default_backoff())]
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: default_backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn run<T, F>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut tried = 1;
        loop {
            match attempt() {
                Err(e) if e.kind() == ErrorKind::TransportFailure && tried < self.attempts => {
                    let wait = self.backoff * tried;
                    tracing::warn!(
                        "{what} failed (attempt {tried}/{}), retrying in {wait:?}: {e}",
                        self.attempts
                    );
                    std::thread::sleep(wait);
                    tried += 1;
                }
                res => return res,
            }
        }
    }
}

struct UploadBlob {
    store: Arc<dyn BlobStore>,
    local: PathBuf,
    folder: Arc<str>,
    name: Arc<str>,
    retry: RetryPolicy,
    id: Arc<OnceLock<BlobId>>,
}

impl UnitOfWork for UploadBlob {
    fn identifier(&self) -> Arc<str> {
        self.name.clone()
    }

    fn execute(self) -> Result<()> {
        let what = format!("Upload of {}", self.name);
        let id = self
            .retry
            .run(&what, || self.store.put(&self.local, &self.folder, &self.name))?;
        tracing::debug!("Uploaded {:?} as {}", self.local, id);
        let _ = self.id.set(id);
        Ok(())
    }
}

struct DownloadBlob {
    store: Arc<dyn BlobStore>,
    id_or_name: Arc<str>,
    dest: PathBuf,
    retry: RetryPolicy,
}

impl UnitOfWork for DownloadBlob {
    fn identifier(&self) -> Arc<str> {
        self.id_or_name.clone()
    }

    fn execute(self) -> Result<()> {
        let what = format!("Download of {}", self.id_or_name);
        self.retry
            .run(&what, || self.store.get(&self.id_or_name, &self.dest))
            .map(|_| ())
    }
}

/// Uploads every file of `files` into `folder`, named after its file name.
///
/// Returns the ids in the order of `files`. Any failed upload fails the
/// call: a partial remote set cannot be restored from.
#[named]
pub fn upload_all(
    store: Arc<dyn BlobStore>,
    files: &[PathBuf],
    folder: &str,
    retry: &RetryPolicy,
    coordinator: &TaskCoordinator,
) -> Result<Vec<BlobId>> {
    let folder: Arc<str> = folder.into();
    let mut slots = Vec::with_capacity(files.len());
    let mut units = Vec::with_capacity(files.len());
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("{:?} has no usable file name", file)))?;
        let slot = Arc::new(OnceLock::new());
        slots.push(slot.clone());
        units.push(UploadBlob {
            store: store.clone(),
            local: file.clone(),
            folder: folder.clone(),
            name: name.into(),
            retry: retry.clone(),
            id: slot,
        });
    }

    coordinator
        .run("Upload", units)
        .into_hard_result()
        .add_fn_name(function_path!())?;

    slots
        .into_iter()
        .zip(files)
        .map(|(slot, file)| {
            slot.get().cloned().ok_or_else(|| {
                Error::TransportFailure(format!("no id recorded for upload of {:?}", file))
            })
        })
        .collect()
}

/// Downloads each blob of `ids` into `dest_dir`, under the blob's own name
/// (the part after the last `/` of its id).
#[named]
pub fn download_all(
    store: Arc<dyn BlobStore>,
    ids: &[BlobId],
    dest_dir: &Path,
    retry: &RetryPolicy,
    coordinator: &TaskCoordinator,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dest_dir)?;
    let (units, paths): (Vec<_>, Vec<_>) = ids
        .iter()
        .map(|id| {
            let name = id.as_str().rsplit('/').next().unwrap_or(id.as_str());
            let dest = dest_dir.join(name);
            let unit = DownloadBlob {
                store: store.clone(),
                id_or_name: id.0.clone(),
                dest: dest.clone(),
                retry: retry.clone(),
            };
            (unit, dest)
        })
        .unzip();

    coordinator
        .run("Download", units)
        .into_hard_result()
        .add_fn_name(function_path!())?;
    Ok(paths)
}
