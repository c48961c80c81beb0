//! Where a job keeps its containers: a local directory, removable media or
//! a blob store.

use crate::backup::coordinator::TaskCoordinator;
use crate::backup::fragment::{list_all_fragments, parse_fragment_index, split_fragment_name};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::transfer::{
    copy_file, copy_fragments, download_all, upload_all, BlobId, BlobStore, DirBlobStore,
    RetryPolicy,
};
use crate::backup::validate::{validate_dir_exist, validate_dir_exist_or_created, validate_folder_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationErrors};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "storage_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StorageConfig {
    /// A directory on a local disk, created when missing.
    Local { path: PathBuf },
    /// A directory on removable media. The media must already be mounted.
    Usb { path: PathBuf },
    Blob {
        store: DirBlobStore,
        folder: String,
        #[serde(default)]
        retry: RetryPolicy,
    },
}

impl Validate for StorageConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match self {
            StorageConfig::Local { path } => {
                if let Err(e) = validate_dir_exist_or_created(path) {
                    errors.add("path", e);
                }
            }
            StorageConfig::Usb { path } => {
                if let Err(e) = validate_dir_exist(path) {
                    errors.add("path", e);
                }
            }
            StorageConfig::Blob { folder, retry, .. } => {
                if let Err(e) = validate_folder_name(folder) {
                    errors.add("folder", e);
                }
                retry.validate()?;
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn file_name_of(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("{:?} has no usable file name", path)))
}

fn ids_to_strings(ids: Vec<BlobId>) -> Vec<String> {
    ids.into_iter().map(|id| id.to_string()).collect()
}

fn blob_name(id: &BlobId) -> &str {
    id.as_str().rsplit('/').next().unwrap_or_default()
}

/// Deletes the fragment blobs of `folder` that share a base name with
/// `uploaded` but are not part of it, left behind by an earlier, longer
/// upload.
fn prune_fragment_blobs(
    store: &dyn BlobStore,
    folder: &str,
    uploaded: &[BlobId],
    retry: &RetryPolicy,
) -> Result<()> {
    let bases: HashSet<&str> = uploaded
        .iter()
        .filter_map(|id| split_fragment_name(blob_name(id)).map(|(base, _)| base))
        .collect();
    let keep: HashSet<&BlobId> = uploaded.iter().collect();

    for stale in retry.run("Listing fragment blobs", || store.list(folder))? {
        let is_ours = split_fragment_name(blob_name(&stale))
            .is_some_and(|(base, _)| bases.contains(base));
        if is_ours && !keep.contains(&stale) {
            tracing::warn!("Removing stale fragment blob {}", stale);
            retry.run(&format!("Delete of {stale}"), || store.delete(&stale))?;
        }
    }
    Ok(())
}

impl StorageConfig {
    fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Local { .. } => "local",
            StorageConfig::Usb { .. } => "usb",
            StorageConfig::Blob { .. } => "blob",
        }
    }

    fn blob_store(store: &DirBlobStore) -> Arc<dyn BlobStore> {
        Arc::new(store.clone())
    }

    /// Stores a whole container. Returns where it ended up.
    pub fn store_container(
        &self,
        container: &Path,
        coordinator: &TaskCoordinator,
    ) -> Result<Vec<String>> {
        let name = file_name_of(container)?;
        tracing::info!("Storing {:?} on {} storage", container, self.kind());
        match self {
            StorageConfig::Local { path } | StorageConfig::Usb { path } => {
                let dst = path.join(name);
                copy_file(container, &dst)?;
                Ok(vec![dst.to_string_lossy().into_owned()])
            }
            StorageConfig::Blob {
                store,
                folder,
                retry,
            } => upload_all(
                Self::blob_store(store),
                &[container.to_path_buf()],
                folder,
                retry,
                coordinator,
            )
            .map(ids_to_strings),
        }
    }

    /// Stores every fragment of `fragments_dir`. On a directory target the
    /// fragments are mirrored into a directory of the same name.
    pub fn store_fragments(
        &self,
        fragments_dir: &Path,
        coordinator: &TaskCoordinator,
    ) -> Result<Vec<String>> {
        let dir_name = file_name_of(fragments_dir)?;
        tracing::info!(
            "Storing fragments of {:?} on {} storage",
            fragments_dir,
            self.kind()
        );
        match self {
            StorageConfig::Local { path } | StorageConfig::Usb { path } => {
                let target = path.join(dir_name);
                copy_fragments(fragments_dir, &target, coordinator)?;
                Ok(vec![target.to_string_lossy().into_owned()])
            }
            StorageConfig::Blob {
                store,
                folder,
                retry,
            } => {
                let files: Vec<PathBuf> = list_all_fragments(fragments_dir)?
                    .into_iter()
                    .map(|f| f.path)
                    .collect();
                let store = Self::blob_store(store);
                let ids = upload_all(store.clone(), &files, folder, retry, coordinator)?;
                prune_fragment_blobs(store.as_ref(), folder, &ids, retry)?;
                Ok(ids_to_strings(ids))
            }
        }
    }

    /// Makes the container `file_name` available locally. Local storage is
    /// read in place; anything else is copied into `work_dir` first.
    pub fn fetch_container(
        &self,
        file_name: &str,
        work_dir: &Path,
        coordinator: &TaskCoordinator,
    ) -> Result<PathBuf> {
        match self {
            StorageConfig::Local { path } => {
                let src = path.join(file_name);
                if src.is_file() {
                    Ok(src)
                } else {
                    Err(Error::NotFound { path: src })
                }
            }
            StorageConfig::Usb { path } => {
                let dst = work_dir.join(file_name);
                copy_file(&path.join(file_name), &dst)?;
                Ok(dst)
            }
            StorageConfig::Blob {
                store,
                folder,
                retry,
            } => {
                let id = BlobId::from(format!("{folder}/{file_name}"));
                let mut paths =
                    download_all(Self::blob_store(store), &[id], work_dir, retry, coordinator)?;
                paths
                    .pop()
                    .ok_or_else(|| Error::NotFound { path: file_name.into() })
            }
        }
    }

    /// Directory holding the fragments of `file_name`. Directory targets
    /// are read in place; blob fragments are downloaded into
    /// `work_dir/<fragments_dir_name>`.
    pub fn fetch_fragments(
        &self,
        file_name: &str,
        fragments_dir_name: &str,
        work_dir: &Path,
        coordinator: &TaskCoordinator,
    ) -> Result<PathBuf> {
        match self {
            StorageConfig::Local { path } | StorageConfig::Usb { path } => {
                Ok(path.join(fragments_dir_name))
            }
            StorageConfig::Blob {
                store,
                folder,
                retry,
            } => {
                let store = Self::blob_store(store);
                let ids: Vec<BlobId> = store
                    .list(folder)?
                    .into_iter()
                    .filter(|id| {
                        parse_fragment_index(blob_name(id), file_name).is_some()
                    })
                    .collect();
                if ids.is_empty() {
                    return Err(Error::NoFragmentsFound {
                        dir: PathBuf::from(folder),
                        prefix: file_name.to_string(),
                    });
                }
                let dir = work_dir.join(fragments_dir_name);
                if dir.exists() {
                    tracing::debug!("Clearing earlier download {:?}", dir);
                    std::fs::remove_dir_all(&dir)
                        .map_err(Error::from)
                        .add_msg(format!("Clear download directory {:?} failed", dir))?;
                }
                download_all(store, &ids, &dir, retry, coordinator)?;
                Ok(dir)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::coordinator::CoordinatorConfig;
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    fn coordinator() -> TaskCoordinator {
        TaskCoordinator::new(&CoordinatorConfig::builder().threads(2).build()).unwrap()
    }

    #[test]
    fn test_storage_config_deserialization() {
        let local: StorageConfig =
            serde_json::from_str(r#"{"storage_type":"local","path":"/backups"}"#).unwrap();
        assert!(matches!(local, StorageConfig::Local { .. }));

        let blob: StorageConfig = serde_json::from_str(
            r#"{"storage_type":"blob","store":{"root":"/mnt/share"},"folder":"nightly","retry":{"attempts":2,"backoff":"2s"}}"#,
        )
        .unwrap();
        match blob {
            StorageConfig::Blob { folder, retry, .. } => {
                assert_eq!(folder, "nightly");
                assert_eq!(retry.attempts(), &2);
            }
            _ => panic!("Expected blob storage"),
        }
    }

    #[test]
    fn test_storage_config_validation() {
        let temp_dir = TempDir::new().unwrap();
        let usb = StorageConfig::Usb {
            path: temp_dir.path().join("not-mounted"),
        };
        assert!(usb.validate().is_err());

        let local = StorageConfig::Local {
            path: temp_dir.path().join("created"),
        };
        assert!(local.validate().is_ok());
        assert!(temp_dir.path().join("created").is_dir());

        let blob = StorageConfig::Blob {
            store: DirBlobStore::new(temp_dir.path()),
            folder: "../up".into(),
            retry: RetryPolicy::default(),
        };
        assert!(blob.validate().is_err());
    }

    #[test]
    fn test_store_and_fetch_container_on_usb() {
        let temp_dir = TempDir::new().unwrap();
        let usb_path = temp_dir.path().join("usb");
        std::fs::create_dir_all(&usb_path).unwrap();
        let container = temp_dir.path().join("work/n.tar");
        std::fs::create_dir_all(container.parent().unwrap()).unwrap();
        std::fs::write(&container, "tar bytes").unwrap();

        let coordinator = coordinator();
        let storage = StorageConfig::Usb { path: usb_path.clone() };
        let stored = storage.store_container(&container, &coordinator).unwrap();
        assert_eq!(stored, vec![usb_path.join("n.tar").to_string_lossy().into_owned()]);

        let restore_work = temp_dir.path().join("restore_work");
        let fetched = storage.fetch_container("n.tar", &restore_work, &coordinator).unwrap();
        assert_eq!(fetched, restore_work.join("n.tar"));
        assert_eq!(std::fs::read_to_string(fetched).unwrap(), "tar bytes");

        let missing = storage
            .fetch_container("other.tar", &restore_work, &coordinator)
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_blob_fragments_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("share");
        std::fs::create_dir_all(&root).unwrap();
        let frags = temp_dir.path().join("work/n_fragments");
        std::fs::create_dir_all(&frags).unwrap();
        for i in 1..=3 {
            std::fs::write(frags.join(format!("n.tar.part{i:03}")), i.to_string()).unwrap();
        }

        let coordinator = coordinator();
        let storage = StorageConfig::Blob {
            store: DirBlobStore::new(&root),
            folder: "nightly".into(),
            retry: RetryPolicy::default(),
        };
        let stored = storage.store_fragments(&frags, &coordinator).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], "nightly/n.tar.part001");

        let restore_work = temp_dir.path().join("restore_work");
        let dir = storage
            .fetch_fragments("n.tar", "n_fragments", &restore_work, &coordinator)
            .unwrap();
        assert_eq!(dir, restore_work.join("n_fragments"));
        assert_eq!(std::fs::read_to_string(dir.join("n.tar.part002")).unwrap(), "2");

        let none = storage
            .fetch_fragments("other.tar", "other_fragments", &restore_work, &coordinator)
            .unwrap_err();
        assert!(matches!(none, Error::NoFragmentsFound { .. }));
    }
}
