use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::transfer::blob::{BlobId, BlobStore};
use getset::Getters;
use sanitize_filename::is_sanitized;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A [`BlobStore`] kept in a directory, typically a mounted network share.
///
/// Folders are sub-directories of `root` and a blob id is
/// `<folder>/<name>`. The root itself is never created: when it is missing
/// the remote counts as unreachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DirBlobStore {
    root: PathBuf,
}

fn checked_component<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || value == "." || value == ".." || !is_sanitized(value) {
        return Err(Error::InvalidInput(format!("invalid blob {kind} {:?}", value)));
    }
    Ok(value)
}

impl DirBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn reachable_root(&self) -> Result<&Path> {
        if self.root.is_dir() {
            Ok(&self.root)
        } else {
            Err(Error::TransportFailure(format!(
                "blob store root {:?} is unreachable",
                self.root
            )))
        }
    }

    fn folders(&self) -> Result<Vec<PathBuf>> {
        let mut folders = std::fs::read_dir(self.reachable_root()?)
            .map_err(|e| Error::TransportFailure(format!("listing {:?}: {e}", self.root)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect::<Vec<_>>();
        folders.sort();
        Ok(folders)
    }

    /// Resolves an id (`folder/name`) or a bare name searched across every
    /// folder. Several matches for a bare name: the first folder in sorted
    /// order wins.
    fn resolve(&self, id_or_name: &str) -> Result<PathBuf> {
        let root = self.reachable_root()?;
        if let Some((folder, name)) = id_or_name.split_once('/') {
            let path = root
                .join(checked_component("folder", folder)?)
                .join(checked_component("name", name)?);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(Error::NotFound { path })
            };
        }

        let name = checked_component("name", id_or_name)?;
        let mut matches = self
            .folders()?
            .into_iter()
            .map(|folder| folder.join(name))
            .filter(|p| p.is_file());
        let first = matches.next().ok_or_else(|| Error::NotFound {
            path: PathBuf::from(name),
        })?;
        if matches.next().is_some() {
            tracing::warn!("Several blobs are named {:?}, using {:?}", name, first);
        }
        Ok(first)
    }
}

impl BlobStore for DirBlobStore {
    fn put(&self, local: &Path, folder: &str, name: &str) -> Result<BlobId> {
        let root = self.reachable_root()?;
        if !local.is_file() {
            return Err(Error::NotFound {
                path: local.to_path_buf(),
            });
        }
        let folder_path = root.join(checked_component("folder", folder)?);
        let name = checked_component("name", name)?;
        std::fs::create_dir_all(&folder_path)
            .map_err(|e| Error::TransportFailure(format!("create folder {:?}: {e}", folder_path)))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&folder_path)
            .map_err(|e| Error::TransportFailure(format!("open upload in {:?}: {e}", folder_path)))?;
        std::io::copy(&mut File::open(local)?, &mut temp)
            .map_err(|e| Error::TransportFailure(format!("upload of {:?}: {e}", local)))?;
        temp.persist(folder_path.join(name))
            .map_err(|e| Error::TransportFailure(format!("commit of {name:?}: {}", e.error)))?;

        Ok(BlobId::from(format!("{folder}/{name}")))
    }

    fn get(&self, id_or_name: &str, dest: &Path) -> Result<PathBuf> {
        let src = self.resolve(id_or_name)?;
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .add_msg(format!("Create download directory {:?} failed", parent))?;

        // a broken transfer never leaves a partial file at `dest`
        let mut temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(parent)?;
        std::io::copy(
            &mut File::open(&src)
                .map_err(|e| Error::TransportFailure(format!("open {:?}: {e}", src)))?,
            &mut temp,
        )
        .map_err(|e| Error::TransportFailure(format!("download of {:?}: {e}", src)))?;
        temp.persist(dest).map_err(|e| Error::from(e.error))?;
        Ok(dest.to_path_buf())
    }

    fn list(&self, folder: &str) -> Result<Vec<BlobId>> {
        let folder_path = self
            .reachable_root()?
            .join(checked_component("folder", folder)?);
        if !folder_path.is_dir() {
            return Err(Error::NotFound { path: folder_path });
        }
        let mut names = std::fs::read_dir(&folder_path)
            .map_err(|e| Error::TransportFailure(format!("listing {:?}: {e}", folder_path)))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| !n.starts_with('.'))
            .collect::<Vec<_>>();
        names.sort();
        Ok(names
            .into_iter()
            .map(|n| BlobId::from(format!("{folder}/{n}")))
            .collect())
    }

    fn delete(&self, id: &BlobId) -> Result<()> {
        let root = self.reachable_root()?;
        let (folder, name) = id
            .as_str()
            .split_once('/')
            .ok_or_else(|| Error::InvalidInput(format!("{id} is not a blob id")))?;
        let path = root
            .join(checked_component("folder", folder)?)
            .join(checked_component("name", name)?);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TransportFailure(format!("delete of {id}: {e}"))),
        }
    }
}
