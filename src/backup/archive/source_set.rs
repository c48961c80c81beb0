use crate::backup::archive::{compute_arcname, ArchiveEntryIterable, ArchiveMember};
use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// Ordered set of directories to back up.
///
/// Paths are made absolute on construction (without resolving symlinks).
/// Entries that are missing or not directories are skipped with a warning
/// when enumerated, never treated as fatal.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Getters)]
#[serde(from = "Vec<PathBuf>", into = "Vec<PathBuf>")]
#[getset(get = "pub")]
pub struct SourceSet {
    roots: Vec<PathBuf>,
}

impl<P: AsRef<Path>> FromIterator<P> for SourceSet {
    fn from_iter<T: IntoIterator<Item = P>>(iter: T) -> Self {
        let roots = iter
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf())
            })
            .collect();
        SourceSet { roots }
    }
}

impl From<Vec<PathBuf>> for SourceSet {
    fn from(value: Vec<PathBuf>) -> Self {
        value.into_iter().collect()
    }
}

impl From<SourceSet> for Vec<PathBuf> {
    fn from(value: SourceSet) -> Self {
        value.roots
    }
}

impl SourceSet {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn existing_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.roots.iter().filter(|root| {
            if root.is_dir() {
                true
            } else {
                tracing::warn!("Source {:?} does not exist or is not a directory, skipping", root);
                false
            }
        })
    }
}

impl ArchiveEntryIterable for SourceSet {
    #[named]
    fn archive_entry_iterator<'a>(&'a self) -> Result<DynIter<'a, Result<ArchiveMember>>> {
        tracing::info!("Scanning {} source directories", self.roots.len());

        let entries = self
            .existing_roots()
            .flat_map(move |root| {
                tracing::debug!("Scanning directory {:?}", root);
                WalkDir::new(root).follow_links(true).into_iter()
            })
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &self.roots).map(Ok),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(entries.into_dyn_iter())
    }
}

fn process_dir_entry(de: DirEntry, roots: &[PathBuf]) -> Option<ArchiveMember> {
    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }

    let arcname = compute_arcname(de.path(), roots);
    let member = ArchiveMember::new(de.into_path(), arcname);
    tracing::trace!("Including file: {:?} -> {:?}", member.src, member.arcname);
    Some(member)
}
