//! Fixed-size fragments of a file, named `<basename>.partNNN`.
//!
//! `NNN` is the 1-based index, zero padded to three digits, so a file can be
//! cut into at most [`MAX_FRAGMENTS`] pieces. Ordering always comes from the
//! parsed index, never from the directory listing.

pub mod merge;
pub mod split;

pub use merge::{merge, MergedFile};
pub use split::{split, SplitFile};

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
pub use crate::backup::validate::MAX_FRAGMENTS;
use std::path::{Path, PathBuf};

const PART_MARKER: &str = ".part";

/// File name of fragment `index` of `base`.
pub fn fragment_file_name(base: &str, index: u32) -> String {
    format!("{base}{PART_MARKER}{index:03}")
}

/// Directory holding the fragments of the container named `base`.
pub fn fragments_dir_name(base: &str) -> String {
    format!("{base}_fragments")
}

/// Splits `name` into its base name and fragment index.
///
/// Only the exact `.part` marker followed by three ASCII digits matches.
pub fn split_fragment_name(name: &str) -> Option<(&str, u32)> {
    let (base, digits) = name.rsplit_once(PART_MARKER)?;
    if base.is_empty() || digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|index| (base, index))
}

/// Index of `name` when it is a fragment of exactly `prefix`.
pub fn parse_fragment_index(name: &str, prefix: &str) -> Option<u32> {
    split_fragment_name(name)
        .filter(|(base, _)| *base == prefix)
        .map(|(_, index)| index)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: u32,
    pub path: PathBuf,
}

impl Fragment {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn read_fragment_dir<F>(dir: &Path, mut matcher: F) -> Result<Vec<Fragment>>
where
    F: FnMut(&str) -> Option<u32>,
{
    if !dir.is_dir() {
        return Err(Error::NotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut fragments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = matcher(name) {
            fragments.push(Fragment {
                index,
                path: entry.path(),
            });
        }
    }
    fragments.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
    Ok(fragments)
}

/// Fragments of `prefix` in `dir`, sorted by index.
///
/// Missing indices are logged but not rejected.
pub fn list_fragments(dir: &Path, prefix: &str) -> Result<Vec<Fragment>> {
    let fragments = read_fragment_dir(dir, |name| parse_fragment_index(name, prefix))?;

    let mut expected = 1;
    for fragment in &fragments {
        if fragment.index != expected {
            tracing::warn!(
                "Fragments of {:?} in {:?} are not contiguous: expected part {:03}, found {:03}",
                prefix,
                dir,
                expected,
                fragment.index
            );
        }
        expected = fragment.index + 1;
    }
    Ok(fragments)
}

/// Every `*.partNNN` file in `dir` whatever its base name, sorted by
/// index then path.
pub fn list_all_fragments(dir: &Path) -> Result<Vec<Fragment>> {
    read_fragment_dir(dir, |name| split_fragment_name(name).map(|(_, index)| index))
}

/// Removes the fragments of `base` in `dir` that a set of `count`
/// fragments does not include: indices above `count`, and `000`.
/// Returns how many were removed.
pub fn remove_stale_fragments(dir: &Path, base: &str, count: u32) -> Result<usize> {
    let mut removed = 0;
    for stale in list_fragments(dir, base)?
        .into_iter()
        .filter(|f| f.index > count || f.index == 0)
    {
        tracing::warn!("Removing stale fragment {:?}", stale.path);
        std::fs::remove_file(&stale.path)?;
        removed += 1;
    }
    Ok(removed)
}
