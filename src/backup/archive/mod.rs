pub mod source_set;

use crate::backup::result_error::result::Result;
use dyn_iter::DynIter;
use itertools::Itertools;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A single file to be recorded in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Absolute path of the file on disk
    pub src: Arc<Path>,

    /// POSIX relative path the file is recorded under inside the container.
    ///
    /// Never absolute and never starting with `..`.
    pub arcname: Arc<str>,
}

impl ArchiveMember {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<str>>>(src: A, arcname: B) -> ArchiveMember {
        Self {
            src: src.into(),
            arcname: arcname.into(),
        }
    }
}

/// Sources that can enumerate the members they contribute to a container.
pub trait ArchiveEntryIterable {
    /// Yields every member; `Err` items are non-fatal and reported as such
    /// by the writer.
    fn archive_entry_iterator<'a>(&'a self) -> Result<DynIter<'a, Result<ArchiveMember>>>;
}

/// Computes the arcname of `file` against the source roots.
///
/// The most specific root that is an ancestor of `file` wins and the path
/// is taken relative to that root's parent, so the root's own directory
/// name is kept. Files outside every root are recorded under their base
/// name.
pub fn compute_arcname<P: AsRef<Path>>(file: &Path, roots: &[P]) -> String {
    let matched = roots
        .iter()
        .map(AsRef::as_ref)
        .filter(|root| file.starts_with(root))
        .max_by_key(|root| root.components().count());

    let relative = match matched {
        Some(root) => {
            let base = root.parent().unwrap_or(root);
            file.strip_prefix(base).unwrap_or(file)
        }
        None => Path::new(file.file_name().unwrap_or(file.as_os_str())),
    };

    to_posix(relative)
}

/// Joins the normal components of `path` with `/`, dropping roots, `.` and
/// `..` so the result stays inside the archive root.
pub fn to_posix(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .join("/")
}

/// Maps a member name onto `dest`, refusing names that would escape it.
pub fn member_dest_path(dest: &Path, member_name: &str) -> Option<PathBuf> {
    let relative = Path::new(member_name.trim_end_matches('/'));
    let mut out = dest.to_path_buf();
    let mut depth = 0usize;
    for c in relative.components() {
        match c {
            Component::Normal(s) => {
                out.push(s);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arcname_prefers_most_specific_root() {
        let roots = [PathBuf::from("/a"), PathBuf::from("/a/b")];
        assert_eq!(compute_arcname(Path::new("/a/b/c.txt"), &roots), "b/c.txt");
        assert_eq!(compute_arcname(Path::new("/a/x/c.txt"), &roots), "a/x/c.txt");
    }

    #[test]
    fn test_arcname_order_independent() {
        let roots = [PathBuf::from("/a/b"), PathBuf::from("/a")];
        assert_eq!(compute_arcname(Path::new("/a/b/c.txt"), &roots), "b/c.txt");
    }

    #[test]
    fn test_arcname_is_component_wise() {
        let roots = [PathBuf::from("/a/b")];
        assert_eq!(compute_arcname(Path::new("/a/bc/file"), &roots), "file");
    }

    #[test]
    fn test_arcname_without_match_is_basename() {
        let roots: [PathBuf; 0] = [];
        assert_eq!(compute_arcname(Path::new("/x/y/z.bin"), &roots), "z.bin");
    }

    #[test]
    fn test_arcname_root_directory() {
        let roots = [PathBuf::from("/")];
        assert_eq!(compute_arcname(Path::new("/etc/hosts"), &roots), "etc/hosts");
    }

    #[test]
    fn test_member_dest_path_rejects_escapes() {
        let dest = Path::new("/restore");
        assert_eq!(
            member_dest_path(dest, "b/c.txt"),
            Some(PathBuf::from("/restore/b/c.txt"))
        );
        assert_eq!(
            member_dest_path(dest, "b/dir/"),
            Some(PathBuf::from("/restore/b/dir"))
        );
        assert_eq!(member_dest_path(dest, "../etc/passwd"), None);
        assert_eq!(member_dest_path(dest, "/etc/passwd"), None);
        assert_eq!(member_dest_path(dest, ""), None);
    }
}
