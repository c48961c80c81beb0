use crate::backup::coordinator::{BatchResult, BatchSummary, TaskCoordinator, UnitOfWork, UnitOutcome};
use crate::backup::fragment::{list_all_fragments, Fragment};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static COPY_OPERATION: &str = "Fragment copy";

/// Whether both paths exist and resolve to the same file or directory.
pub(crate) fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copies `src` to `dst`, creating the parent directories of `dst`.
/// An existing `dst` is overwritten. When `dst` already is `src` nothing
/// is written.
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    if !src.is_file() {
        return Err(Error::NotFound {
            path: src.to_path_buf(),
        });
    }
    if is_same_file(src, dst) {
        tracing::debug!("{:?} is already in place, not copied", dst);
        return Ok(std::fs::metadata(src)?.len());
    }
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .add_msg(format!("Create directory {:?} failed", parent))?;
    }
    let bytes = std::fs::copy(src, dst)
        .map_err(Error::from)
        .add_msg(format!("Copy {:?} to {:?} failed", src, dst))?;
    tracing::debug!("Copied {:?} to {:?} ({} bytes)", src, dst, bytes);
    Ok(bytes)
}

#[derive(Debug)]
pub struct CopyFile {
    name: Arc<str>,
    src: PathBuf,
    dst: PathBuf,
}

impl CopyFile {
    pub fn new<S: Into<Arc<str>>>(name: S, src: PathBuf, dst: PathBuf) -> Self {
        Self {
            name: name.into(),
            src,
            dst,
        }
    }
}

impl UnitOfWork for CopyFile {
    fn identifier(&self) -> Arc<str> {
        self.name.clone()
    }

    fn execute(self) -> Result<()> {
        copy_file(&self.src, &self.dst).map(|_| ())
    }
}

/// Mirrors every `*.partNNN` file of `fragments_dir` into `target_dir`,
/// one copy unit per fragment. Fragments already in `target_dir` that the
/// source does not hold are removed once every copy succeeded, so the
/// target never keeps the tail of an earlier, longer set.
///
/// A mirrored set with a missing piece cannot be merged, so any failed copy
/// fails the call.
#[named]
pub fn copy_fragments(
    fragments_dir: &Path,
    target_dir: &Path,
    coordinator: &TaskCoordinator,
) -> Result<BatchSummary> {
    let fragments = list_all_fragments(fragments_dir)?;
    if is_same_file(fragments_dir, target_dir) {
        tracing::info!("Fragments already in {:?}, nothing copied", target_dir);
        let outcomes = fragments
            .iter()
            .map(|f| UnitOutcome::succeeded(f.file_name().as_str()))
            .collect();
        return BatchResult::new(COPY_OPERATION, outcomes).into_hard_result();
    }

    std::fs::create_dir_all(target_dir)
        .map_err(Error::from)
        .add_msg(format!("Create fragment target {:?} failed", target_dir))?;
    if fragments.is_empty() {
        tracing::warn!("No fragment found in {:?}, nothing copied", fragments_dir);
    }

    let keep: HashSet<String> = fragments.iter().map(Fragment::file_name).collect();
    let units = fragments
        .into_iter()
        .map(|fragment| {
            let name = fragment.file_name();
            let dst = target_dir.join(&name);
            CopyFile::new(name, fragment.path, dst)
        })
        .collect();

    let summary = coordinator
        .run(COPY_OPERATION, units)
        .into_hard_result()
        .add_fn_name(function_path!())?;

    for stale in list_all_fragments(target_dir)?
        .into_iter()
        .filter(|f| !keep.contains(&f.file_name()))
    {
        tracing::warn!("Removing stale fragment {:?}", stale.path);
        std::fs::remove_file(&stale.path)
            .map_err(Error::from)
            .add_msg(format!("Remove stale fragment {:?} failed", stale.path))?;
    }
    Ok(summary)
}
