use crate::backup::finish::Finish;
use crate::backup::fragment::{list_fragments, Fragment};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct MergedFile {
    pub output: PathBuf,
    pub fragment_count: usize,
    pub bytes: u64,
}

/// Concatenates the fragments of `prefix` found in `fragments_dir` into
/// `output`, in index order, through a single writer.
///
/// A fragment that cannot be read aborts with
/// [`Error::FragmentReadFailed`]; whatever was written to `output` until
/// then is left in place.
pub fn merge(fragments_dir: &Path, prefix: &str, output: &Path) -> Result<MergedFile> {
    if prefix.is_empty() {
        return Err(Error::InvalidInput("fragment prefix must not be empty".into()));
    }
    let fragments = list_fragments(fragments_dir, prefix)?;
    if fragments.is_empty() {
        return Err(Error::NoFragmentsFound {
            dir: fragments_dir.to_path_buf(),
            prefix: prefix.to_string(),
        });
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(Error::from)
            .add_msg(format!("Create output directory {:?} failed", parent))?;
    }

    tracing::info!(
        "Merging {} fragments of {:?} into {:?}",
        fragments.len(),
        prefix,
        output
    );
    let mut writer = BufWriter::new(File::create(output)?);
    let mut bytes = 0;
    for fragment in &fragments {
        bytes += append_fragment(fragment, &mut writer)?;
    }
    writer.finish()?.sync_all()?;

    tracing::info!("Merged {:?} ({} bytes)", output, bytes);
    Ok(MergedFile {
        output: output.to_path_buf(),
        fragment_count: fragments.len(),
        bytes,
    })
}

fn append_fragment<W: Write>(fragment: &Fragment, writer: &mut W) -> Result<u64> {
    let read_failed = |source: std::io::Error| Error::FragmentReadFailed {
        fragment: fragment.path.clone(),
        source,
    };

    let mut reader = File::open(&fragment.path).map_err(read_failed)?;
    let mut buf = vec![0u8; 256 * 1024];
    let mut total = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_failed(e)),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    tracing::trace!("Appended {:?} ({} bytes)", fragment.path, total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::coordinator::{CoordinatorConfig, TaskCoordinator};
    use crate::backup::fragment::{fragment_file_name, split};
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    fn coordinator() -> TaskCoordinator {
        TaskCoordinator::new(&CoordinatorConfig::builder().threads(3).build()).unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    #[test]
    fn test_split_then_merge_reproduces_file() {
        let coordinator = coordinator();
        for (len, size) in [(4096, 1024), (4097, 1024), (10, 3), (1, 1000)] {
            let temp_dir = TempDir::new().unwrap();
            let file = temp_dir.path().join("archive.tar.xz");
            let data = sample(len);
            std::fs::write(&file, &data).unwrap();

            let frags = temp_dir.path().join("frags");
            split(&file, &frags, size, &coordinator).unwrap();

            let out = temp_dir.path().join("restored/archive.tar.xz");
            let merged = merge(&frags, "archive.tar.xz", &out).unwrap();
            assert_eq!(merged.bytes, len as u64);
            assert_eq!(std::fs::read(&out).unwrap(), data, "len={len} size={size}");
        }
    }

    #[test]
    fn test_merge_orders_by_index() {
        let temp_dir = TempDir::new().unwrap();
        // created in reverse so the directory order does not help
        for index in (1..=12).rev() {
            let name = fragment_file_name("f", index);
            std::fs::write(temp_dir.path().join(name), format!("<{index}>")).unwrap();
        }

        let out = temp_dir.path().join("out/f");
        let merged = merge(temp_dir.path(), "f", &out).unwrap();
        assert_eq!(merged.fragment_count, 12);

        let expected: String = (1..=12).map(|i| format!("<{i}>")).collect();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), expected);
    }

    #[test]
    fn test_merge_ignores_other_prefixes() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f.part001"), "a").unwrap();
        std::fs::write(temp_dir.path().join("f.part002"), "b").unwrap();
        std::fs::write(temp_dir.path().join("f2.part001"), "X").unwrap();
        std::fs::write(temp_dir.path().join("f.part3"), "Y").unwrap();

        let out = temp_dir.path().join("merged");
        merge(temp_dir.path(), "f", &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "ab");
    }

    #[test]
    fn test_merge_errors() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");

        let missing = merge(&temp_dir.path().join("nope"), "f", &out).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(matches!(missing, Error::NotFound { .. }));

        std::fs::write(temp_dir.path().join("other.part001"), "x").unwrap();
        let none = merge(temp_dir.path(), "f", &out).unwrap_err();
        assert!(matches!(none, Error::NoFragmentsFound { .. }));
    }

    #[test]
    fn test_merge_with_gap_still_merges() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("f.part001"), "a").unwrap();
        std::fs::write(temp_dir.path().join("f.part003"), "c").unwrap();

        let out = temp_dir.path().join("merged");
        let merged = merge(temp_dir.path(), "f", &out).unwrap();
        assert_eq!(merged.fragment_count, 2);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "ac");
    }
}
