use crate::backup::coordinator::{TaskCoordinator, UnitOfWork};
use crate::backup::fragment::{
    fragment_file_name, remove_stale_fragments, Fragment, MAX_FRAGMENTS,
};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_fragment_size;
use function_name::named;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fragments written by [`split`], in index order.
#[derive(Debug, Clone)]
pub struct SplitFile {
    pub fragments_dir: PathBuf,
    pub fragments: Vec<Fragment>,
}

/// Copies one byte range of the source file into its own fragment file.
#[derive(Debug)]
struct WriteFragment {
    name: Arc<str>,
    source: Arc<Path>,
    offset: u64,
    len: u64,
    dest: PathBuf,
}

impl UnitOfWork for WriteFragment {
    fn identifier(&self) -> Arc<str> {
        self.name.clone()
    }

    fn execute(self) -> Result<()> {
        let mut reader = BufReader::new(File::open(&self.source)?);
        reader.seek(SeekFrom::Start(self.offset))?;
        let mut writer = BufWriter::new(File::create(&self.dest)?);
        let copied = std::io::copy(&mut reader.take(self.len), &mut writer)?;
        if copied != self.len {
            return Err(Error::CorruptData(format!(
                "{:?} shrank while splitting: got {} of {} bytes at offset {}",
                self.source, copied, self.len, self.offset
            )));
        }
        writer.flush()?;
        tracing::trace!("Wrote {:?} ({} bytes)", self.dest, copied);
        Ok(())
    }
}

/// Cuts `file` into `fragment_size` byte pieces inside `fragments_dir`.
///
/// Indices are assigned from the byte offsets before anything is dispatched,
/// so the fragments come out correctly numbered whatever order the writes
/// finish in. An empty file produces no fragment. Any failed write fails
/// the whole split; fragments already written stay on disk.
#[named]
pub fn split(
    file: &Path,
    fragments_dir: &Path,
    fragment_size: u64,
    coordinator: &TaskCoordinator,
) -> Result<SplitFile> {
    validate_fragment_size(fragment_size).map_err(|e| Error::InvalidInput(e.to_string()))?;
    if !file.is_file() {
        return Err(Error::NotFound {
            path: file.to_path_buf(),
        });
    }
    let base = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("{:?} has no usable file name", file)))?;

    let len = std::fs::metadata(file)?.len();
    let count = len.div_ceil(fragment_size);
    if count > MAX_FRAGMENTS {
        return Err(Error::InvalidInput(format!(
            "{:?} needs {} fragments of {} bytes, at most {} are supported",
            file, count, fragment_size, MAX_FRAGMENTS
        )));
    }

    std::fs::create_dir_all(fragments_dir)
        .map_err(Error::from)
        .add_msg(format!("Create fragments directory {:?} failed", fragments_dir))?;
    remove_stale_fragments(fragments_dir, base, count as u32)?;

    if count == 0 {
        tracing::info!("{:?} is empty, no fragment written", file);
        return Ok(SplitFile {
            fragments_dir: fragments_dir.to_path_buf(),
            fragments: Vec::new(),
        });
    }

    let source: Arc<Path> = file.into();
    let (units, fragments): (Vec<_>, Vec<_>) = (0..count)
        .map(|i| {
            let index = i as u32 + 1;
            let name = fragment_file_name(base, index);
            let dest = fragments_dir.join(&name);
            let offset = i * fragment_size;
            let unit = WriteFragment {
                name: name.into(),
                source: source.clone(),
                offset,
                len: fragment_size.min(len - offset),
                dest: dest.clone(),
            };
            (unit, Fragment { index, path: dest })
        })
        .unzip();

    tracing::info!(
        "Splitting {:?} ({} bytes) into {} fragments in {:?}",
        file,
        len,
        count,
        fragments_dir
    );
    coordinator
        .run("Fragment write", units)
        .into_hard_result()
        .add_fn_name(function_path!())?;

    Ok(SplitFile {
        fragments_dir: fragments_dir.to_path_buf(),
        fragments,
    })
}
