//! Container creation: a single sequential tar writer feeding the
//! compression and encryption layers.
//!
//! Each member is preceded by a PAX record carrying the CRC32 of its
//! content so extraction can verify what it wrote.

use crate::backup::archive::{ArchiveEntryIterable, ArchiveMember};
use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::container::{file_crc32, CRC32_PAX_KEY};
use crate::backup::encrypt::{EncryptorBuilder, EncryptorConfig};
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Outcome of [`create_archive`].
#[derive(Debug)]
pub struct CreatedArchive {
    pub path: PathBuf,
    pub member_count: usize,
    /// Entries that could not be enumerated or were shadowed by an earlier
    /// member with the same arcname. They are not in the container.
    pub non_fatal_error: Option<Error>,
}

/// Collects the members of `source`, dropping later duplicates of an
/// arcname and keeping enumeration errors aside.
pub fn collect_members<S: ArchiveEntryIterable>(
    source: &S,
) -> Result<(Vec<ArchiveMember>, Vec<Error>)> {
    let mut seen = HashSet::new();
    let mut members = Vec::new();
    let mut errors = Vec::new();

    for entry in source.archive_entry_iterator()? {
        match entry {
            Ok(member) if seen.insert(member.arcname.clone()) => members.push(member),
            Ok(member) => {
                tracing::warn!(
                    "Skipping {:?}: arcname {:?} already taken by another source",
                    member.src,
                    member.arcname
                );
                errors.push(Error::InvalidInput(format!(
                    "duplicate arcname {:?} for {:?}",
                    member.arcname, member.src
                )));
            }
            Err(e) => {
                tracing::warn!("Ignoring entry: {e}");
                errors.push(e);
            }
        }
    }

    Ok((members, errors))
}

/// Writes every member of `source` into a new container at `output`.
///
/// The output directory is created when missing. The container is written
/// to a temporary file next to `output` and renamed into place once every
/// layer has been finished, so `output` never holds a half-written
/// container. Zero members still yields a valid, empty container.
pub fn create_archive<S: ArchiveEntryIterable>(
    source: &S,
    output: &Path,
    compressor: &CompressorConfig,
    encryptor: &EncryptorConfig,
) -> Result<CreatedArchive> {
    let (members, errors) = collect_members(source)?;
    if members.is_empty() {
        tracing::info!("No files found to back up, creating an empty container");
    }

    let out_dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&out_dir)
        .map_err(Error::from)
        .add_msg(format!("Create output directory {:?} failed", out_dir))?;

    tracing::info!(
        "Creating container {:?} with {} files",
        output,
        members.len()
    );

    let mut temp = tempfile::Builder::new()
        .prefix(".container-")
        .suffix(".tmp")
        .tempfile_in(&out_dir)?;

    write_members(&members, &mut temp, compressor, encryptor)?;
    temp.as_file().sync_all()?;
    temp.persist(output)
        .map_err(|e| Error::from(e.error))
        .add_msg(format!("Moving container into place at {:?} failed", output))?;

    tracing::info!("Container {:?} created", output);
    Ok(CreatedArchive {
        path: output.to_path_buf(),
        member_count: members.len(),
        non_fatal_error: (!errors.is_empty()).then(|| errors.into()),
    })
}

fn write_members<W: Write>(
    members: &[ArchiveMember],
    sink: W,
    compressor: &CompressorConfig,
    encryptor: &EncryptorConfig,
) -> Result<W> {
    let mut builder = encryptor
        .build_encryptor(BufWriter::new(sink))
        .map(BufWriter::new)
        .and_then(|f| compressor.build_compressor(f))
        .map(BufWriter::new)
        .map(tar::Builder::new)?;
    builder.follow_symlinks(true);

    for member in members {
        let crc = file_crc32(&member.src)
            .map_err(Error::from)
            .add_msg(format!("Hashing {:?} failed", member.src))?;
        let crc = format!("{crc:08x}");
        builder.append_pax_extensions([(CRC32_PAX_KEY, crc.as_bytes())])?;
        builder
            .append_path_with_name(&member.src, member.arcname.as_ref())
            .map_err(Error::from)
            .add_msg(format!("Adding {:?} as {:?} failed", member.src, member.arcname))?;
        tracing::trace!("Added {:?}", member.arcname);
    }

    let sink = builder
        .into_inner()?
        .finish()?
        .finish()?
        .finish()?
        .finish()?
        .finish()?;
    Ok(sink)
}
