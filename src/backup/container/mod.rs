//! Read side of the container: layer detection, member listing and single
//! member extraction.
//!
//! Every call opens its own handle on the container file. The container is
//! never modified once written, so any number of handles may read it
//! concurrently. Layered containers are decoded front to back, so bulk
//! extraction first [`unseal`]s them into a plain tar and then seeks to
//! each member.

use crate::backup::archive::member_dest_path;
use crate::backup::compress::{detect_decompressor, Decompressor, XZ_MAGIC};
use crate::backup::encrypt::{detect_decryptor, Decryptor, AGE_MAGIC};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// PAX record holding the CRC32 of a member's content, as lowercase hex.
pub const CRC32_PAX_KEY: &str = "FRAGBACKUP.crc32";

pub type ContainerStream = Decompressor<BufReader<Decryptor<BufReader<File>>>>;

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMember {
    /// POSIX relative name; directories end with `/`
    pub name: String,
    pub size: u64,
    pub crc32: Option<u32>,
    /// Offset of the member's tar header in the decoded tar stream
    pub header_offset: u64,
}

impl ContainerMember {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Translates an I/O failure while decoding the container stream. Tar
/// header checksum mismatches, truncated blocks and broken xz or age chunks
/// all surface as these kinds.
fn decode_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::InvalidData
        | std::io::ErrorKind::InvalidInput
        | std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::Other => Error::CorruptData(e.to_string()),
        _ => Error::Io(e),
    }
}

/// Opens `path` and peels the encryption and compression layers.
///
/// Wrong or missing passphrases fail here with [`Error::AuthFailure`],
/// before any member is read.
pub fn open_container(
    path: &Path,
    passphrase: Option<&RedactedString>,
) -> Result<tar::Archive<ContainerStream>> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(Error::InvalidInput(format!("{:?} is not a file", path)));
    }
    if metadata.len() == 0 {
        return Err(Error::CorruptData(format!("{:?} is empty", path)));
    }

    let file = BufReader::new(File::open(path)?);
    let decrypted = BufReader::new(detect_decryptor(file, passphrase)?);
    let decompressed = detect_decompressor(decrypted).map_err(decode_error)?;
    Ok(tar::Archive::new(decompressed))
}

fn entry_crc32<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<Option<u32>> {
    let Some(extensions) = entry.pax_extensions().map_err(decode_error)? else {
        return Ok(None);
    };
    for extension in extensions {
        let extension = extension.map_err(decode_error)?;
        if extension.key() == Ok(CRC32_PAX_KEY) {
            let value = String::from_utf8_lossy(extension.value_bytes());
            return u32::from_str_radix(value.trim(), 16)
                .map(Some)
                .map_err(|e| Error::CorruptData(format!("bad {CRC32_PAX_KEY} record: {e}")));
        }
    }
    Ok(None)
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> String {
    let mut name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    if entry.header().entry_type().is_dir() && !name.ends_with('/') {
        name.push('/');
    }
    name
}

/// A container's tar layer as a seekable file.
#[derive(Debug)]
pub enum PlainTar {
    /// The container carried no layer and is read where it is.
    InPlace(PathBuf),
    /// Decoded copy, removed on drop.
    Unsealed(TempPath),
}

impl PlainTar {
    pub fn path(&self) -> &Path {
        match self {
            PlainTar::InPlace(path) => path.as_path(),
            PlainTar::Unsealed(temp) => temp.as_ref(),
        }
    }
}

fn has_layers(path: &Path) -> Result<bool> {
    let mut head = Vec::with_capacity(AGE_MAGIC.len());
    File::open(path)?
        .take(AGE_MAGIC.len() as u64)
        .read_to_end(&mut head)?;
    Ok(head.starts_with(AGE_MAGIC) || head.starts_with(&XZ_MAGIC))
}

/// Peels the encryption and compression layers of `path` once, into a
/// plain tar under `scratch_dir`. A container without layers is returned
/// as is.
///
/// Authentication is checked before anything is written.
pub fn unseal(
    path: &Path,
    passphrase: Option<&RedactedString>,
    scratch_dir: &Path,
) -> Result<PlainTar> {
    let archive = open_container(path, passphrase)?;
    if !has_layers(path)? {
        return Ok(PlainTar::InPlace(path.to_path_buf()));
    }

    std::fs::create_dir_all(scratch_dir)
        .map_err(Error::from)
        .add_msg(format!("Create scratch directory {:?} failed", scratch_dir))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".unsealed-")
        .suffix(".tar")
        .tempfile_in(scratch_dir)?;
    let mut stream = archive.into_inner();
    let bytes = std::io::copy(&mut stream, &mut temp).map_err(decode_error)?;
    temp.as_file().sync_all()?;
    tracing::debug!("Unsealed {:?} into {:?} ({} bytes)", path, temp.path(), bytes);
    Ok(PlainTar::Unsealed(temp.into_temp_path()))
}

/// Lists every member without writing anything to disk.
///
/// An empty but well-formed container yields an empty list.
pub fn list_members(
    path: &Path,
    passphrase: Option<&RedactedString>,
) -> Result<Vec<ContainerMember>> {
    let mut archive = open_container(path, passphrase)?;
    let mut members = Vec::new();
    for entry in archive.entries().map_err(decode_error)? {
        let mut entry = entry.map_err(decode_error)?;
        let crc32 = entry_crc32(&mut entry)?;
        members.push(ContainerMember {
            name: entry_name(&entry),
            size: entry.size(),
            crc32,
            header_offset: entry.raw_header_position(),
        });
    }
    tracing::debug!("Container {:?} holds {} members", path, members.len());
    Ok(members)
}

/// Member names in container order.
pub fn list_member_names(path: &Path, passphrase: Option<&RedactedString>) -> Result<Vec<String>> {
    Ok(list_members(path, passphrase)?
        .into_iter()
        .map(|m| m.name)
        .collect())
}

/// CRC32 of a file's content, streamed.
pub fn file_crc32(path: &Path) -> std::io::Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Extracts the member called `member_name` from its own handle on the
/// container into `dest`, then checks the written bytes against the
/// member's recorded size and CRC32.
///
/// Safe to repeat: the destination file is simply overwritten.
pub fn extract_member(
    path: &Path,
    passphrase: Option<&RedactedString>,
    member_name: &str,
    dest: &Path,
) -> Result<PathBuf> {
    let target =
        member_dest_path(dest, member_name).ok_or_else(|| {
            Error::InvalidInput(format!("member {:?} escapes the destination", member_name))
        })?;
    let wanted = member_name.trim_end_matches('/');

    let mut archive = open_container(path, passphrase)?;
    for entry in archive.entries().map_err(decode_error)? {
        let mut entry = entry.map_err(decode_error)?;
        if entry_name(&entry).trim_end_matches('/') != wanted {
            continue;
        }

        let expected_crc = entry_crc32(&mut entry)?;
        let expected_size = entry.size();
        let is_file = entry.header().entry_type().is_file();
        if !entry
            .unpack_in(dest)
            .map_err(decode_error)
            .add_msg(format!("Unpacking {:?} failed", member_name))?
        {
            return Err(Error::InvalidInput(format!(
                "member {:?} escapes the destination",
                member_name
            )));
        }

        if is_file {
            verify_extracted(&target, expected_size, expected_crc)?;
        }
        tracing::trace!("Extracted {:?} to {:?}", member_name, target);
        return Ok(target);
    }

    Err(Error::NotFound {
        path: PathBuf::from(member_name),
    })
}

/// Extracts `member` from the plain tar at `plain_tar`, reading only that
/// member: the handle is positioned at the member's header before the tar
/// reader starts.
pub fn extract_member_at(plain_tar: &Path, member: &ContainerMember, dest: &Path) -> Result<PathBuf> {
    let target = member_dest_path(dest, &member.name).ok_or_else(|| {
        Error::InvalidInput(format!("member {:?} escapes the destination", member.name))
    })?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::open(plain_tar)?;
    file.seek(SeekFrom::Start(member.header_offset))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let mut entries = archive.entries().map_err(decode_error)?;
    let mut entry = entries
        .next()
        .ok_or_else(|| {
            Error::CorruptData(format!(
                "no entry at offset {} for {:?}",
                member.header_offset, member.name
            ))
        })?
        .map_err(decode_error)?;
    if entry.size() != member.size {
        return Err(Error::CorruptData(format!(
            "entry at offset {} has {} bytes, {:?} was listed with {}",
            member.header_offset,
            entry.size(),
            member.name,
            member.size
        )));
    }

    let is_file = entry.header().entry_type().is_file();
    entry
        .unpack(&target)
        .map_err(decode_error)
        .add_msg(format!("Unpacking {:?} failed", member.name))?;
    if is_file {
        verify_extracted(&target, member.size, member.crc32)?;
    }
    tracing::trace!("Extracted {:?} to {:?}", member.name, target);
    Ok(target)
}

fn verify_extracted(target: &Path, expected_size: u64, expected_crc: Option<u32>) -> Result<()> {
    let size = std::fs::metadata(target)?.len();
    if size != expected_size {
        return Err(Error::CorruptData(format!(
            "{:?} has {} bytes, container recorded {}",
            target, size, expected_size
        )));
    }
    if let Some(expected) = expected_crc {
        let actual = file_crc32(target)?;
        if actual != expected {
            return Err(Error::CorruptData(format!(
                "{:?} crc32 {:08x} does not match recorded {:08x}",
                target, actual, expected
            )));
        }
    }
    Ok(())
}
