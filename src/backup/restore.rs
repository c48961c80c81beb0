//! Extract-all: rebuilds a container's content under a destination
//! directory, one extraction unit per file member.

use crate::backup::archive::member_dest_path;
use crate::backup::container::{extract_member_at, list_members, unseal, ContainerMember};
use crate::backup::coordinator::{BatchResult, BatchSummary, TaskCoordinator, UnitOfWork, UnitOutcome};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static EXTRACT_OPERATION: &str = "Extract";

/// Extracts one member from its own handle on the unsealed tar.
#[derive(Debug)]
pub struct ExtractMember {
    plain_tar: Arc<Path>,
    name: Arc<str>,
    member: ContainerMember,
    dest: Arc<Path>,
}

impl ExtractMember {
    pub fn new(plain_tar: Arc<Path>, member: ContainerMember, dest: Arc<Path>) -> Self {
        Self {
            plain_tar,
            name: member.name.as_str().into(),
            member,
            dest,
        }
    }
}

impl UnitOfWork for ExtractMember {
    fn identifier(&self) -> Arc<str> {
        self.name.clone()
    }

    fn execute(self) -> Result<()> {
        extract_member_at(&self.plain_tar, &self.member, &self.dest).map(|_| ())
    }
}

/// What [`restore_all`] did.
#[derive(Debug)]
pub struct RestoreReport {
    pub destination: PathBuf,
    pub directories_created: usize,
    /// File members, plus members rejected before dispatch
    pub batch: BatchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub destination: PathBuf,
    pub directories_created: usize,
    pub files: BatchSummary,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.batch.is_success()
    }

    pub fn summary(&self) -> RestoreSummary {
        RestoreSummary {
            destination: self.destination.clone(),
            directories_created: self.directories_created,
            files: self.batch.summary(),
        }
    }
}

/// Restores every member of `container` under `dest`, unsealing layered
/// containers into the system temporary directory.
///
/// See [`restore_all_in`].
pub fn restore_all(
    container: &Path,
    dest: &Path,
    passphrase: Option<&RedactedString>,
    coordinator: &TaskCoordinator,
) -> Result<RestoreReport> {
    restore_all_in(container, dest, passphrase, &std::env::temp_dir(), coordinator)
}

/// Restores every member of `container` under `dest`.
///
/// A layered container is decoded once into a plain tar in `scratch_dir`,
/// removed when the call returns, and its member list is read from it, so
/// a wrong or missing passphrase fails with [`Error::AuthFailure`] before
/// anything is written under `dest`. Directory members are created here in
/// order; file members are extracted in parallel, each unit seeking to its
/// own member. Failed members do not fail the call: they are logged and
/// reported in the returned [`RestoreReport`].
#[named]
pub fn restore_all_in(
    container: &Path,
    dest: &Path,
    passphrase: Option<&RedactedString>,
    scratch_dir: &Path,
    coordinator: &TaskCoordinator,
) -> Result<RestoreReport> {
    let plain = unseal(container, passphrase, scratch_dir).add_fn_name(function_path!())?;
    let members = list_members(plain.path(), None).add_fn_name(function_path!())?;
    if members.is_empty() {
        tracing::info!("Container {:?} is empty, nothing to restore", container);
        return Ok(RestoreReport {
            destination: dest.to_path_buf(),
            directories_created: 0,
            batch: BatchResult::new(EXTRACT_OPERATION, Vec::new()),
        });
    }

    std::fs::create_dir_all(dest)
        .map_err(Error::from)
        .add_msg(format!("Create restore directory {:?} failed", dest))?;
    tracing::info!(
        "Restoring {} members of {:?} into {:?}",
        members.len(),
        container,
        dest
    );

    let plain_tar: Arc<Path> = plain.path().into();
    let shared_dest: Arc<Path> = dest.into();

    let mut directories_created = 0;
    let mut rejected = Vec::new();
    let mut units = Vec::new();
    for member in members {
        let Some(target) = member_dest_path(dest, &member.name) else {
            tracing::warn!("Skipping member {:?}: outside the restore directory", member.name);
            rejected.push(UnitOutcome::failed(
                member.name.as_str(),
                Error::InvalidInput(format!("member {:?} escapes the destination", member.name)),
            ));
            continue;
        };

        if member.is_dir() {
            match std::fs::create_dir_all(&target) {
                Ok(()) => directories_created += 1,
                Err(e) => {
                    tracing::warn!("Create directory {:?} failed: {e}", target);
                    rejected.push(UnitOutcome::failed(member.name.as_str(), e.into()));
                }
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Create directory {:?} failed: {e}", parent);
                rejected.push(UnitOutcome::failed(member.name.as_str(), e.into()));
                continue;
            }
        }
        units.push(ExtractMember::new(plain_tar.clone(), member, shared_dest.clone()));
    }

    let mut batch = coordinator.run(EXTRACT_OPERATION, units);
    batch.extend(BatchResult::new(EXTRACT_OPERATION, rejected));

    let report = RestoreReport {
        destination: dest.to_path_buf(),
        directories_created,
        batch,
    };
    if report.is_complete() {
        tracing::info!("Restore into {:?} complete", dest);
    } else {
        tracing::warn!(
            "Restore into {:?} incomplete: {}",
            dest,
            report.batch.summary()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::source_set::SourceSet;
    use crate::backup::compress::xz::XzConfig;
    use crate::backup::compress::CompressorConfig;
    use crate::backup::container::file_crc32;
    use crate::backup::coordinator::CoordinatorConfig;
    use crate::backup::encrypt::age::AgeEncryptorConfig;
    use crate::backup::encrypt::EncryptorConfig;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::tar::create_archive;
    use tempfile::TempDir;

    const PASSPHRASE: &str = "correct horse battery";

    fn coordinator(threads: usize) -> TaskCoordinator {
        TaskCoordinator::new(&CoordinatorConfig::builder().threads(threads).build()).unwrap()
    }

    fn xz() -> CompressorConfig {
        CompressorConfig::Xz(XzConfig::builder().level(1).thread(1).build())
    }

    fn age(passphrase: &str) -> EncryptorConfig {
        EncryptorConfig::Age(AgeEncryptorConfig::Passphrase {
            passphrase: passphrase.into(),
            work_factor: Some(2),
        })
    }

    /// Creates `root/<name>` with a handful of nested files and returns the
    /// relative paths and contents.
    fn populate(root: &Path, files: usize) -> Vec<(String, Vec<u8>)> {
        (0..files)
            .map(|i| {
                let rel = format!("dir{}/sub/file{:02}.bin", i % 3, i);
                let content: Vec<u8> = (0..(i * 97 + 5)).map(|b| (b * (i + 1)) as u8).collect();
                let path = root.join(&rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, &content).unwrap();
                (rel, content)
            })
            .collect()
    }

    fn assert_restored(dest: &Path, base: &str, files: &[(String, Vec<u8>)]) {
        for (rel, content) in files {
            let restored = dest.join(base).join(rel);
            assert_eq!(&std::fs::read(&restored).unwrap(), content, "{rel}");
        }
    }

    #[test]
    fn test_round_trip_without_password() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("data");
        let files = populate(&src, 7);

        let container = temp_dir.path().join("out/data.tar.xz");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &xz(), &EncryptorConfig::None).unwrap();

        let dest = temp_dir.path().join("restore");
        let report = restore_all(&container, &dest, None, &coordinator(4)).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.batch.total(), 7);
        assert_restored(&dest, "data", &files);
    }

    #[test]
    fn test_round_trip_with_password() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("secret");
        let files = populate(&src, 4);

        let container = temp_dir.path().join("secret.tar.xz.age");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &xz(), &age(PASSPHRASE)).unwrap();

        let dest = temp_dir.path().join("restore");
        let passphrase = RedactedString::from(PASSPHRASE);
        let report = restore_all(&container, &dest, Some(&passphrase), &coordinator(2)).unwrap();
        assert!(report.is_complete());
        assert_restored(&dest, "secret", &files);
    }

    #[test]
    fn test_scratch_copy_is_removed_after_restore() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("secret");
        let files = populate(&src, 24);

        let container = temp_dir.path().join("secret.tar.xz.age");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &xz(), &age(PASSPHRASE)).unwrap();

        let scratch = temp_dir.path().join("scratch");
        let dest = temp_dir.path().join("restore");
        let passphrase = RedactedString::from(PASSPHRASE);
        let report =
            restore_all_in(&container, &dest, Some(&passphrase), &scratch, &coordinator(6)).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.batch.total(), 24);
        assert_restored(&dest, "secret", &files);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[test]
    fn test_wrong_password_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("secret");
        populate(&src, 3);

        let container = temp_dir.path().join("secret.tar.age");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &CompressorConfig::None, &age(PASSPHRASE)).unwrap();

        let coordinator = coordinator(2);
        let dest = temp_dir.path().join("restore");
        let wrong = RedactedString::from("not the passphrase");
        let err = restore_all(&container, &dest, Some(&wrong), &coordinator).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailure);
        assert!(!dest.exists());

        let err = restore_all(&container, &dest, None, &coordinator).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailure);
        assert!(!dest.exists());
    }

    #[test]
    fn test_empty_container_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("empty.tar.xz");
        create_archive(&SourceSet::default(), &container, &xz(), &EncryptorConfig::None).unwrap();

        let dest = temp_dir.path().join("restore");
        let report = restore_all(&container, &dest, None, &coordinator(2)).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.batch.total(), 0);
    }

    #[test]
    fn test_one_failed_member_does_not_stop_the_rest() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("data");
        std::fs::create_dir_all(&src).unwrap();
        for i in 1..=10 {
            std::fs::write(src.join(format!("f{i:02}.txt")), format!("file {i}")).unwrap();
        }
        let container = temp_dir.path().join("data.tar");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &CompressorConfig::None, &EncryptorConfig::None).unwrap();

        // a non-empty directory squatting on member 5 makes its extraction fail
        let dest = temp_dir.path().join("restore");
        std::fs::create_dir_all(dest.join("data/f05.txt/blocker")).unwrap();

        let report = restore_all(&container, &dest, None, &coordinator(4)).unwrap();
        let summary = report.summary();
        assert_eq!(summary.files.total, 10);
        assert_eq!(summary.files.failed, 1);
        assert_eq!(summary.files.failed_ids, vec![Arc::<str>::from("data/f05.txt")]);
        for i in (1..=10).filter(|i| *i != 5) {
            let restored = std::fs::read_to_string(dest.join(format!("data/f{i:02}.txt"))).unwrap();
            assert_eq!(restored, format!("file {i}"));
        }
    }

    #[test]
    fn test_concurrent_extraction_matches_checksums() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("many");
        let files = populate(&src, 48);

        let container = temp_dir.path().join("many.tar.xz");
        let set: SourceSet = [&src].into_iter().collect();
        create_archive(&set, &container, &xz(), &EncryptorConfig::None).unwrap();
        let before = std::fs::read(&container).unwrap();

        let dest = temp_dir.path().join("restore");
        let report = restore_all(&container, &dest, None, &coordinator(8)).unwrap();
        assert!(report.is_complete());
        assert_eq!(std::fs::read(&container).unwrap(), before);

        for member in list_members(&container, None).unwrap() {
            let restored = dest.join(&member.name);
            assert_eq!(Some(file_crc32(&restored).unwrap()), member.crc32, "{}", member.name);
        }
        assert_restored(&dest, "many", &files);
    }

    #[test]
    fn test_directory_members_are_created() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("dirs.tar");
        {
            let mut builder = tar::Builder::new(std::fs::File::create(&container).unwrap());
            builder.append_dir("top/empty", temp_dir.path()).unwrap();
            let mut header = tar::Header::new_gnu();
            header.set_size(5);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "top/file.txt", &b"hello"[..])
                .unwrap();
            builder.finish().unwrap();
        }

        let dest = temp_dir.path().join("restore");
        let report = restore_all(&container, &dest, None, &coordinator(2)).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.directories_created, 1);
        assert_eq!(report.batch.total(), 1);
        assert!(dest.join("top/empty").is_dir());
        assert_eq!(std::fs::read_to_string(dest.join("top/file.txt")).unwrap(), "hello");
    }

    #[test]
    fn test_summary_serializes() {
        let report = RestoreReport {
            destination: PathBuf::from("/restore"),
            directories_created: 2,
            batch: BatchResult::new(EXTRACT_OPERATION, vec![UnitOutcome::succeeded("a")]),
        };
        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["directories_created"], 2);
        assert_eq!(json["files"]["succeeded"], 1);
    }
}
