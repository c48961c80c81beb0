use crate::backup::archive::source_set::SourceSet;
use crate::backup::compress::CompressorConfig;
use crate::backup::coordinator::{CoordinatorConfig, TaskCoordinator};
use crate::backup::encrypt::EncryptorConfig;
use crate::backup::file_ext::container_file_ext;
use crate::backup::fragment::{fragments_dir_name, split};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddDebugObjectAndFnName, AddMsg};
use crate::backup::storage::StorageConfig;
use crate::backup::tar::create_archive;
use crate::backup::validate::{validate_valid_archive_base_name, validate_writable_dir};
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// Reads a YAML job file and validates it.
pub fn load_config<T: DeserializeOwned + Validate>(path: &Path) -> Result<T> {
    let config: T = File::open(path)
        .map_err(Error::from)
        .and_then(|f| serde_yml::from_reader(f).map_err(Error::from))
        .add_msg(format!("Parse YAML config failed: {:?}", path))?;
    config
        .validate()
        .map_err(Error::from)
        .add_msg(format!("Config validation failed: {:?}", path))?;
    Ok(config)
}

/// A backup job: archive `sources`, optionally split the container, then
/// hand it to `storage`.
///
/// The container is built in `work_dir` as `<archive_base_name>.<ext>`
/// where the extension follows the layers (`tar`, `tar.xz`, `tar.xz.age`).
/// With a `fragment_size` (bytes) the fragments land in
/// `<work_dir>/<archive_base_name>_fragments` and only they are stored.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[validate(custom(function = validate_valid_archive_base_name))]
    #[builder(into)]
    archive_base_name: Arc<str>,
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    work_dir: Arc<Path>,
    sources: SourceSet,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    compressor: CompressorConfig,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    encryptor: EncryptorConfig,
    #[validate(range(min = 1))]
    fragment_size: Option<u64>,
    #[validate(nested)]
    storage: StorageConfig,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    coordinator: CoordinatorConfig,
}

/// What a backup job produced.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub container: PathBuf,
    pub member_count: usize,
    /// Entries left out of the container
    pub skipped: Vec<String>,
    pub fragment_count: Option<usize>,
    pub stored: Vec<String>,
}

impl BackupConfig {
    pub fn container_file_name(&self) -> String {
        format!(
            "{}.{}",
            self.archive_base_name,
            container_file_ext(&[&self.compressor, &self.encryptor])
        )
    }

    /// Runs the job on a coordinator of its own, torn down before returning.
    pub fn execute(&self) -> Result<BackupReport> {
        let coordinator = TaskCoordinator::new(&self.coordinator)?;
        self.run(&coordinator)
    }

    #[named]
    pub fn run(&self, coordinator: &TaskCoordinator) -> Result<BackupReport> {
        if self.sources.is_empty() {
            tracing::warn!("No source configured, the container will be empty");
        }

        let container = self.work_dir.join(self.container_file_name());
        let created = create_archive(&self.sources, &container, &self.compressor, &self.encryptor)
            .add_debug_object_and_fn_name(self.archive_base_name.clone(), function_path!())?;
        tracing::info!("Created backup file: {:?}", created.path);

        let skipped = match created.non_fatal_error {
            Some(e) => {
                tracing::warn!("Received non fatal error: {e}");
                e.into_iter().map(|e| e.to_string()).collect()
            }
            None => Vec::new(),
        };

        let (fragment_count, stored) = match self.fragment_size {
            Some(size) => {
                let dir = self
                    .work_dir
                    .join(fragments_dir_name(&self.archive_base_name));
                let split = split(&container, &dir, size, coordinator)?;
                let stored = self.storage.store_fragments(&dir, coordinator)?;
                (Some(split.fragments.len()), stored)
            }
            None => (None, self.storage.store_container(&container, coordinator)?),
        };

        tracing::info!("Backup {:?} stored at {:?}", self.archive_base_name, stored);
        Ok(BackupReport {
            container,
            member_count: created.member_count,
            skipped,
            fragment_count,
            stored,
        })
    }
}
