use crate::backup::coordinator::{CoordinatorConfig, TaskCoordinator};
use crate::backup::file_ext::strip_container_ext;
use crate::backup::fragment::{fragments_dir_name, merge};
use crate::backup::redacted::RedactedString;
use crate::backup::restore::{restore_all_in, RestoreReport};
use crate::backup::result_error::result::Result;
use crate::backup::storage::StorageConfig;
use crate::backup::validate::{validate_valid_archive_base_name, validate_writable_dir};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

/// A restore job: fetch the container (or its fragments) from `source`,
/// merge if needed, then extract everything into `restore_to`.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RestoreConfig {
    /// Container file name as stored, e.g. `nightly.tar.xz.age`
    #[validate(custom(function = validate_valid_archive_base_name))]
    #[builder(into)]
    archive_file_name: Arc<str>,
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    work_dir: Arc<Path>,
    #[builder(into)]
    restore_to: Arc<Path>,
    #[validate(nested)]
    source: StorageConfig,
    #[serde(default)]
    #[builder(default)]
    fragmented: bool,
    passphrase: Option<RedactedString>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    coordinator: CoordinatorConfig,
}

impl RestoreConfig {
    pub fn execute(&self) -> Result<RestoreReport> {
        let coordinator = TaskCoordinator::new(&self.coordinator)?;
        self.run(&coordinator)
    }

    /// Local path of the container, merged from fragments when the job is
    /// fragmented.
    fn obtain_container(&self, coordinator: &TaskCoordinator) -> Result<PathBuf> {
        let file_name = self.archive_file_name.as_ref();
        if !self.fragmented {
            return self
                .source
                .fetch_container(file_name, &self.work_dir, coordinator);
        }

        let dir_name = fragments_dir_name(strip_container_ext(file_name));
        let fragments_dir =
            self.source
                .fetch_fragments(file_name, &dir_name, &self.work_dir, coordinator)?;
        let merged = merge(&fragments_dir, file_name, &self.work_dir.join(file_name))?;
        Ok(merged.output)
    }

    pub fn run(&self, coordinator: &TaskCoordinator) -> Result<RestoreReport> {
        let container = self.obtain_container(coordinator)?;
        tracing::info!("Restoring from {:?} into {:?}", container, self.restore_to);
        restore_all_in(
            &container,
            &self.restore_to,
            self.passphrase.as_ref(),
            &self.work_dir,
            coordinator,
        )
    }
}
