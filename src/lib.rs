//! # frag_backup
//!
//! Backs up directories into a single compressed, optionally encrypted
//! container, splits it into fixed-size fragments for size-limited media,
//! and restores it again.
//!
//! ## Features
//!
//! - **Containers**: tar, XZ (LZMA) compression, age passphrase encryption
//! - **Fragments**: `<name>.partNNN` pieces written in parallel, merged in index order
//! - **Parallel restore**: every member extracted by its own unit of work
//! - **Storage**: local directory, removable media or a blob store
//! - **Partial failures**: per-unit outcomes collected into a batch report
//!
//! ## Quick Start
//!
//! ```no_run
//! use frag_backup::backup::backup_config::{load_config, BackupConfig};
//!
//! // Load and validate a job from a YAML file
//! let config: BackupConfig = load_config("backup.yml".as_ref())?;
//!
//! // Archive, split and store
//! let report = config.execute()?;
//! println!("stored at {:?}", report.stored);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
