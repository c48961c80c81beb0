//! Moving finished containers and fragments to where they are kept, and
//! back: local or removable-media copies and a blob store.

pub mod blob;
pub mod copy;
pub mod dir_store;

pub use blob::{download_all, upload_all, BlobId, BlobStore, RetryPolicy};
pub use copy::{copy_file, copy_fragments};
pub use dir_store::DirBlobStore;
