//! Upload destinations.
//!
//! Every destination implements [`UploadBackend`]. Callers should only ever depend on the trait
//! (usually as a [`BoxedBackend`]) and choose the concrete backend when wiring up the service.

mod common;
mod local_fs;
mod object_storage;

pub use common::{BoxedBackend, UploadBackend};
pub use local_fs::LocalFsBackend;
pub use object_storage::{ObjectStoreBackend, S3Config, TransferOptions, UploadParams};
