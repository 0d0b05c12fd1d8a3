//! The Service layer provides the pluggable upload abstraction: a single
//! [`UploadBackend`] contract with interchangeable destinations.
//!
//! An upload takes a readable byte stream plus client metadata, renames the file with a
//! [`FilenameTransform`], writes the stream to the destination and resolves to a URI locating the
//! stored file.
//!
//! It is designed as a library crate to be used by the `server`.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backend;
mod error;
pub mod filename;
mod request;
mod service;
mod stream;

pub use backend::{BoxedBackend, UploadBackend};
pub use error::{UploadError, UploadResult};
pub use filename::{FilenameStrategy, FilenameTransform};
pub use request::{FileMetadata, UploadRequest, UploadedFile};
pub use service::{StorageConfig, UploadService};
pub use stream::PayloadStream;
