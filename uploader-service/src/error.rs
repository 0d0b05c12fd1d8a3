use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while uploading a file.
///
/// Transport errors carry the native error of the underlying backend, which remains reachable
/// through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum UploadError {
    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors returned by the object store client, including network and API errors.
    #[error("object store error: {context}")]
    ObjectStore {
        /// The operation that failed.
        context: String,
        /// The error reported by the client.
        #[source]
        cause: object_store::Error,
    },

    /// The filename transform produced a name that cannot be used as a destination.
    #[error("invalid destination name: {0:?}")]
    InvalidName(String),

    /// The configured base URL for object locations is not a valid absolute URL.
    #[error("invalid public url {url:?}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// The parse error.
        #[source]
        cause: url::ParseError,
    },

    /// The destination path cannot be expressed as a URI.
    #[error("invalid destination path: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl UploadError {
    pub(crate) fn object_store(context: impl Into<String>) -> impl FnOnce(object_store::Error) -> Self {
        let context = context.into();
        move |cause| Self::ObjectStore { context, cause }
    }
}

/// Result type for upload operations.
pub type UploadResult<T, E = UploadError> = Result<T, E>;
