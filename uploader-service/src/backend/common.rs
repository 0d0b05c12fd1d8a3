use std::fmt::Debug;

use crate::PayloadStream;
use crate::error::UploadResult;
use crate::request::FileMetadata;

/// A type-erased [`UploadBackend`] instance.
pub type BoxedBackend = Box<dyn UploadBackend>;

/// A destination for uploaded files.
///
/// Backends hold only configuration that is fixed at construction, so a single instance can serve
/// any number of concurrent uploads.
#[async_trait::async_trait]
pub trait UploadBackend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Writes the stream to a new artifact at the destination and returns its URI.
    ///
    /// The stream is drained completely before this resolves. A stream error or transport failure
    /// fails the upload with the underlying error; a truncated artifact is never reported as
    /// success.
    async fn upload(&self, metadata: &FileMetadata, stream: PayloadStream) -> UploadResult<String>;
}
