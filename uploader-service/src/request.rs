//! Transient per-request value types.

use std::fmt;

use crate::PayloadStream;

/// Client-supplied metadata describing an uploaded file.
///
/// All fields are untrusted. The filename may be empty, lack an extension, or contain path
/// separators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMetadata {
    /// The original filename as sent by the client.
    pub filename: String,
    /// The MIME type of the file, e.g. `image/jpeg`.
    pub mimetype: String,
    /// The transfer encoding of the file, e.g. `7bit`.
    pub encoding: String,
}

impl FileMetadata {
    /// Creates metadata for the given filename and MIME type with the default `7bit` encoding.
    pub fn new(filename: impl Into<String>, mimetype: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            encoding: "7bit".into(),
        }
    }
}

/// A single file to upload: its metadata and the stream carrying its contents.
pub struct UploadRequest {
    /// Metadata of the uploaded file.
    pub metadata: FileMetadata,
    /// The file contents. Consumed by the upload.
    pub stream: PayloadStream,
}

impl UploadRequest {
    /// Creates a new upload request.
    pub fn new(metadata: FileMetadata, stream: PayloadStream) -> Self {
        Self { metadata, stream }
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A successfully stored file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    /// URI locating the stored file. Never empty.
    pub uri: String,
    /// Metadata of the uploaded file as supplied by the client.
    pub metadata: FileMetadata,
}
