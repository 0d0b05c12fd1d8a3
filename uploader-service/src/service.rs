//! The [`UploadService`] handed to request handlers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures_util::{StreamExt, TryStreamExt};

use crate::backend::{
    BoxedBackend, LocalFsBackend, ObjectStoreBackend, S3Config, TransferOptions, UploadParams,
};
use crate::error::UploadResult;
use crate::filename::FilenameTransform;
use crate::request::{UploadRequest, UploadedFile};

/// Configuration to initialize an [`UploadService`].
#[derive(Debug)]
pub enum StorageConfig<'a> {
    /// Store uploads in a local directory.
    FileSystem {
        /// The directory where files will be stored. It must already exist.
        path: &'a Path,
        /// How stored files are named.
        filename: FilenameTransform,
    },
    /// Store uploads in an S3-compatible bucket.
    S3Compatible {
        /// Bucket and connection settings.
        s3: S3Config<'a>,
        /// Key prefix for all uploaded objects.
        prefix: &'a str,
        /// Overrides the base URL of returned locations.
        public_url: Option<&'a str>,
        /// Default parameters for all uploaded objects.
        params: UploadParams,
        /// Multipart transfer tuning.
        transfer: TransferOptions,
        /// How stored objects are named.
        filename: FilenameTransform,
    },
}

/// High-level handle for storing uploaded files.
///
/// The service wraps a single [`UploadBackend`](crate::UploadBackend) and is cheap to clone. All
/// clones share the same backend.
#[derive(Clone, Debug)]
pub struct UploadService(Arc<BoxedBackend>);

impl UploadService {
    /// Creates a new `UploadService` on top of the given backend.
    pub fn new(backend: BoxedBackend) -> Self {
        Self(Arc::new(backend))
    }

    /// Creates a new `UploadService` with the specified configuration.
    pub fn from_config(config: StorageConfig<'_>) -> UploadResult<Self> {
        let backend: BoxedBackend = match config {
            StorageConfig::FileSystem { path, filename } => {
                Box::new(LocalFsBackend::with_transform(path, filename))
            }
            StorageConfig::S3Compatible {
                s3,
                prefix,
                public_url,
                params,
                transfer,
                filename,
            } => {
                let mut backend = ObjectStoreBackend::s3(&s3, prefix)?;
                if let Some(public_url) = public_url {
                    backend = backend.with_public_url(public_url)?;
                }
                Box::new(
                    backend
                        .with_params(params)
                        .with_transfer(transfer)
                        .with_transform(filename),
                )
            }
        };

        Ok(Self::new(backend))
    }

    /// The name of the configured backend.
    pub fn backend_name(&self) -> &'static str {
        self.0.name()
    }

    /// Stores the uploaded file and returns where it was stored.
    ///
    /// Emits `upload.latency` and `upload.size` distributions for successful uploads, and an
    /// `upload.failed` counter otherwise.
    pub async fn upload(&self, request: UploadRequest) -> UploadResult<UploadedFile> {
        let UploadRequest { metadata, stream } = request;
        let backend = self.backend_name();
        let start = Instant::now();

        let received = Arc::new(AtomicU64::new(0));
        let stream = {
            let received = Arc::clone(&received);
            stream
                .inspect_ok(move |chunk| {
                    received.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                })
                .boxed()
        };

        match self.0.upload(&metadata, stream).await {
            Ok(uri) => {
                debug_assert!(!uri.is_empty(), "backends must return a URI");
                let size = received.load(Ordering::Acquire);
                tracing::info!(
                    backend,
                    filename = %metadata.filename,
                    %uri,
                    size,
                    elapsed = ?start.elapsed(),
                    "Stored upload"
                );

                merni::distribution!(
                    "upload.latency"@s: start.elapsed(),
                    "backend_type" => backend
                );
                merni::distribution!(
                    "upload.size"@b: size,
                    "backend_type" => backend
                );

                Ok(UploadedFile { uri, metadata })
            }
            Err(err) => {
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    backend,
                    filename = %metadata.filename,
                    "Upload failed"
                );
                merni::counter!("upload.failed": 1, "backend_type" => backend);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::BytesMut;
    use futures_util::TryStreamExt;

    use super::*;
    use crate::request::FileMetadata;
    use crate::stream::{make_chunked_stream, make_stream};
    use crate::{PayloadStream, UploadBackend, UploadError};

    /// Records every upload in memory and hands out sequential URIs.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        uploads: Arc<Mutex<Vec<(FileMetadata, Vec<u8>)>>>,
    }

    #[async_trait::async_trait]
    impl UploadBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn upload(
            &self,
            metadata: &FileMetadata,
            stream: PayloadStream,
        ) -> UploadResult<String> {
            let contents: BytesMut = stream.try_collect().await?;
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((metadata.clone(), contents.to_vec()));
            Ok(format!("memory://{}", uploads.len()))
        }
    }

    #[tokio::test]
    async fn delegates_to_backend() {
        let service = UploadService::new(Box::new(RecordingBackend::default()));
        let metadata = FileMetadata::new("sexy-me.jpg", "image/jpeg");

        let file = service
            .upload(UploadRequest::new(metadata.clone(), make_stream(b"oh hai!")))
            .await
            .unwrap();

        assert_eq!(service.backend_name(), "recording");
        assert_eq!(file.uri, "memory://1");
        assert_eq!(file.metadata, metadata);
    }

    #[tokio::test]
    async fn passes_measured_payload_through() {
        let backend = RecordingBackend::default();
        let uploads = Arc::clone(&backend.uploads);
        let service = UploadService::new(Box::new(backend));
        let contents: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();

        service
            .upload(UploadRequest::new(
                FileMetadata::new("blob.bin", "application/octet-stream"),
                make_chunked_stream(&contents, 999),
            ))
            .await
            .unwrap();

        let uploads = uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, contents);
    }

    #[tokio::test]
    async fn uploads_to_filesystem() {
        let tempdir = tempfile::tempdir().unwrap();
        let service = UploadService::from_config(StorageConfig::FileSystem {
            path: tempdir.path(),
            filename: FilenameTransform::identity(),
        })
        .unwrap();

        let file = service
            .upload(UploadRequest::new(
                FileMetadata::new("sexy-me.jpg", "image/jpeg"),
                make_stream(b"oh hai!"),
            ))
            .await
            .unwrap();

        assert_eq!(service.backend_name(), "local-fs");
        assert!(file.uri.starts_with("file:///"));
        assert!(file.uri.ends_with("/sexy-me.jpg"));
        let contents = std::fs::read(tempdir.path().join("sexy-me.jpg")).unwrap();
        assert_eq!(contents, b"oh hai!");
    }

    #[tokio::test]
    async fn propagates_backend_errors() {
        let tempdir = tempfile::tempdir().unwrap();
        let missing = tempdir.path().join("missing");
        let service = UploadService::from_config(StorageConfig::FileSystem {
            path: &missing,
            filename: FilenameTransform::default(),
        })
        .unwrap();

        let err = service
            .upload(UploadRequest::new(
                FileMetadata::new("a.txt", "text/plain"),
                make_stream(b"a"),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Io(_)), "unexpected error: {err}");
    }

    #[test]
    fn builds_s3_service() {
        let service = UploadService::from_config(StorageConfig::S3Compatible {
            s3: S3Config {
                bucket: "uploads",
                region: "us-east-1",
                endpoint: Some("http://localhost:9000"),
                ..Default::default()
            },
            prefix: "users/avatars",
            public_url: Some("https://cdn.example.com"),
            params: UploadParams::default(),
            transfer: TransferOptions::default(),
            filename: FilenameTransform::default(),
        })
        .unwrap();

        assert_eq!(service.backend_name(), "object-store");
    }
}
