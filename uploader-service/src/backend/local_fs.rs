use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::pin;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use url::Url;

use super::UploadBackend;
use crate::PayloadStream;
use crate::error::{UploadError, UploadResult};
use crate::filename::FilenameTransform;
use crate::request::FileMetadata;

/// Stores uploads as files in a local directory.
///
/// The directory must exist. Files are created or truncated at `<root>/<transformed name>`, so two
/// uploads mapping to the same name overwrite each other.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    filename: FilenameTransform,
}

impl LocalFsBackend {
    /// Creates a backend writing into `root`, naming files with the default transform.
    ///
    /// The directory is not checked here. A missing directory fails the first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_transform(root, FilenameTransform::default())
    }

    /// Creates a backend writing into `root`, naming files with the given transform.
    pub fn with_transform(root: impl Into<PathBuf>, filename: FilenameTransform) -> Self {
        Self {
            root: root.into(),
            filename,
        }
    }

    /// Resolves a transformed name to an absolute path inside the root directory.
    fn resolve(&self, name: &str) -> UploadResult<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(UploadError::InvalidName(name.to_owned())),
        }

        let path = std::path::absolute(self.root.join(name))?;
        Ok(normalize(&path))
    }
}

/// Lexically removes `.` and `..` components from an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Copies the stream into the file and makes sure it reached the disk.
async fn write_stream(file: File, stream: PayloadStream) -> io::Result<u64> {
    let mut reader = pin!(StreamReader::new(stream));
    let mut writer = BufWriter::new(file);

    let written = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    Ok(written)
}

#[async_trait::async_trait]
impl UploadBackend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "local-fs"
    }

    #[tracing::instrument(level = "trace", fields(filename = %metadata.filename), skip_all)]
    async fn upload(&self, metadata: &FileMetadata, stream: PayloadStream) -> UploadResult<String> {
        let name = self.filename.apply(&metadata.filename);
        let path = self.resolve(&name)?;
        tracing::debug!(path = %path.display(), "Writing to local filesystem");

        let file = File::create(&path).await?;
        match write_stream(file, stream).await {
            Ok(written) => tracing::debug!(written, "Finished writing file"),
            Err(err) => {
                // Do not leave a truncated file under the destination name.
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        error = &remove_err as &dyn std::error::Error,
                        path = %path.display(),
                        "Failed to remove partially written file"
                    );
                }
                return Err(err.into());
            }
        }

        let uri = Url::from_file_path(&path).map_err(|()| UploadError::InvalidPath(path))?;
        Ok(uri.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::stream::{make_chunked_stream, make_failing_stream, make_stream};

    fn metadata(filename: &str) -> FileMetadata {
        FileMetadata::new(filename, "image/jpeg")
    }

    fn uri_to_path(uri: &str) -> PathBuf {
        Url::parse(uri).unwrap().to_file_path().unwrap()
    }

    #[tokio::test]
    async fn stores_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tempdir.path());

        let uri = backend
            .upload(&metadata("sexy-me.jpg"), make_stream(b"oh hai!"))
            .await
            .unwrap();

        assert!(uri.starts_with("file:///"));
        assert!(uri.ends_with(".jpg"));

        let path = uri_to_path(&uri);
        assert_eq!(path.parent().unwrap(), tempdir.path());
        assert_eq!(std::fs::read(path).unwrap(), b"oh hai!");
    }

    #[tokio::test]
    async fn stores_chunked_stream() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tempdir.path());
        let contents: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();

        let uri = backend
            .upload(&metadata("blob.bin"), make_chunked_stream(&contents, 4096))
            .await
            .unwrap();

        assert_eq!(std::fs::read(uri_to_path(&uri)).unwrap(), contents);
    }

    #[tokio::test]
    async fn timestamp_transform() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().join("tmp");
        std::fs::create_dir(&root).unwrap();
        let backend = LocalFsBackend::with_transform(&root, FilenameTransform::timestamp());

        let uri = backend
            .upload(&metadata("sexy-me.jpg"), make_stream(b"jpeg bytes"))
            .await
            .unwrap();

        let path = uri_to_path(&uri);
        let name = path.file_name().unwrap().to_str().unwrap();
        let (millis, rest) = name.split_once('_').unwrap();
        assert!(millis.parse::<u128>().is_ok());
        assert_eq!(rest, "sexy-me.jpg");
        assert_eq!(path.parent().unwrap(), std::path::absolute(&root).unwrap());
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn relative_root_resolves_to_absolute_uri() {
        let workdir = tempfile::tempdir_in(".").unwrap();
        let dirname = workdir.path().file_name().unwrap();
        let root = Path::new(dirname).join("tmp");
        std::fs::create_dir(&root).unwrap();
        assert!(root.is_relative());

        let backend = LocalFsBackend::with_transform(&root, FilenameTransform::timestamp());
        let uri = backend
            .upload(&metadata("sexy-me.jpg"), make_stream(b"jpeg bytes"))
            .await
            .unwrap();

        let path = uri_to_path(&uri);
        assert!(path.is_absolute());
        assert_eq!(
            path.parent().unwrap(),
            std::env::current_dir().unwrap().join(&root)
        );
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_sexy-me.jpg"));
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn empty_stream_creates_empty_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tempdir.path());

        let uri = backend
            .upload(&metadata("empty.txt"), make_stream(b""))
            .await
            .unwrap();

        let path = uri_to_path(&uri);
        assert!(path.is_file());
        assert_eq!(std::fs::metadata(path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn tolerates_odd_filenames() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tempdir.path());

        for filename in ["", "README", "../../etc/passwd", ".hidden"] {
            let uri = backend
                .upload(&metadata(filename), make_stream(b"x"))
                .await
                .unwrap();
            let path = uri_to_path(&uri);
            assert_eq!(path.parent().unwrap(), tempdir.path());
        }
    }

    #[tokio::test]
    async fn identity_transform_overwrites() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend =
            LocalFsBackend::with_transform(tempdir.path(), FilenameTransform::identity());

        let first = backend
            .upload(&metadata("same.txt"), make_stream(b"first version"))
            .await
            .unwrap();
        let second = backend
            .upload(&metadata("same.txt"), make_stream(b"second"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(uri_to_path(&second)).unwrap(), b"second");
    }

    #[tokio::test]
    async fn default_transform_does_not_overwrite() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tempdir.path());

        let first = backend
            .upload(&metadata("same.txt"), make_stream(b"first"))
            .await
            .unwrap();
        let second = backend
            .upload(&metadata("same.txt"), make_stream(b"second"))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(uri_to_path(&first)).unwrap(), b"first");
        assert_eq!(std::fs::read(uri_to_path(&second)).unwrap(), b"second");
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend =
            LocalFsBackend::with_transform(tempdir.path(), FilenameTransform::identity());

        for filename in ["", ".", "..", "../escape.txt", "nested/file.txt"] {
            let err = backend
                .upload(&metadata(filename), make_stream(b"x"))
                .await
                .unwrap_err();
            assert!(
                matches!(err, UploadError::InvalidName(_)),
                "unexpected error for {filename:?}: {err}"
            );
        }

        assert_eq!(std::fs::read_dir(tempdir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().join("does-not-exist");
        let backend = LocalFsBackend::with_transform(&root, FilenameTransform::identity());

        let err = backend
            .upload(&metadata("sexy-me.jpg"), make_stream(b"oh hai!"))
            .await
            .unwrap_err();

        let UploadError::Io(err) = err else {
            panic!("expected i/o error, got {err}");
        };
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!root.exists());
        assert!(!tempdir.path().join("sexy-me.jpg").exists());
    }

    #[tokio::test]
    async fn stream_error_removes_partial_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend =
            LocalFsBackend::with_transform(tempdir.path(), FilenameTransform::identity());

        let err = backend
            .upload(&metadata("partial.bin"), make_failing_stream(b"half of it"))
            .await
            .unwrap_err();

        let UploadError::Io(err) = err else {
            panic!("expected i/o error, got {err}");
        };
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(!tempdir.path().join("partial.bin").exists());
    }

    #[tokio::test]
    async fn concurrent_uploads() {
        let tempdir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalFsBackend::new(tempdir.path()));

        let uploads = (0..16).map(|i| {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                let contents = format!("file number {i}");
                let uri = backend
                    .upload(&metadata("same.txt"), make_stream(contents.as_bytes()))
                    .await
                    .unwrap();
                (uri, contents)
            })
        });

        for upload in uploads.collect::<Vec<_>>() {
            let (uri, contents) = upload.await.unwrap();
            assert_eq!(std::fs::read(uri_to_path(&uri)).unwrap(), contents.as_bytes());
        }
        assert_eq!(std::fs::read_dir(tempdir.path()).unwrap().count(), 16);
    }
}
