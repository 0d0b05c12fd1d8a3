//! The GraphQL schema exposing file uploads.
//!
//! Uploads follow the [GraphQL multipart request spec]: the client sends the operation and the
//! file as parts of a `multipart/form-data` request, which is resolved into an [`Upload`] before
//! the mutation runs.
//!
//! ```graphql
//! mutation ($file: Upload!) {
//!   singleUpload(file: $file) { filename mimetype encoding uri }
//! }
//! ```
//!
//! [GraphQL multipart request spec]: https://github.com/jaydenseric/graphql-multipart-request-spec

use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, Object, Schema, SimpleObject, Upload, UploadValue,
};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use uploader_service::{FileMetadata, UploadRequest, UploadService, UploadedFile};

use crate::error::ApiError;

/// Content type assumed when the client does not declare one.
const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Transfer encoding reported for multipart file parts.
const DEFAULT_ENCODING: &str = "7bit";

/// The schema served at `/graphql`.
pub type UploadSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Builds the schema with the given service as shared data.
pub fn schema(service: UploadService) -> UploadSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(service)
        .finish()
}

/// A stored file, as returned to the client.
#[derive(Debug, SimpleObject)]
#[graphql(name = "File")]
pub struct FileObject {
    /// The original filename as sent by the client.
    pub filename: String,
    /// The declared MIME type.
    pub mimetype: String,
    /// The transfer encoding.
    pub encoding: String,
    /// Where the file was stored.
    pub uri: String,
}

impl From<UploadedFile> for FileObject {
    fn from(file: UploadedFile) -> Self {
        let UploadedFile { uri, metadata } = file;
        Self {
            filename: metadata.filename,
            mimetype: metadata.mimetype,
            encoding: metadata.encoding,
            uri,
        }
    }
}

/// Read-only queries.
#[derive(Debug)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The name of the storage backend receiving uploads.
    async fn backend(&self, ctx: &Context<'_>) -> async_graphql::Result<String> {
        Ok(ctx.data::<UploadService>()?.backend_name().to_owned())
    }
}

/// Upload mutations.
#[derive(Debug)]
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Stores a single file and returns where it was stored.
    async fn single_upload(
        &self,
        ctx: &Context<'_>,
        file: Upload,
    ) -> async_graphql::Result<FileObject> {
        let service = ctx.data::<UploadService>()?;
        let value = file
            .value(ctx)
            .map_err(|err| ApiError::BadRequest(format!("cannot read upload: {err}")).extend())?;

        let request = upload_request(value);
        tracing::debug!(filename = %request.metadata.filename, "Received upload");

        let file = service
            .upload(request)
            .await
            .map_err(|err| ApiError::from(err).extend())?;

        Ok(file.into())
    }
}

/// Turns a received multipart file into a streaming upload request.
fn upload_request(value: UploadValue) -> UploadRequest {
    let metadata = FileMetadata {
        filename: value.filename,
        mimetype: value
            .content_type
            .unwrap_or_else(|| DEFAULT_MIMETYPE.to_owned()),
        encoding: DEFAULT_ENCODING.to_owned(),
    };

    let file = tokio::fs::File::from_std(value.content);
    UploadRequest::new(metadata, ReaderStream::new(file).boxed())
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, Write};

    use bytes::BytesMut;
    use futures_util::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn converts_upload_value() {
        let mut content = tempfile::tempfile().unwrap();
        content.write_all(b"oh hai!").unwrap();
        content.rewind().unwrap();

        let request = upload_request(UploadValue {
            filename: "sexy-me.jpg".into(),
            content_type: None,
            content,
        });

        assert_eq!(request.metadata.filename, "sexy-me.jpg");
        assert_eq!(request.metadata.mimetype, DEFAULT_MIMETYPE);
        assert_eq!(request.metadata.encoding, DEFAULT_ENCODING);

        let contents: BytesMut = request.stream.try_collect().await.unwrap();
        assert_eq!(contents.as_ref(), b"oh hai!");
    }

    #[test]
    fn exposes_sdl() {
        let tempdir = tempfile::tempdir().unwrap();
        let service = UploadService::new(Box::new(
            uploader_service::backend::LocalFsBackend::new(tempdir.path()),
        ));
        let sdl = schema(service).sdl();

        assert!(sdl.contains("singleUpload(file: Upload!): File!"));
        assert!(sdl.contains("scalar Upload"));
    }

    #[tokio::test]
    async fn queries_backend() {
        let tempdir = tempfile::tempdir().unwrap();
        let service = UploadService::new(Box::new(
            uploader_service::backend::LocalFsBackend::new(tempdir.path()),
        ));

        let response = schema(service).execute("{ backend }").await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data.into_json().unwrap(),
            serde_json::json!({ "backend": "local-fs" })
        );
    }
}
