use std::collections::BTreeMap;
use std::sync::Arc;
use std::{fmt, io};

use bytes::Bytes;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{
    Attribute, Attributes, MultipartUpload, ObjectStore, PutMultipartOpts, PutPayloadMut,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use url::Url;

use super::UploadBackend;
use crate::PayloadStream;
use crate::error::{UploadError, UploadResult};
use crate::filename::FilenameTransform;
use crate::request::FileMetadata;

/// Default size of a single part in a multipart transfer (5 MiB, the S3 minimum).
const DEFAULT_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default number of parts transferred concurrently.
const DEFAULT_QUEUE_SIZE: usize = 4;

/// Default parameters applied to every object written by an [`ObjectStoreBackend`].
///
/// Per-upload values take precedence: a non-empty MIME type of the uploaded file replaces
/// [`content_type`](Self::content_type).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadParams {
    /// `Cache-Control` of stored objects, e.g. `max-age=31536000`.
    pub cache_control: Option<String>,
    /// `Content-Disposition` of stored objects, e.g. `inline`.
    pub content_disposition: Option<String>,
    /// `Content-Encoding` of stored objects.
    pub content_encoding: Option<String>,
    /// `Content-Language` of stored objects.
    pub content_language: Option<String>,
    /// Fallback `Content-Type` for uploads without a MIME type.
    pub content_type: Option<String>,
    /// User-defined metadata attached to every object.
    pub metadata: BTreeMap<String, String>,
}

impl UploadParams {
    /// Merges the defaults with the per-upload metadata into object attributes.
    fn to_attributes(&self, metadata: &FileMetadata) -> Attributes {
        let mut attributes = Attributes::new();

        let defaults = [
            (Attribute::CacheControl, &self.cache_control),
            (Attribute::ContentDisposition, &self.content_disposition),
            (Attribute::ContentEncoding, &self.content_encoding),
            (Attribute::ContentLanguage, &self.content_language),
            (Attribute::ContentType, &self.content_type),
        ];
        for (attribute, value) in defaults {
            if let Some(value) = value {
                attributes.insert(attribute, value.clone().into());
            }
        }

        for (key, value) in &self.metadata {
            attributes.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
        }

        if !metadata.mimetype.is_empty() {
            attributes.insert(Attribute::ContentType, metadata.mimetype.clone().into());
        }

        attributes
    }
}

/// Tuning of the multipart transfer to the object store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Size of a single uploaded part in bytes.
    pub part_size: usize,
    /// Maximum number of parts in flight per upload.
    pub queue_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

/// Connection settings for an S3-compatible object store.
///
/// All values are passed in explicitly. Nothing is read from the environment.
#[derive(Clone, Debug, Default)]
pub struct S3Config<'a> {
    /// The name of the bucket to upload into.
    pub bucket: &'a str,
    /// The bucket region, e.g. `us-east-1`.
    pub region: &'a str,
    /// Optional endpoint URL for S3-compatible services such as MinIO.
    pub endpoint: Option<&'a str>,
    /// Optional static access key ID.
    pub access_key_id: Option<&'a str>,
    /// Optional static secret access key.
    pub secret_access_key: Option<&'a str>,
}

impl S3Config<'_> {
    /// Returns the base URL under which objects in the bucket are publicly addressed.
    pub fn public_url(&self) -> String {
        match self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

/// Uploads files to an object store under a common key prefix.
///
/// Objects are written with a multipart transfer so that large uploads are never buffered in full.
/// If the transfer fails, the multipart upload is aborted and no object becomes visible.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: Path,
    public_url: Url,
    params: UploadParams,
    transfer: TransferOptions,
    filename: FilenameTransform,
}

impl ObjectStoreBackend {
    /// Creates a backend writing to the given store under `prefix`.
    ///
    /// Empty segments of the prefix are dropped, so `"users/avatars/"` and `"users/avatars"` are
    /// equivalent, and an empty prefix places objects at the root of the store. `public_url` is
    /// the base of the locations returned from uploads.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, public_url: Url) -> Self {
        Self {
            store,
            prefix: Path::from(prefix),
            public_url,
            params: UploadParams::default(),
            transfer: TransferOptions::default(),
            filename: FilenameTransform::default(),
        }
    }

    /// Creates a backend for an S3-compatible bucket.
    pub fn s3(config: &S3Config<'_>, prefix: &str) -> UploadResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.bucket)
            .with_region(config.region);

        if let Some(endpoint) = config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(access_key_id) = config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let store = builder
            .build()
            .map_err(UploadError::object_store("building S3 client"))?;
        let public_url = parse_base_url(&config.public_url())?;

        Ok(Self::new(Arc::new(store), prefix, public_url))
    }

    /// Sets the base URL of returned locations, e.g. a CDN in front of the bucket.
    pub fn with_public_url(mut self, public_url: &str) -> UploadResult<Self> {
        self.public_url = parse_base_url(public_url)?;
        Ok(self)
    }

    /// Sets the default parameters for all uploaded objects.
    pub fn with_params(mut self, params: UploadParams) -> Self {
        self.params = params;
        self
    }

    /// Sets the multipart transfer options.
    pub fn with_transfer(mut self, transfer: TransferOptions) -> Self {
        self.transfer = transfer;
        self
    }

    /// Sets the filename transform.
    pub fn with_transform(mut self, filename: FilenameTransform) -> Self {
        self.filename = filename;
        self
    }

    /// Returns the object key for the given transformed name.
    fn key(&self, name: &str) -> Path {
        self.prefix.child(name)
    }

    /// Returns the public URL of the object at `key`, percent-encoding every key segment.
    fn location(&self, key: &Path) -> String {
        let mut location = self.public_url.clone();
        if let Ok(mut segments) = location.path_segments_mut() {
            segments.pop_if_empty().extend(key.parts());
        }
        location.into()
    }
}

/// Parses a base URL for object locations.
fn parse_base_url(url: &str) -> UploadResult<Url> {
    let parsed = Url::parse(url).map_err(|cause| UploadError::InvalidUrl {
        url: url.to_owned(),
        cause,
    })?;

    if parsed.cannot_be_a_base() {
        return Err(UploadError::InvalidUrl {
            url: url.to_owned(),
            cause: url::ParseError::RelativeUrlWithCannotBeABaseBase,
        });
    }

    Ok(parsed)
}

impl fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store)
            .field("prefix", &self.prefix.as_ref())
            .field("public_url", &self.public_url.as_str())
            .field("transfer", &self.transfer)
            .finish_non_exhaustive()
    }
}

/// Splits a payload stream into parts and uploads them with bounded concurrency.
///
/// Parts are exactly `part_size` bytes, except for the last one. The writer never completes or
/// aborts the upload itself, so the caller keeps control over the upload on every error path.
struct PartWriter<'a> {
    upload: &'a mut dyn MultipartUpload,
    buffer: PutPayloadMut,
    part_size: usize,
    queue_size: usize,
    in_flight: JoinSet<object_store::Result<()>>,
}

impl<'a> PartWriter<'a> {
    fn new(upload: &'a mut dyn MultipartUpload, transfer: TransferOptions) -> Self {
        Self {
            upload,
            buffer: PutPayloadMut::new(),
            part_size: transfer.part_size.max(1),
            queue_size: transfer.queue_size.max(1),
            in_flight: JoinSet::new(),
        }
    }

    /// Buffers a chunk, sending every completed part.
    async fn write(&mut self, mut chunk: Bytes) -> UploadResult<()> {
        while !chunk.is_empty() {
            let remaining = self.part_size - self.buffer.content_length();
            let head = chunk.split_to(remaining.min(chunk.len()));
            self.buffer.push(head);

            if self.buffer.content_length() == self.part_size {
                self.send_part().await?;
            }
        }

        Ok(())
    }

    /// Sends the buffered remainder and waits until every part has been stored.
    async fn flush(&mut self) -> UploadResult<()> {
        if self.buffer.content_length() > 0 {
            self.send_part().await?;
        }
        self.wait_for_capacity(0).await
    }

    async fn send_part(&mut self) -> UploadResult<()> {
        self.wait_for_capacity(self.queue_size - 1).await?;
        let part = std::mem::replace(&mut self.buffer, PutPayloadMut::new()).freeze();
        self.in_flight.spawn(self.upload.put_part(part));
        Ok(())
    }

    /// Waits until at most `max` parts are in flight.
    async fn wait_for_capacity(&mut self, max: usize) -> UploadResult<()> {
        while self.in_flight.len() > max {
            let Some(joined) = self.in_flight.join_next().await else {
                break;
            };
            joined
                .map_err(io::Error::other)?
                .map_err(UploadError::object_store("uploading part"))?;
        }
        Ok(())
    }
}

/// Copies the stream into the multipart upload and completes it.
async fn write_parts(
    upload: &mut dyn MultipartUpload,
    transfer: TransferOptions,
    mut stream: PayloadStream,
) -> UploadResult<()> {
    let mut writer = PartWriter::new(&mut *upload, transfer);
    while let Some(chunk) = stream.next().await {
        writer.write(chunk?).await?;
    }
    writer.flush().await?;
    drop(writer);

    upload
        .complete()
        .await
        .map_err(UploadError::object_store("completing multipart upload"))?;

    Ok(())
}

/// Runs the transfer and aborts the multipart upload if any step of it fails.
async fn transfer_or_abort(
    mut upload: Box<dyn MultipartUpload>,
    transfer: TransferOptions,
    stream: PayloadStream,
) -> UploadResult<()> {
    let Err(err) = write_parts(upload.as_mut(), transfer, stream).await else {
        return Ok(());
    };

    if let Err(abort_err) = upload.abort().await {
        tracing::warn!(
            error = &abort_err as &dyn std::error::Error,
            "Failed to abort multipart upload"
        );
    }
    Err(err)
}

#[async_trait::async_trait]
impl UploadBackend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        "object-store"
    }

    #[tracing::instrument(level = "trace", fields(filename = %metadata.filename), skip_all)]
    async fn upload(&self, metadata: &FileMetadata, stream: PayloadStream) -> UploadResult<String> {
        let name = self.filename.apply(&metadata.filename);
        if name.is_empty() {
            return Err(UploadError::InvalidName(name));
        }
        let key = self.key(&name);
        tracing::debug!(%key, "Writing to object store");

        let opts = PutMultipartOpts {
            attributes: self.params.to_attributes(metadata),
            ..Default::default()
        };
        let upload = self
            .store
            .put_multipart_opts(&key, opts)
            .await
            .map_err(UploadError::object_store("starting multipart upload"))?;

        transfer_or_abort(upload, self.transfer, stream).await?;

        Ok(self.location(&key))
    }
}
