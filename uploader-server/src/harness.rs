//! Manual test harness for a running server.
//!
//! Sends a file to the `singleUpload` mutation as a [GraphQL multipart request] and returns the
//! parsed response.
//!
//! [GraphQL multipart request]: https://github.com/jaydenseric/graphql-multipart-request-spec

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;

/// The mutation sent by [`upload`].
const SINGLE_UPLOAD: &str =
    "mutation ($file: Upload!) { singleUpload(file: $file) { filename mimetype encoding uri } }";

/// Uploads the file at `path` to the GraphQL endpoint at `url`.
///
/// Fails if the server responds with an unsuccessful status or the response contains GraphQL
/// errors. On success, returns the `singleUpload` result object.
pub async fn upload(url: &str, path: &Path, mimetype: Option<&str>) -> Result<Value> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("path has no valid file name")?
        .to_owned();

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let length = file.metadata().await?.len();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    let mut part = Part::stream_with_length(body, length).file_name(filename);
    if let Some(mimetype) = mimetype {
        part = part.mime_str(mimetype)?;
    }

    let operations = json!({ "query": SINGLE_UPLOAD, "variables": { "file": null } });
    let map = json!({ "0": ["variables.file"] });
    let form = Form::new()
        .text("operations", operations.to_string())
        .text("map", map.to_string())
        .part("0", part);

    tracing::debug!("sending upload request to {}", url);
    let response = reqwest::Client::new()
        .post(url)
        .multipart(form)
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("Bad Status: {}", response.status());
    }

    let mut body: Value = response.json().await?;
    if let Some(errors) = body.get("errors") {
        anyhow::bail!("upload failed: {errors}");
    }

    Ok(body["data"]["singleUpload"].take())
}
