//! Probe used by container healthchecks.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::{Config, Storage};
use crate::endpoints::GRAPHQL_PATH;

/// Checks that the server at the configured address is up and serves the configured storage.
///
/// This passes if:
/// - `/health` responds successfully,
/// - the GraphQL `backend` query names the backend built from `config.storage`,
/// - for filesystem storage, the upload directory exists on this host.
pub async fn healthcheck(config: Config) -> Result<()> {
    let base = format!("http://{}", config.http_addr);
    let client = reqwest::Client::new();

    tracing::debug!("checking liveness of {base}");
    let response = client.get(format!("{base}/health")).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("Bad Status: {}", response.status());
    }

    let backend = query_backend(&client, &format!("{base}{GRAPHQL_PATH}")).await?;
    let expected = expected_backend(&config.storage);
    if backend != expected {
        anyhow::bail!("server stores uploads in {backend:?}, configured is {expected:?}");
    }

    if let Storage::FileSystem { path } = &config.storage {
        check_directory(path).await?;
    }

    tracing::info!(%backend, "OK");
    Ok(())
}

/// Asks the server which backend receives its uploads.
async fn query_backend(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .post(url)
        .json(&json!({ "query": "{ backend }" }))
        .send()
        .await?;
    if !response.status().is_success() {
        anyhow::bail!("Bad Status: {}", response.status());
    }

    let body: Value = response.json().await?;
    body["data"]["backend"]
        .as_str()
        .map(str::to_owned)
        .with_context(|| format!("unexpected response: {body}"))
}

fn expected_backend(storage: &Storage) -> &'static str {
    match storage {
        Storage::FileSystem { .. } => "local-fs",
        Storage::S3Compatible { .. } => "object-store",
    }
}

async fn check_directory(path: &Path) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("upload directory {} is not accessible", path.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("upload path {} is not a directory", path.display());
    }
    Ok(())
}
