use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use uploader_service::UploadService;

use crate::config::Config;
use crate::graphql::{self, UploadSchema};

/// Shared reference to the upload [service state](State).
pub type ServiceState = Arc<State>;

/// Reference to the upload business logic.
///
/// This structure is created during server startup and shared with all HTTP request handlers.
///
/// In request handlers, use `axum::extract::State<ServiceState>` to retrieve a shared reference to
/// this structure.
pub struct State {
    /// The server configuration.
    pub config: Config,
    /// The upload service wrapping the configured backend.
    pub service: UploadService,
    /// The GraphQL schema, holding a handle to [`service`](Self::service).
    pub schema: UploadSchema,
}

impl State {
    /// Builds the storage backend from the configuration and sets up the GraphQL schema.
    pub fn new(config: Config) -> anyhow::Result<ServiceState> {
        let storage = config.storage.to_storage_config(config.filename);
        let service =
            UploadService::from_config(storage).context("failed to initialize storage backend")?;
        tracing::info!(backend = service.backend_name(), "Initialized storage backend");

        let schema = graphql::schema(service.clone());
        Ok(Arc::new(Self {
            config,
            service,
            schema,
        }))
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("config", &self.config)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
