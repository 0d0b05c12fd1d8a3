//! Error types for the GraphQL API layer.

use async_graphql::ErrorExtensions;
use thiserror::Error;
use uploader_service::UploadError;

/// Error type for API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Errors from the service layer (storage backends, streaming, etc.).
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The request did not carry a readable file.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// A stable, machine-readable error code exposed in GraphQL error extensions.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Upload(UploadError::InvalidName(_)) => "INVALID_FILENAME",
            ApiError::Upload(_) => "UPLOAD_FAILED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        match self {
            ApiError::Upload(err) => {
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    "service error handling upload"
                );
            }
            ApiError::BadRequest(msg) => tracing::debug!("bad request: {}", msg),
        }

        let code = self.code();
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_error_code() {
        let err = ApiError::from(UploadError::InvalidName("..".into())).extend();
        let extensions = err.extensions.unwrap();
        assert_eq!(
            extensions.get("code"),
            Some(&async_graphql::Value::from("INVALID_FILENAME"))
        );

        let err = ApiError::BadRequest("no file".into());
        assert_eq!(err.code(), "BAD_REQUEST");
        assert_eq!(err.to_string(), "bad request: no file");
    }
}
