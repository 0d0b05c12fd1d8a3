//! Contains all HTTP endpoint handlers.
//!
//! Use [`routes`] to create a router with all endpoints.

use axum::Router;

use crate::state::ServiceState;

mod graphql;
pub mod health;

pub use graphql::GRAPHQL_PATH;

/// Creates the router with the GraphQL endpoint and health probes.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .merge(health::router())
        .merge(graphql::router())
}
