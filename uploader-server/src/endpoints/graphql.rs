use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::{Router, routing};

use crate::state::ServiceState;

/// The path of the GraphQL endpoint.
pub const GRAPHQL_PATH: &str = "/graphql";

/// Creates the router serving GraphQL requests and the GraphiQL IDE.
pub fn router() -> Router<ServiceState> {
    Router::new().route(GRAPHQL_PATH, routing::get(graphiql).post(execute))
}

/// Executes a GraphQL request, including multipart file uploads.
async fn execute(State(state): State<ServiceState>, request: GraphQLRequest) -> GraphQLResponse {
    let request = request.into_inner();
    if let Some(operation) = &request.operation_name {
        tracing::Span::current().record("operation", operation.as_str());
    }
    state.schema.execute(request).await.into()
}

/// Serves the GraphiQL IDE for manual exploration.
async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint(GRAPHQL_PATH).finish())
}
