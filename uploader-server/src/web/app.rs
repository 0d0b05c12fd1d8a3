use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::ServiceExt;
use axum::extract::Request;
use sentry::integrations::tower::NewSentryLayer;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::metrics::InFlightRequestsLayer;
use tower_http::metrics::in_flight_requests::InFlightRequestsCounter;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::endpoints;
use crate::state::ServiceState;
use crate::web::middleware as m;

/// How often the number of in-flight requests is reported.
const IN_FLIGHT_INTERVAL: Duration = Duration::from_secs(1);

/// The upload web server application.
#[derive(Debug)]
pub struct App {
    router: axum::Router,
    in_flight_requests: InFlightRequestsCounter,
    graceful_shutdown: bool,
}

impl App {
    /// Creates the router for the given state, with GraphQL and health endpoints behind the
    /// request middleware.
    ///
    /// Use [`serve`](Self::serve) to run the server future.
    pub fn new(state: ServiceState) -> Self {
        let (in_flight_layer, in_flight_requests) = InFlightRequestsLayer::pair();

        // Layers run top to bottom for requests and bottom to top for responses, after routing.
        let middleware = ServiceBuilder::new()
            .layer(axum::middleware::from_fn(m::emit_request_metrics))
            .layer(in_flight_layer)
            .layer(CatchPanicLayer::custom(m::handle_panic))
            .layer(m::set_server_header())
            .layer(NewSentryLayer::new_from_top())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(m::make_http_span)
                    .on_failure(DefaultOnFailure::new().level(Level::DEBUG)),
            );

        Self {
            router: endpoints::routes().layer(middleware).with_state(state),
            in_flight_requests,
            graceful_shutdown: false,
        }
    }

    /// Stops accepting uploads on the shutdown signal and waits for running ones to finish.
    ///
    /// Disabled by default.
    pub fn graceful_shutdown(mut self, enable: bool) -> Self {
        self.graceful_shutdown = enable;
        self
    }

    /// Serves requests on `listener` until the server shuts down.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let Self {
            router,
            in_flight_requests,
            graceful_shutdown,
        } = self;

        let service =
            ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(router);
        let shutdown = graceful_shutdown.then(elegant_departure::get_shutdown_guard);

        let server = async move {
            match shutdown {
                Some(guard) => {
                    axum::serve(listener, service)
                        .with_graceful_shutdown(async move { guard.wait().await })
                        .await
                }
                None => axum::serve(listener, service).await,
            }
        };

        let emitter = in_flight_requests.run_emitter(IN_FLIGHT_INTERVAL, |count| async move {
            merni::gauge!("server.requests.in_flight": count);
        });

        let (served, ()) = tokio::join!(server, emitter);
        served?;

        Ok(())
    }
}
