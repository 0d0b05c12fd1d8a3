use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;

use crate::config::{Config, Storage};
use crate::state::State;
use crate::web::app::App;

/// Backlog of pending connections on the listen socket.
const TCP_LISTEN_BACKLOG: u32 = 1024;

/// Runs the upload server until a termination signal arrives.
///
/// The storage backend is built before the listener is bound, so a broken storage configuration
/// never accepts uploads. On shutdown, running uploads are allowed to finish.
pub async fn server(config: Config) -> Result<()> {
    merni::counter!("server.start": 1);

    let state = State::new(config)?;
    let addr = state.config.http_addr;
    let listener = listen(addr).context("failed to start TCP listener")?;

    match &state.config.storage {
        Storage::FileSystem { path } => tracing::info!(
            backend = state.service.backend_name(),
            path = %path.display(),
            "Accepting uploads on http://{addr}"
        ),
        Storage::S3Compatible { bucket, prefix, .. } => tracing::info!(
            backend = state.service.backend_name(),
            %bucket,
            %prefix,
            "Accepting uploads on http://{addr}"
        ),
    }

    let server_handle = tokio::spawn(App::new(state).graceful_shutdown(true).serve(listener));

    tokio::spawn(async {
        elegant_departure::get_shutdown_guard().wait().await;
        tracing::info!("Shutdown requested, waiting for running uploads");
    });

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;

    let served = match server_handle.await {
        Ok(result) => result,
        Err(join_err) => Err(join_err.into()),
    };
    tracing::info!("Shutdown complete");
    served
}

/// Binds the listen socket with `SO_REUSEPORT`, so a new process can take over the port.
fn listen(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    Ok(socket.listen(TCP_LISTEN_BACKLOG)?)
}
