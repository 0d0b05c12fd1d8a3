//! Exposes an in-process test server for use in integration tests.
//!
//! ```
//! use uploader_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/graphql");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::path::Path;

use tempfile::TempDir;
use uploader_server::config::{Config, Storage};
use uploader_server::state::State;
use uploader_server::web::App;

/// An in-process test server for use in integration tests.
///
/// Uploads are stored in a temporary directory, which is deleted when the server is dropped. The
/// server listens on a random available port on localhost.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    tempdir: TempDir,
}

impl TestServer {
    /// Starts a server storing uploads in a fresh temporary directory.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Starts a server with the given configuration.
    ///
    /// The storage is always replaced by filesystem storage in the temporary directory.
    pub async fn with_config(config: Config) -> Self {
        let tempdir = tempfile::tempdir().unwrap();
        let config = Config {
            storage: Storage::FileSystem {
                path: tempdir.path().into(),
            },
            ..config
        };

        Self::start(config, tempdir)
    }

    /// Starts a server with the given configuration, including its storage.
    pub async fn with_storage(config: Config) -> Self {
        Self::start(config, tempfile::tempdir().unwrap())
    }

    fn start(config: Config, tempdir: TempDir) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = State::new(config).unwrap();
        let app = App::new(state);

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            app.serve(listener).await.unwrap();
        });

        Self {
            handle,
            socket,
            tempdir,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the temporary directory owned by this server.
    pub fn tempdir(&self) -> &Path {
        self.tempdir.path()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
