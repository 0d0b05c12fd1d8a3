use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{harness, healthcheck, observability, web};

/// GraphQL file upload server.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Healthcheck(HealthcheckCommand),
    Upload(UploadCommand),
    Version(VersionCommand),
}

/// run the upload web server
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// perform a healthcheck against the running upload web server
///
/// This command checks if the server is available on the configured host and port. This is used
/// for Docker healthchecks.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "healthcheck")]
struct HealthcheckCommand {}

/// upload a local file to a running server through the singleUpload mutation
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "upload")]
struct UploadCommand {
    /// URL of the GraphQL endpoint, e.g. http://localhost:4000/graphql
    #[argh(positional)]
    url: String,

    /// path of the file to upload
    #[argh(positional)]
    file: PathBuf,

    /// MIME type to declare for the file
    #[argh(option)]
    mimetype: Option<String>,
}

/// print the server version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let metrics_guard = observability::init_metrics(&config)?;

    let result = runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => web::server(config).await,
            Command::Healthcheck(HealthcheckCommand {}) => healthcheck::healthcheck(config).await,
            Command::Upload(UploadCommand {
                url,
                file,
                mimetype,
            }) => {
                let uploaded = harness::upload(&url, &file, mimetype.as_deref()).await?;
                println!("{}", serde_json::to_string_pretty(&uploaded)?);
                Ok(())
            }
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    });

    // Submit buffered metrics even if the command failed.
    runtime.block_on(async {
        if let Some(metrics_guard) = metrics_guard {
            metrics_guard.flush(None).await.ok();
        }
    });

    result
}
