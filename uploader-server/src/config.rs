//! Configuration for the upload server.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `UPLOADER__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Configuration is read once at startup. The storage backend is built from it and handed to the
//! service layer, which never looks at the environment itself.
//!
//! # Environment Variables
//!
//! Environment variables use `UPLOADER__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `UPLOADER__HTTP_ADDR=0.0.0.0:4000` sets the HTTP server address
//! - `UPLOADER__STORAGE__TYPE=filesystem` sets the storage type
//! - `UPLOADER__STORAGE__PATH=/data` sets the upload directory
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! http_addr: 0.0.0.0:4000
//!
//! storage:
//!   type: filesystem
//!   path: /data
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use uploader_service::backend::{S3Config, TransferOptions, UploadParams};
use uploader_service::{FilenameStrategy, StorageConfig};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "UPLOADER__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::storage`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// Local filesystem storage backend (type `"filesystem"`).
    ///
    /// Stores uploads as files in a local directory. Suitable for development and single-server
    /// deployments.
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: filesystem
    ///   path: /data
    /// ```
    FileSystem {
        /// Directory path for storing uploads.
        ///
        /// The directory must exist. It is not created by the server, and uploads fail while it is
        /// missing. Relative paths are resolved from the server's working directory.
        ///
        /// # Default
        ///
        /// `"uploads"` (relative to the server's working directory)
        ///
        /// # Environment Variables
        ///
        /// - `UPLOADER__STORAGE__TYPE=filesystem`
        /// - `UPLOADER__STORAGE__PATH=/path/to/uploads`
        path: PathBuf,
    },

    /// S3-compatible storage backend (type `"s3compatible"`).
    ///
    /// Supports [Amazon S3] and other S3-compatible services such as MinIO.
    ///
    /// [Amazon S3]: https://aws.amazon.com/s3/
    ///
    /// # Example
    ///
    /// ```yaml
    /// storage:
    ///   type: s3compatible
    ///   bucket: my-bucket
    ///   region: eu-central-1
    ///   prefix: users/avatars
    ///   params:
    ///     cache_control: max-age=31536000
    ///   transfer:
    ///     part_size: 10485760
    ///     queue_size: 1
    /// ```
    S3Compatible {
        /// S3 bucket name. The bucket must exist.
        ///
        /// `UPLOADER__STORAGE__BUCKET`
        bucket: String,

        /// Bucket region.
        ///
        /// Defaults to `us-east-1`.
        ///
        /// `UPLOADER__STORAGE__REGION`
        #[serde(default = "default_region")]
        region: String,

        /// Optional endpoint URL for S3-compatible services, e.g. `http://localhost:9000`.
        ///
        /// `UPLOADER__STORAGE__ENDPOINT`
        endpoint: Option<String>,

        /// Key prefix for all uploaded objects, e.g. `users/avatars`.
        ///
        /// `UPLOADER__STORAGE__PREFIX`
        #[serde(default)]
        prefix: String,

        /// Base URL of the locations returned to clients.
        ///
        /// Defaults to the bucket URL derived from the endpoint or region.
        ///
        /// `UPLOADER__STORAGE__PUBLIC_URL`
        public_url: Option<String>,

        /// Static access key ID. Falls back to instance credentials when unset.
        ///
        /// `UPLOADER__STORAGE__ACCESS_KEY_ID`
        access_key_id: Option<SecretBox<ConfigSecret>>,

        /// Static secret access key.
        ///
        /// `UPLOADER__STORAGE__SECRET_ACCESS_KEY`
        secret_access_key: Option<SecretBox<ConfigSecret>>,

        /// Default parameters applied to every object, e.g. `Cache-Control`.
        ///
        /// `UPLOADER__STORAGE__PARAMS__CACHE_CONTROL=max-age=31536000`
        #[serde(default)]
        params: UploadParams,

        /// Multipart transfer tuning.
        ///
        /// `UPLOADER__STORAGE__TRANSFER__PART_SIZE`, `UPLOADER__STORAGE__TRANSFER__QUEUE_SIZE`
        #[serde(default)]
        transfer: TransferOptions,
    },
}

impl Storage {
    /// Maps this configuration to the service's [`StorageConfig`].
    pub fn to_storage_config(&self, filename: FilenameStrategy) -> StorageConfig<'_> {
        match self {
            Storage::FileSystem { path } => StorageConfig::FileSystem {
                path,
                filename: filename.into(),
            },
            Storage::S3Compatible {
                bucket,
                region,
                endpoint,
                prefix,
                public_url,
                access_key_id,
                secret_access_key,
                params,
                transfer,
            } => StorageConfig::S3Compatible {
                s3: S3Config {
                    bucket,
                    region,
                    endpoint: endpoint.as_deref(),
                    access_key_id: access_key_id.as_ref().map(|s| s.expose_secret().as_str()),
                    secret_access_key: secret_access_key
                        .as_ref()
                        .map(|s| s.expose_secret().as_str()),
                },
                prefix,
                public_url: public_url.as_deref(),
                params: params.clone(),
                transfer: *transfer,
                filename: filename.into(),
            },
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment, e.g. `production`.
    ///
    /// `UPLOADER__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Server name or identifier.
    ///
    /// `UPLOADER__SENTRY__SERVER_NAME`
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Performance trace sampling rate.
    ///
    /// # Default
    ///
    /// `0.01` (send 1% of traces)
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__SENTRY__TRACES_SAMPLE_RATE`
    pub traces_sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    ///
    /// `UPLOADER__SENTRY__DEBUG`
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    ///
    /// Sentry is considered enabled if a DSN is configured.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
        }
    }
}

/// Metrics reporting configuration.
///
/// Metrics are only sent when a Datadog API key is configured.
///
/// Used in: [`Config::metrics`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog API key used to submit metrics.
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__METRICS__DATADOG_KEY`
    pub datadog_key: Option<SecretBox<ConfigSecret>>,

    /// Tags attached to every emitted metric, e.g. `region: us-east-1`.
    pub tags: BTreeMap<String, String>,
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  uploader_server::web > HTTP server listening on 0.0.0.0:4000
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z [uploader_server::web] INFO: HTTP server listening on 0.0.0.0:4000
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for the upload server.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// HTTP server bind address.
    ///
    /// # Default
    ///
    /// `0.0.0.0:4000`
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__HTTP_ADDR`
    pub http_addr: SocketAddr,

    /// Destination of uploaded files. See [`Storage`] for available backends.
    ///
    /// # Default
    ///
    /// Filesystem storage in the `./uploads` directory
    pub storage: Storage,

    /// How uploaded files are named at the destination.
    ///
    /// One of `uuid` (random name, original extension), `timestamp` (milliseconds prefixed to
    /// the original name), or `original`.
    ///
    /// # Default
    ///
    /// `uuid`
    ///
    /// # Environment Variable
    ///
    /// `UPLOADER__FILENAME`
    pub filename: FilenameStrategy,

    /// Configuration of the internal task runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry error tracking configuration.
    pub sentry: Sentry,

    /// Metrics reporting configuration.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:4000".parse().unwrap(),
            storage: Storage::FileSystem {
                path: PathBuf::from("uploads"),
            },
            filename: FilenameStrategy::default(),
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `UPLOADER__`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - Required fields are missing or invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            let Storage::FileSystem { path } = &config.storage else {
                panic!("expected filesystem storage");
            };
            assert_eq!(path, Path::new("uploads"));
            assert_eq!(config.filename, FilenameStrategy::Uuid);
            assert_eq!(config.http_addr.port(), 4000);
            assert!(!config.sentry.is_enabled());
            assert!(config.metrics.datadog_key.is_none());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("UPLOADER__STORAGE__TYPE", "s3compatible");
            jail.set_env("UPLOADER__STORAGE__ENDPOINT", "http://localhost:9000");
            jail.set_env("UPLOADER__STORAGE__BUCKET", "whatever");
            jail.set_env("UPLOADER__STORAGE__PREFIX", "users/avatars");
            jail.set_env("UPLOADER__STORAGE__ACCESS_KEY_ID", "minio");
            jail.set_env("UPLOADER__STORAGE__SECRET_ACCESS_KEY", "minio-secret");
            jail.set_env("UPLOADER__STORAGE__PARAMS__CACHE_CONTROL", "no-cache");
            jail.set_env("UPLOADER__FILENAME", "timestamp");
            jail.set_env("UPLOADER__LOGGING__LEVEL", "debug");
            jail.set_env("UPLOADER__SENTRY__DSN", "abcde");
            jail.set_env("UPLOADER__SENTRY__SAMPLE_RATE", "0.5");
            jail.set_env("UPLOADER__METRICS__DATADOG_KEY", "dd-key");
            jail.set_env("UPLOADER__METRICS__TAGS__REGION", "eu");

            let config = Config::load(None).unwrap();

            let Storage::S3Compatible {
                bucket,
                region,
                endpoint,
                prefix,
                secret_access_key,
                params,
                transfer,
                ..
            } = &dbg!(&config).storage
            else {
                panic!("expected s3 storage");
            };
            assert_eq!(bucket, "whatever");
            assert_eq!(region, "us-east-1");
            assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
            assert_eq!(prefix, "users/avatars");
            assert_eq!(
                secret_access_key.as_ref().unwrap().expose_secret().as_str(),
                "minio-secret"
            );
            assert_eq!(params.cache_control.as_deref(), Some("no-cache"));
            assert_eq!(*transfer, TransferOptions::default());

            assert_eq!(config.filename, FilenameStrategy::Timestamp);
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.sentry.dsn.unwrap().expose_secret().as_str(), "abcde");
            assert_eq!(config.sentry.sample_rate, 0.5);
            assert_eq!(
                config.metrics.datadog_key.unwrap().expose_secret().as_str(),
                "dd-key"
            );
            assert_eq!(config.metrics.tags.get("region").map(String::as_str), Some("eu"));

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            http_addr: 127.0.0.1:4001
            filename: original
            storage:
                type: s3compatible
                bucket: whatever
                region: eu-central-1
                public_url: https://cdn.example.com
                transfer:
                    part_size: 10485760
                    queue_size: 1
            logging:
                format: json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            let Storage::S3Compatible {
                bucket,
                region,
                public_url,
                transfer,
                access_key_id,
                ..
            } = &dbg!(&config).storage
            else {
                panic!("expected s3 storage");
            };
            assert_eq!(bucket, "whatever");
            assert_eq!(region, "eu-central-1");
            assert_eq!(public_url.as_deref(), Some("https://cdn.example.com"));
            assert_eq!(transfer.part_size, 10 * 1024 * 1024);
            assert_eq!(transfer.queue_size, 1);
            assert!(access_key_id.is_none());

            assert_eq!(config.http_addr.port(), 4001);
            assert_eq!(config.filename, FilenameStrategy::Original);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            storage:
                type: filesystem
                path: /srv/uploads
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("UPLOADER__STORAGE__PATH", "/tmp/uploads");

            let config = Config::load(Some(tempfile.path())).unwrap();

            let Storage::FileSystem { path } = &dbg!(&config).storage else {
                panic!("expected filesystem storage");
            };
            // Env should overwrite the yaml config
            assert_eq!(path, Path::new("/tmp/uploads"));

            Ok(())
        });
    }

    #[test]
    fn secrets_are_redacted() {
        let secret = SecretBox::new(Box::new(ConfigSecret::from("hunter2")));
        let debug = format!("{secret:?}");
        assert!(!debug.contains("hunter2"));
    }
}
