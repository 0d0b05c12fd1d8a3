//! Strategies for naming uploaded files at their destination.
//!
//! Every backend owns a [`FilenameTransform`] that maps the client-supplied filename to the name
//! used at the destination. The default, [`FilenameTransform::uuid`], generates a random name and
//! keeps the original extension, so concurrent uploads of equally named files never collide.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

type TransformFn = dyn Fn(&str) -> String + Send + Sync;

/// A function mapping an original filename to the name used at the destination.
///
/// Transforms must not depend on mutable state and must accept any input, including the empty
/// string. They may return different results for the same input, for example when randomized.
#[derive(Clone)]
pub struct FilenameTransform(Arc<TransformFn>);

impl FilenameTransform {
    /// Creates a transform from an arbitrary function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Replaces the name with a random UUIDv4, keeping the original extension.
    ///
    /// `"sexy-me.jpg"` becomes e.g. `"67e55044-10b1-426f-9247-bb680e5fe0c8.jpg"`.
    pub fn uuid() -> Self {
        Self::new(|filename| format!("{}{}", Uuid::new_v4(), extension(filename)))
    }

    /// Prefixes the original name with the current UNIX timestamp in milliseconds.
    ///
    /// Two uploads of the same name within the same millisecond map to the same destination.
    pub fn timestamp() -> Self {
        Self::new(|filename| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            format!("{millis}_{filename}")
        })
    }

    /// Keeps the original name. Uploads of the same name overwrite each other.
    pub fn identity() -> Self {
        Self::new(|filename| filename.to_owned())
    }

    /// Applies the transform to the given filename.
    pub fn apply(&self, filename: &str) -> String {
        (self.0)(filename)
    }
}

impl Default for FilenameTransform {
    fn default() -> Self {
        Self::uuid()
    }
}

impl fmt::Debug for FilenameTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilenameTransform(..)")
    }
}

impl From<FilenameStrategy> for FilenameTransform {
    fn from(strategy: FilenameStrategy) -> Self {
        match strategy {
            FilenameStrategy::Uuid => Self::uuid(),
            FilenameStrategy::Timestamp => Self::timestamp(),
            FilenameStrategy::Original => Self::identity(),
        }
    }
}

/// Selects one of the built-in [`FilenameTransform`]s, e.g. from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilenameStrategy {
    /// See [`FilenameTransform::uuid`].
    #[default]
    Uuid,
    /// See [`FilenameTransform::timestamp`].
    Timestamp,
    /// See [`FilenameTransform::identity`].
    Original,
}

/// Returns the extension of the last path component, including the leading dot.
///
/// Returns an empty string if there is no extension. A leading dot does not start an extension,
/// so `".bashrc"` has none.
pub fn extension(filename: &str) -> &str {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    match basename.rfind('.') {
        Some(0) | None => "",
        Some(index) => &basename[index..],
    }
}
