mod google;
pub mod auth;

pub use google::{DRY_RUN_TOKEN, Endpoints, GooglePhotosClient};

use anyhow::Result;
use std::fmt;
use std::path::Path;

/// Opaque handle returned by the staging call and consumed by the commit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for remote media libraries that take uploads in two phases.
///
/// `stage` sends the raw bytes and hands back a token; `commit` turns the
/// token into a permanent library entry. The library ships with
/// [`GooglePhotosClient`].
///
/// # Example
///
/// ```rust,no_run
/// use photo_uploader::library::{GooglePhotosClient, MediaLibrary};
/// use photo_uploader::logger::{Logger, targets};
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let library = GooglePhotosClient::dry_run(Logger::global(targets::LIBRARY));
/// if let Some(token) = library.stage(Path::new("photo.jpg")).await? {
///     let response = library.commit(&token, "File date: 2023-05-01 10:00:00").await?;
///     println!("{response}");
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Display name of the service (e.g. "Google Photos").
    fn name(&self) -> &str;
    /// Upload the file's bytes.
    ///
    /// `Ok(None)` means the service refused the upload; `Err` means the call
    /// could not be made at all (credentials, unreadable file, transport).
    async fn stage(&self, path: &Path) -> Result<Option<UploadToken>>;
    /// Create a library entry from a staged token. The service's response body
    /// is returned as-is; non-success statuses are errors.
    async fn commit(&self, token: &UploadToken, description: &str) -> Result<serde_json::Value>;
}
