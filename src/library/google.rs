use anyhow::{Context, Result};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::auth::{self, Credentials};
use super::{MediaLibrary, UploadToken};
use crate::config::{Config, DEFAULT_BATCH_CREATE_URL, DEFAULT_UPLOADS_URL, UploadConfig};
use crate::logger::{Logger, targets};

/// Token handed out by a dry-run client.
pub const DRY_RUN_TOKEN: &str = "dry_run_token";

/// Remote endpoints of the two upload phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub uploads_url: String,
    pub batch_create_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            batch_create_url: DEFAULT_BATCH_CREATE_URL.to_string(),
        }
    }
}

impl From<&UploadConfig> for Endpoints {
    fn from(config: &UploadConfig) -> Self {
        Self {
            uploads_url: config.uploads_url.clone(),
            batch_create_url: config.batch_create_url.clone(),
        }
    }
}

struct Session {
    credentials: Mutex<Credentials>,
    token_path: Option<PathBuf>,
}

/// Google Photos Library API client.
///
/// A dry-run client holds no credentials and never touches the network or
/// the files it is given; whether a client is dry-run is fixed when it is
/// built.
pub struct GooglePhotosClient {
    http: Client,
    session: Option<Session>,
    endpoints: Endpoints,
    log: Logger,
}

impl GooglePhotosClient {
    /// A client that only logs what it would do.
    pub fn dry_run(log: Logger) -> Self {
        Self {
            http: Client::new(),
            session: None,
            endpoints: Endpoints::default(),
            log,
        }
    }

    /// A live client. Refreshed credentials are written back to `token_path`
    /// when one is given.
    pub fn new(
        credentials: Credentials,
        token_path: Option<PathBuf>,
        endpoints: Endpoints,
        timeout: Duration,
        log: Logger,
    ) -> Result<Self> {
        let http = build_http(timeout)?;
        Ok(Self::with_http(http, credentials, token_path, endpoints, log))
    }

    fn with_http(
        http: Client,
        credentials: Credentials,
        token_path: Option<PathBuf>,
        endpoints: Endpoints,
        log: Logger,
    ) -> Self {
        Self {
            http,
            session: Some(Session {
                credentials: Mutex::new(credentials),
                token_path,
            }),
            endpoints,
            log,
        }
    }

    /// Build the client the configuration asks for, running authorization in
    /// live mode.
    pub async fn from_config(config: &Config, log: Logger) -> Result<Self> {
        if config.upload.dry_run {
            log.info(format_args!("Dry run enabled; nothing will be uploaded."));
            return Ok(Self::dry_run(log));
        }

        let http = build_http(Duration::from_secs(config.upload.timeout_secs))?;
        let credentials = auth::authorize(&config.auth, &http, &log.with_target(targets::AUTH))
            .await
            .context("Authentication failed")?;

        Ok(Self::with_http(
            http,
            credentials,
            Some(config.auth.token_path.clone()),
            Endpoints::from(&config.upload),
            log,
        ))
    }

    pub fn is_dry_run(&self) -> bool {
        self.session.is_none()
    }

    /// Current access token, refreshing it first when it is about to expire.
    async fn bearer(&self, session: &Session) -> Result<String> {
        let mut credentials = session.credentials.lock().await;

        if credentials.is_expired() && credentials.refresh_token.is_some() {
            credentials
                .refresh(&self.http)
                .await
                .context("Failed to refresh access token")?;
            self.log.info(format_args!("Refreshed access token."));

            if let Some(path) = &session.token_path {
                if let Err(e) = credentials.save(path) {
                    self.log
                        .warn(format_args!("Could not persist refreshed token: {e:#}"));
                }
            }
        }

        credentials
            .token
            .clone()
            .context("No access token available")
    }
}

fn build_http(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

#[async_trait::async_trait]
impl MediaLibrary for GooglePhotosClient {
    fn name(&self) -> &str {
        "Google Photos"
    }

    async fn stage(&self, path: &Path) -> Result<Option<UploadToken>> {
        let Some(session) = &self.session else {
            self.log
                .info(format_args!("[Dry Run] Would upload: {}", path.display()));
            return Ok(Some(UploadToken::new(DRY_RUN_TOKEN)));
        };

        let token = self.bearer(session).await?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let resp = self
            .http
            .post(&self.endpoints.uploads_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("X-Goog-Upload-File-Name", file_name)
            .header("X-Goog-Upload-Protocol", "raw")
            .body(bytes)
            .send()
            .await
            .context("Upload request failed")?;

        let status = resp.status();
        let text = resp.text().await.context("Failed to read upload response")?;

        if !status.is_success() {
            self.log.error(format_args!(
                "Failed to upload {}: {}",
                path.display(),
                text
            ));
            return Ok(None);
        }

        self.log.info(format_args!(
            "Uploaded {} - received uploadToken.",
            path.display()
        ));
        Ok(Some(UploadToken::new(text)))
    }

    async fn commit(&self, token: &UploadToken, description: &str) -> Result<serde_json::Value> {
        let Some(session) = &self.session else {
            self.log.info(format_args!(
                "[Dry Run] Would create media item with token: {token} and description: {description}"
            ));
            return Ok(json!({ "status": "dry_run" }));
        };

        let bearer = self.bearer(session).await?;
        let body = json!({
            "newMediaItems": [
                {
                    "description": description,
                    "simpleMediaItem": {
                        "uploadToken": token.as_str()
                    }
                }
            ]
        });

        let resp = self
            .http
            .post(&self.endpoints.batch_create_url)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .context("Media item request failed")?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("Failed to read media item response")?;

        if !status.is_success() {
            anyhow::bail!("Media item creation failed ({}): {}", status, text);
        }

        let response: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse media item response JSON")?;
        self.log
            .info(format_args!("Media item created with response: {response}"));
        Ok(response)
    }
}
