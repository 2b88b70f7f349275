use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::normalizer::DEFAULT_JPEG_QUALITY;

/// Google Photos Library API endpoints.
pub const DEFAULT_UPLOADS_URL: &str = "https://photoslibrary.googleapis.com/v1/uploads";
pub const DEFAULT_BATCH_CREATE_URL: &str =
    "https://photoslibrary.googleapis.com/v1/mediaItems:batchCreate";
pub const APPEND_ONLY_SCOPE: &str = "https://www.googleapis.com/auth/photoslibrary.appendonly";

/// Top-level configuration for the uploader.
///
/// Every section falls back to its defaults when missing from the file, so a
/// config holding only `{"library": {"folder_path": "…"}}` is complete.
///
/// # Loading
///
/// ```rust,no_run
/// use photo_uploader::config::Config;
///
/// // From a JSON file
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.library.folder_path = "/photos".into();
/// config.upload.dry_run = true;
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the album folders live.
    pub library: LibraryConfig,
    /// OAuth client and token locations.
    pub auth: AuthConfig,
    /// Remote upload behavior (dry run, limits, endpoints).
    pub upload: UploadConfig,
    /// Failure report and conversion output.
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Root folder; media is read from its subfolders.
    pub folder_path: PathBuf,
}

/// OAuth configuration for the Google Photos client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Client secret JSON downloaded from the Google Cloud console.
    pub client_secret_path: PathBuf,
    /// Authorized-user token file, created by the first interactive sign-in.
    pub token_path: PathBuf,
    pub scopes: Vec<String>,
    /// `true`: paste the consent code on the console. `false`: catch the
    /// redirect on a local loopback port.
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// If `true`, run the whole pipeline without talking to the service.
    pub dry_run: bool,
    /// Stop after this many successful uploads. `0` means no limit.
    pub limit: Option<usize>,
    /// Per-request timeout for the remote calls.
    pub timeout_secs: u64,
    /// If `true`, an error status inside a successful batch-create response
    /// counts as a failed upload. If `false`, any 2xx response is success.
    pub strict_commit_status: bool,
    pub uploads_url: String,
    pub batch_create_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// CSV listing the items that failed; only written when there are any.
    pub failure_report: PathBuf,
    /// JPEG quality used when converting PNG files.
    pub jpeg_quality: u8,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secret_path: PathBuf::from("credentials/client_secret.json"),
            token_path: PathBuf::from("credentials/token.json"),
            scopes: vec![APPEND_ONLY_SCOPE.to_string()],
            headless: true,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            timeout_secs: 120,
            strict_commit_status: true,
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            batch_create_url: DEFAULT_BATCH_CREATE_URL.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            failure_report: PathBuf::from("logs/failed_uploads.csv"),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl Config {
    /// Resolve the config file path: `config.json` next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Apply `FOLDER_PATH`, `GOOGLE_CLIENT_SECRET_JSON` and `TOKEN_JSON_PATH`
    /// from the environment on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("FOLDER_PATH") {
            self.library.folder_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("GOOGLE_CLIENT_SECRET_JSON") {
            self.auth.client_secret_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("TOKEN_JSON_PATH") {
            self.auth.token_path = PathBuf::from(v);
        }
    }

    /// Check the configuration once before anything runs.
    pub fn validate(&self) -> Result<()> {
        let root = &self.library.folder_path;
        if root.as_os_str().is_empty() {
            anyhow::bail!(
                "No media folder configured. Set library.folder_path, FOLDER_PATH, or pass a folder argument."
            );
        }
        if !root.is_dir() {
            anyhow::bail!("Media folder {} is not a directory", root.display());
        }
        if self.upload.timeout_secs == 0 {
            anyhow::bail!("upload.timeout_secs must be greater than zero");
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            anyhow::bail!(
                "output.jpeg_quality must be between 1 and 100, got {}",
                self.output.jpeg_quality
            );
        }
        if self.output.failure_report.as_os_str().is_empty() {
            anyhow::bail!("output.failure_report must not be empty");
        }
        if !self.upload.dry_run
            && !self.auth.token_path.exists()
            && !self.auth.client_secret_path.exists()
        {
            anyhow::bail!(
                "Neither token file {} nor client secret {} exists; cannot authenticate",
                self.auth.token_path.display(),
                self.auth.client_secret_path.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn valid_dry_run(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.library.folder_path = dir.path().to_path_buf();
        config.upload.dry_run = true;
        config
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(!config.upload.dry_run);
        assert!(config.auth.headless);
        assert_eq!(config.upload.limit, None);
        assert_eq!(config.upload.timeout_secs, 120);
        assert!(config.upload.strict_commit_status);
        assert_eq!(config.auth.scopes, [APPEND_ONLY_SCOPE]);
        assert_eq!(config.auth.token_path, PathBuf::from("credentials/token.json"));
        assert_eq!(
            config.output.failure_report,
            PathBuf::from("logs/failed_uploads.csv")
        );
        assert_eq!(config.output.jpeg_quality, 75);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "library": { "folder_path": "/photos" }, "upload": { "dry_run": true, "limit": 2 } }"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.library.folder_path, PathBuf::from("/photos"));
        assert!(config.upload.dry_run);
        assert_eq!(config.upload.limit, Some(2));
        assert_eq!(config.upload.timeout_secs, 120);
        assert_eq!(config.upload.uploads_url, DEFAULT_UPLOADS_URL);
        assert!(config.auth.headless);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.json"))).unwrap();
        assert!(config.library.folder_path.as_os_str().is_empty());
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.upload.limit = Some(7);
        config.auth.headless = false;

        config.save(Some(&path)).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.upload.limit, Some(7));
        assert!(!loaded.auth.headless);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FOLDER_PATH", "/mnt/photos"),
            ("TOKEN_JSON_PATH", "/secrets/token.json"),
            ("GOOGLE_CLIENT_SECRET_JSON", "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.library.folder_path, PathBuf::from("/mnt/photos"));
        assert_eq!(config.auth.token_path, PathBuf::from("/secrets/token.json"));
        // blank values are ignored
        assert_eq!(
            config.auth.client_secret_path,
            PathBuf::from("credentials/client_secret.json")
        );
    }

    #[test]
    fn validate_accepts_dry_run_without_credentials() {
        let dir = TempDir::new().unwrap();
        valid_dry_run(&dir).validate().unwrap();
    }

    #[test]
    fn validate_requires_folder() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("No media folder configured"));

        let mut config = Config::default();
        config.library.folder_path = PathBuf::from("/nonexistent/photos");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_numbers() {
        let dir = TempDir::new().unwrap();

        let mut config = valid_dry_run(&dir);
        config.upload.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_dry_run(&dir);
        config.output.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_live_needs_credentials() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_dry_run(&dir);
        config.upload.dry_run = false;
        config.auth.token_path = dir.path().join("missing-token.json");
        config.auth.client_secret_path = dir.path().join("missing-secret.json");
        assert!(config.validate().is_err());

        fs::write(&config.auth.token_path, "{}").unwrap();
        config.validate().unwrap();
    }
}
