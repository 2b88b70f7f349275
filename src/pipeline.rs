use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::library::MediaLibrary;
use crate::logger::{Logger, targets};
use crate::normalizer::Normalizer;
use crate::report::{self, UploadFailure};
use crate::scanner::{Catalog, MediaItem, Scanner};

/// Error message recorded when the service refuses to stage a file.
pub const UPLOAD_TOKEN_MISSING: &str = "Upload token is None";

/// The per-item steps of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Convert,
    Stamp,
    Stage,
    Commit,
}

/// What a failed step does to its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log it and carry on with the item as it is.
    Absorb,
    /// Log it, record an [`UploadFailure`], and abandon the item.
    Report,
}

impl Step {
    pub fn policy(self) -> FailurePolicy {
        match self {
            Step::Convert | Step::Stamp => FailurePolicy::Absorb,
            Step::Stage | Step::Commit => FailurePolicy::Report,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Convert => "Conversion",
            Step::Stamp => "Timestamp writing",
            Step::Stage => "Upload",
            Step::Commit => "Media item creation",
        })
    }
}

/// Run-level settings for [`UploadPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Stop once this many items have been committed.
    pub limit: Option<usize>,
    /// Where the failure CSV goes.
    pub failure_report: PathBuf,
    /// Treat per-item error statuses inside a successful commit response as failures.
    pub strict_commit_status: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            limit: None,
            failure_report: PathBuf::from("logs/failed_uploads.csv"),
            strict_commit_status: true,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            limit: config.upload.limit.filter(|&n| n > 0),
            failure_report: config.output.failure_report.clone(),
            strict_commit_status: config.upload.strict_commit_status,
        }
    }
}

/// Outcome of [`UploadPipeline::run`].
#[derive(Debug)]
pub struct RunReport {
    /// The catalog after conversion; converted slots hold the JPEG item.
    pub catalog: Catalog,
    /// Failed items, in the order they failed.
    pub failures: Vec<UploadFailure>,
    /// Items that made it through both upload phases.
    pub committed: usize,
    /// Set when a failure report was written.
    pub report_path: Option<PathBuf>,
}

/// Scans a library folder and uploads every item to a [`MediaLibrary`].
///
/// Items are handled one at a time, in catalog order. For each one the
/// pipeline converts PNG to JPEG, stamps the capture time, stages the bytes
/// and commits the staged token. Conversion and stamping problems are only
/// logged (see [`Step::policy`]); a failed upload is recorded and the run
/// moves on to the next item. Only a scan failure stops the run.
///
/// # Example
///
/// ```rust,no_run
/// use photo_uploader::config::Config;
/// use photo_uploader::library::GooglePhotosClient;
/// use photo_uploader::logger::{Logger, targets};
/// use photo_uploader::pipeline::UploadPipeline;
///
/// # async fn example() -> anyhow::Result<()> {
/// let mut config = Config::load(Some("config.json".as_ref()))?;
/// config.upload.dry_run = true;
///
/// let client = GooglePhotosClient::from_config(&config, Logger::global(targets::LIBRARY)).await?;
/// let pipeline = UploadPipeline::from_config(&config, Box::new(client), Logger::global(targets::PIPELINE));
///
/// let report = pipeline.run().await?;
/// println!("{} uploaded, {} failed", report.committed, report.failures.len());
/// # Ok(())
/// # }
/// ```
pub struct UploadPipeline {
    root: PathBuf,
    scanner: Scanner,
    normalizer: Normalizer,
    library: Box<dyn MediaLibrary>,
    options: PipelineOptions,
    log: Logger,
}

impl UploadPipeline {
    pub fn new(
        root: PathBuf,
        scanner: Scanner,
        normalizer: Normalizer,
        library: Box<dyn MediaLibrary>,
        options: PipelineOptions,
        log: Logger,
    ) -> Self {
        Self {
            root,
            scanner,
            normalizer,
            library,
            options,
            log,
        }
    }

    /// Wire up scanner and normalizer from the configuration.
    pub fn from_config(config: &Config, library: Box<dyn MediaLibrary>, log: Logger) -> Self {
        Self::new(
            config.library.folder_path.clone(),
            Scanner::new(log.with_target(targets::SCANNER)),
            Normalizer::new(config.output.jpeg_quality, log.with_target(targets::NORMALIZER)),
            library,
            PipelineOptions::from(config),
            log,
        )
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.log.info(format_args!(
            "Starting the upload pipeline ({}).",
            self.library.name()
        ));

        let mut catalog = self
            .scanner
            .scan(&self.root)
            .context("Failed to scan media folder")?;

        let mut failures = Vec::new();
        let mut committed = 0;

        for slot in 0..catalog.len() {
            // A zero limit means no limit
            if let Some(limit) = self.options.limit.filter(|&n| n > 0) {
                if committed >= limit {
                    self.log
                        .info(format_args!("Reached limit of {limit} files. Stopping."));
                    break;
                }
            }

            let Some(mut item) = catalog.item(slot).cloned() else {
                continue;
            };
            self.log
                .info(format_args!("Preparing image: {}", item.file_name));

            if item.is_png() {
                match self.normalizer.convert(&item) {
                    Ok(converted) => {
                        catalog.replace(slot, converted.clone());
                        item = converted;
                    }
                    Err(e) => self.record(Step::Convert, &item, format!("{e:#}"), &mut failures),
                }
            }

            if let Err(e) = self.normalizer.stamp_timestamp(&item) {
                self.record(Step::Stamp, &item, format!("{e:#}"), &mut failures);
            }

            match self.upload(&item).await {
                Ok(()) => committed += 1,
                Err((step, message)) => self.record(step, &item, message, &mut failures),
            }
        }

        let report_path = self.finish(&failures);
        self.log.info(format_args!("Upload pipeline completed."));

        Ok(RunReport {
            catalog,
            failures,
            committed,
            report_path,
        })
    }

    /// Stage then commit one item. On failure, returns the step and its message.
    async fn upload(&self, item: &MediaItem) -> std::result::Result<(), (Step, String)> {
        let token = match self.library.stage(&item.source_path).await {
            Ok(Some(token)) => token,
            Ok(None) => return Err((Step::Stage, UPLOAD_TOKEN_MISSING.to_string())),
            Err(e) => return Err((Step::Stage, format!("{e:#}"))),
        };

        let response = self
            .library
            .commit(&token, &item.description())
            .await
            .map_err(|e| (Step::Commit, format!("{e:#}")))?;

        if self.options.strict_commit_status {
            if let Some(message) = commit_status_error(&response) {
                return Err((Step::Commit, message));
            }
        }
        Ok(())
    }

    /// Apply the step's failure policy.
    fn record(&self, step: Step, item: &MediaItem, message: String, failures: &mut Vec<UploadFailure>) {
        match step.policy() {
            FailurePolicy::Absorb => {
                self.log.error(format_args!(
                    "{step} failed for {}: {message}",
                    item.file_name
                ));
            }
            FailurePolicy::Report => {
                self.log.error(format_args!(
                    "{step} failed for {}: {message}",
                    item.file_name
                ));
                self.log.error(format_args!(
                    "Skipping {} due to upload failure.",
                    item.file_name
                ));
                failures.push(UploadFailure::new(item.file_name.clone(), message));
            }
        }
    }

    /// Write the failure report if anything failed.
    fn finish(&self, failures: &[UploadFailure]) -> Option<PathBuf> {
        if failures.is_empty() {
            return None;
        }

        let path = &self.options.failure_report;
        match report::write_failure_report(failures, path) {
            Ok(()) => {
                self.log.warn(format_args!(
                    "{} uploads failed. Details saved in {}",
                    failures.len(),
                    path.display()
                ));
                Some(path.clone())
            }
            Err(e) => {
                self.log.error(format_args!(
                    "{} uploads failed and the report could not be written: {e:#}",
                    failures.len()
                ));
                None
            }
        }
    }
}

/// First per-item error in a batch-create response, if any.
///
/// The service answers 200 even when individual items fail; those carry a
/// `status` with a non-zero `code`.
pub fn commit_status_error(response: &Value) -> Option<String> {
    response
        .get("newMediaItemResults")?
        .as_array()?
        .iter()
        .filter_map(|result| result.get("status"))
        .find_map(|status| {
            let code = status.get("code").and_then(Value::as_i64).unwrap_or(0);
            if code == 0 {
                return None;
            }
            Some(
                status
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| format!("Media item creation returned status code {code}")),
            )
        })
}
