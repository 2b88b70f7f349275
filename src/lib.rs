//! # photo-uploader
//!
//! Upload a folder of albums to Google Photos. PNG files are converted to
//! JPEG, capture times taken from `YYYY-MM-DD HH.MM.SS` file names are stamped
//! into EXIF, and every file goes through the two-phase upload (raw bytes,
//! then media item creation). Items that fail are collected into a CSV report
//! instead of stopping the batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photo_uploader::config::Config;
//! use photo_uploader::library::GooglePhotosClient;
//! use photo_uploader::logger::{Logger, targets};
//! use photo_uploader::pipeline::UploadPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load(Some("config.json".as_ref()))?;
//!     config.apply_env();
//!     config.validate()?;
//!
//!     // Runs the sign-in flow on first use, or just logs in dry-run mode
//!     let client = GooglePhotosClient::from_config(&config, Logger::global(targets::LIBRARY)).await?;
//!     let pipeline = UploadPipeline::from_config(&config, Box::new(client), Logger::global(targets::PIPELINE));
//!
//!     let report = pipeline.run().await?;
//!     for failure in &report.failures {
//!         eprintln!("{}: {}", failure.file_name, failure.error_message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The scanner and normalizer can be used on their own:
//!
//! ```rust,no_run
//! use photo_uploader::logger::{Logger, targets};
//! use photo_uploader::normalizer::Normalizer;
//! use photo_uploader::scanner::Scanner;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let catalog = Scanner::new(Logger::global(targets::SCANNER)).scan(Path::new("./photos"))?;
//!     let normalizer = Normalizer::new(75, Logger::global(targets::NORMALIZER));
//!
//!     for item in &catalog {
//!         let item = normalizer.convert(item)?;
//!         normalizer.stamp_timestamp(&item)?;
//!         println!("{} -> {}", item.file_name, item.description());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`scanner`]: Album folder walk, file-name timestamps, the catalog
//! - [`normalizer`]: PNG→JPEG conversion and EXIF capture-time stamping
//! - [`exif`]: Reading and writing the EXIF time fields
//! - [`library`]: The [`library::MediaLibrary`] trait and the Google Photos client
//! - [`pipeline`]: Per-item orchestration and failure policies
//! - [`report`]: Failure CSV
//! - [`config`]: Configuration (JSON file, environment overrides, validation)
//! - [`logger`]: Injectable logging handle

pub mod config;
pub mod exif;
pub mod library;
pub mod logger;
pub mod normalizer;
pub mod pipeline;
pub mod report;
pub mod scanner;
