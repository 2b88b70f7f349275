use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use photo_uploader::config::Config;
use photo_uploader::exif;
use photo_uploader::library::GooglePhotosClient;
use photo_uploader::logger::{Logger, targets};
use photo_uploader::pipeline::UploadPipeline;
use photo_uploader::scanner::Scanner;

#[derive(Parser, Debug)]
#[command(
    name = "photo-uploader",
    version,
    about = "Upload album folders to Google Photos, converting PNG to JPEG and stamping capture times from file names"
)]
struct Cli {
    /// Media folder containing one subfolder per album
    #[arg(value_name = "FOLDER")]
    folder: Option<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Run everything except the uploads
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many successful uploads
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Where to write the CSV of failed uploads
    #[arg(long = "failure-report", value_name = "FILE")]
    failure_report: Option<PathBuf>,

    /// Sign in through a local browser redirect instead of pasting a code
    #[arg(long)]
    browser: bool,

    /// List each media item with its file-name and EXIF times, then exit
    #[arg(long = "show-exif")]
    show_exif: bool,

    /// Directory for the daily log file
    #[arg(long = "log-dir", value_name = "DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Log to stderr only
    #[arg(long = "no-log-file")]
    no_log_file: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Values from .env win over the inherited environment
    dotenvy::dotenv_override().ok();

    init_logging(&cli);

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Load config: file, then environment, then flags
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env();
    apply_cli_overrides(&mut config, &cli);

    // Handle --show-exif
    if cli.show_exif {
        return show_exif(&config.library.folder_path);
    }

    config.validate()?;

    if let Some(limit) = config.upload.limit.filter(|&n| n > 0) {
        log::info!("Upload limit: {limit} file(s)");
    }

    let client = GooglePhotosClient::from_config(&config, Logger::global(targets::LIBRARY)).await?;
    let pipeline =
        UploadPipeline::from_config(&config, Box::new(client), Logger::global(targets::PIPELINE));

    log::info!("Pipeline started");
    let report = pipeline.run().await?;

    log::info!(
        "Done: {} uploaded, {} failed out of {} media files",
        report.committed,
        report.failures.len(),
        report.catalog.len()
    );

    Ok(())
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(folder) = &cli.folder {
        config.library.folder_path = folder.clone();
    }
    if cli.dry_run {
        config.upload.dry_run = true;
    }
    if let Some(limit) = cli.limit {
        config.upload.limit = Some(limit);
    }
    if let Some(path) = &cli.failure_report {
        config.output.failure_report = path.clone();
    }
    if cli.browser {
        config.auth.headless = false;
    }
}

/// `YYYY-MM-DD HH:MM:SS - LEVEL - message` on stderr, and into
/// `<log_dir>/upload_log_YYYYMMDD.txt` unless disabled.
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });

    let mut file_error = None;
    if !cli.no_log_file {
        match open_log_file(&cli.log_dir) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => file_error = Some(e),
        }
    }

    builder.init();

    if let Some(e) = file_error {
        log::warn!("Logging to stderr only: {e:#}");
    }
}

fn open_log_file(dir: &Path) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(format!(
        "upload_log_{}.txt",
        chrono::Local::now().format("%Y%m%d")
    ));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Writes every log line to stderr and the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print the file-name time and the embedded EXIF times of every media item.
fn show_exif(root: &Path) -> Result<()> {
    if root.as_os_str().is_empty() {
        anyhow::bail!("No media folder specified. Pass a folder or set FOLDER_PATH.");
    }

    let catalog = Scanner::new(Logger::global(targets::SCANNER)).scan(root)?;
    if catalog.is_empty() {
        anyhow::bail!("No supported media files found in {}", root.display());
    }

    for item in &catalog {
        println!();
        println!("{BOLD}File:{RESET} {}", item.source_path.display());
        println!("  {DIM}{}{RESET}", "─".repeat(70));

        let from_name = item
            .captured_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "(none)".to_string());
        print_row("File name time", &from_name);

        if item.format_extension != ".jpg" {
            print_row("EXIF", "(not a JPEG)");
            continue;
        }

        match exif::read_capture_times(&item.source_path) {
            Ok(times) => {
                let show = |t: Option<chrono::NaiveDateTime>| {
                    t.map(|t| t.format(exif::EXIF_TIME_FORMAT).to_string())
                        .unwrap_or_else(|| "(none)".to_string())
                };
                print_row("DateTimeOriginal", &show(times.original));
                print_row("DateTime", &show(times.modified));
            }
            Err(e) => print_row("EXIF", &format!("unreadable: {e:#}")),
        }
    }
    println!();

    Ok(())
}

/// Print a single row in the EXIF display table.
fn print_row(tag: &str, val: &str) {
    println!("  {tag:<22} : {val}");
}
