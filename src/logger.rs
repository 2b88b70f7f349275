//! Injectable logging handle.
//!
//! Components receive a [`Logger`] at construction instead of writing to the
//! process-wide `log` macros directly. In the binary every handle forwards to
//! the sink installed by `env_logger`; in tests a capturing [`log::Log`] can be
//! passed in and inspected.

use log::{Level, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

/// Target names, prefixed with the crate name so `RUST_LOG` filters such as
/// `photo_uploader=debug` select them.
pub mod targets {
    pub const AUTH: &str = "photo_uploader::auth";
    pub const EXIF: &str = "photo_uploader::exif";
    pub const LIBRARY: &str = "photo_uploader::library";
    pub const NORMALIZER: &str = "photo_uploader::normalizer";
    pub const PIPELINE: &str = "photo_uploader::pipeline";
    pub const SCANNER: &str = "photo_uploader::scanner";
}

/// A cheap-to-clone logging capability bound to a target name.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: &'static str,
}

/// Forwards to whatever logger the process installed via `log::set_logger`.
struct ProcessLog;

impl Log for ProcessLog {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

impl Logger {
    /// A handle that writes to the process-wide logger.
    pub fn global(target: &'static str) -> Self {
        Self {
            sink: Arc::new(ProcessLog),
            target,
        }
    }

    /// A handle that writes to the given sink.
    pub fn new(sink: Arc<dyn Log>, target: &'static str) -> Self {
        Self { sink, target }
    }

    /// Same sink, different target.
    pub fn with_target(&self, target: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target,
        }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Error, args);
    }

    fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        self.sink.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(self.target)
                .build(),
        );
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
