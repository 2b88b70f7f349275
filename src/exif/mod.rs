//! Capture-time metadata inside JPEG files.
//!
//! - [`write_capture_time`] stamps `DateTimeOriginal` and `DateTime` into the
//!   EXIF block, keeping every other segment and tag
//! - [`read_capture_times`] reads both fields back
//!
//! These are free functions without a [`Logger`](crate::logger::Logger)
//! handle. Their debug lines go to the process-wide `log` facade under
//! [`targets::EXIF`](crate::logger::targets::EXIF).

mod reader;
mod writer;

pub use reader::{CaptureTimes, read_capture_times};
pub use writer::{EXIF_TIME_FORMAT, write_capture_time};
