use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use nom_exif::*;
use std::path::Path;

use crate::logger::targets;

// DateTime (IFD0), called ModifyDate by most tools
const TAG_MODIFY_DATE: u16 = 0x0132;

/// Timestamps found in an image's EXIF block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureTimes {
    /// `DateTimeOriginal` (0x9003).
    pub original: Option<NaiveDateTime>,
    /// `DateTime` / `ModifyDate` (0x0132).
    pub modified: Option<NaiveDateTime>,
}

/// Read the capture and modification times from an image file.
///
/// A file without any EXIF block, or one whose format is not recognised,
/// yields empty [`CaptureTimes`]. Only a missing file is an error.
pub fn read_capture_times(path: &Path) -> Result<CaptureTimes> {
    if !path.is_file() {
        anyhow::bail!("No such file: {}", path.display());
    }

    let mut parser = MediaParser::new();
    let ms = match MediaSource::file_path(path) {
        Ok(ms) => ms,
        Err(e) => {
            log::debug!(target: targets::EXIF, "Unrecognised media format for {}: {e}", path.display());
            return Ok(CaptureTimes::default());
        }
    };

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!(target: targets::EXIF, "No EXIF data found in {}", path.display());
            return Ok(CaptureTimes::default());
        }
    };
    let exif: Exif = iter.into();

    Ok(CaptureTimes {
        original: exif.get(ExifTag::DateTimeOriginal).and_then(entry_to_time),
        modified: exif
            .get_by_ifd_tag_code(0, TAG_MODIFY_DATE)
            .and_then(entry_to_time),
    })
}

/// Interpret an EXIF entry as a wall-clock time.
///
/// Depending on whether an offset tag is present, the parser hands back either
/// a zoned time or a plain one; both are reduced to the naive wall-clock value.
fn entry_to_time(val: &EntryValue) -> Option<NaiveDateTime> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}
