use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use img_parts::Bytes;
use img_parts::ImageEXIF;
use img_parts::jpeg::Jpeg;
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::path::Path;

use crate::logger::targets;

/// Layout EXIF uses for date/time strings.
pub const EXIF_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

// DateTime in IFD0; little_exif knows it as ModifyDate
const TAG_MODIFY_DATE: u16 = 0x0132;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

/// Stamp `captured_at` into the JPEG at `path` as both `DateTimeOriginal` and `DateTime`.
///
/// Strategy:
/// 1. Read the entire JPEG with img-parts (preserves all segments)
/// 2. Load the existing EXIF with little_exif, or start an empty block if there is none
/// 3. Set the two time tags and serialise
/// 4. Swap the APP1 EXIF segment in place and write the file back
///
/// Existing EXIF that little_exif cannot parse is left untouched and reported
/// as an error rather than replaced by a block holding only the two timestamps.
pub fn write_capture_time(path: &Path, captured_at: &NaiveDateTime) -> Result<()> {
    let formatted = captured_at.format(EXIF_TIME_FORMAT).to_string();

    let file_bytes = std::fs::read(path).context("Failed to read image file")?;
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse JPEG: {e}"))?;

    let orig_exif_pos = find_exif_segment_pos(&jpeg);

    let mut metadata = if jpeg.exif().is_some_and(|e| !e.is_empty()) {
        load_existing_metadata(path)
            .context("Existing EXIF block could not be parsed; leaving file unchanged")?
    } else {
        Metadata::new()
    };

    metadata.set_tag(ExifTag::DateTimeOriginal(formatted.clone()));
    metadata.set_tag(modify_date_tag(&formatted)?);

    let exif_bytes = metadata.as_u8_vec(FileExtension::JPEG);
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        anyhow::bail!("EXIF serialisation produced an empty block");
    }
    jpeg.set_exif(Some(Bytes::from(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())));

    // set_exif() inserts at position 3; put the segment back where it was
    // (or right after APP0) so EXIF stays ahead of any XMP APP1.
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1);
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    let output = jpeg.encoder().bytes();
    std::fs::write(path, &output).context("Failed to write JPEG file")?;

    log::debug!(target: targets::EXIF, "EXIF DateTimeOriginal/DateTime = {formatted} in {}", path.display());
    Ok(())
}

/// Build the IFD0 `DateTime` tag from its raw ASCII form.
fn modify_date_tag(formatted: &str) -> Result<ExifTag> {
    let raw = format!("{formatted}\0").into_bytes();
    ExifTag::from_u16_with_data(
        TAG_MODIFY_DATE,
        &ExifTagFormat::STRING,
        &raw,
        &Endian::Little,
        &ExifTagGroup::IFD0,
    )
    .map_err(|e| anyhow::anyhow!("Failed to build DateTime tag: {e:?}"))
}

/// Load existing EXIF metadata from a file path using little_exif.
/// Returns None if it can't parse (instead of losing data).
fn load_existing_metadata(path: &Path) -> Option<Metadata> {
    let path_owned = path.to_path_buf();
    // Suppress panics from little_exif
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(move || Metadata::new_from_path(&path_owned));
    std::panic::set_hook(prev_hook);

    match result {
        Ok(Ok(m)) => {
            log::debug!(target: targets::EXIF, "little_exif loaded {} existing EXIF tags", m.data().len());
            Some(m)
        }
        Ok(Err(e)) => {
            log::debug!(target: targets::EXIF, "little_exif could not parse EXIF: {e}");
            None
        }
        Err(_) => {
            log::debug!(target: targets::EXIF, "little_exif panicked parsing EXIF");
            None
        }
    }
}

/// Find the position of the EXIF APP1 segment in a JPEG.
/// EXIF segments have marker 0xE1 (APP1) and contents starting with "Exif\0\0".
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}
