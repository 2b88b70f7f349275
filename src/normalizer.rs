use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::exif;
use crate::logger::Logger;
use crate::scanner::MediaItem;

/// Default quality for PNG→JPEG conversion.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// What [`Normalizer::stamp_timestamp`] did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// The item has no capture time; the file was not touched.
    Skipped,
    /// Both EXIF time fields now hold the capture time.
    Written,
}

/// Prepares media files for upload: format conversion and EXIF capture time.
#[derive(Debug, Clone)]
pub struct Normalizer {
    jpeg_quality: u8,
    log: Logger,
}

impl Normalizer {
    pub fn new(jpeg_quality: u8, log: Logger) -> Self {
        Self { jpeg_quality, log }
    }

    /// Re-encode a PNG item as a JPEG next to it and return the converted item.
    ///
    /// The alpha channel, if any, is dropped. The source `.png` stays on disk,
    /// and the JPEG path is always derived from the PNG stem, so converting the
    /// same item again overwrites the same file. Items that are not PNG come
    /// back unchanged.
    pub fn convert(&self, item: &MediaItem) -> Result<MediaItem> {
        if !item.is_png() {
            return Ok(item.clone());
        }

        self.log
            .info(format_args!("Converting {} to JPG.", item.file_name));

        let img = image::open(&item.source_path)
            .with_context(|| format!("Failed to decode {}", item.source_path.display()))?;
        let rgb = img.to_rgb8();

        let new_path = item.source_path.with_extension("jpg");
        let file = File::create(&new_path)
            .with_context(|| format!("Failed to create {}", new_path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(&rgb)
            .with_context(|| format!("Failed to encode {}", new_path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", new_path.display()))?;

        let converted = item.relocated(new_path);
        self.log
            .info(format_args!("Conversion complete: {}", converted.file_name));
        Ok(converted)
    }

    /// Write the item's capture time into its EXIF block.
    ///
    /// Without a capture time this only logs a warning. Errors reading or
    /// writing the metadata are returned for the caller to deal with; the file
    /// is left as it was.
    pub fn stamp_timestamp(&self, item: &MediaItem) -> Result<Stamp> {
        let Some(captured_at) = item.captured_at else {
            self.log.warn(format_args!(
                "No timestamp found for {}. Skipping EXIF writing.",
                item.file_name
            ));
            return Ok(Stamp::Skipped);
        };

        exif::write_capture_time(&item.source_path, &captured_at)
            .with_context(|| format!("Failed to set EXIF timestamp for {}", item.file_name))?;

        self.log
            .info(format_args!("EXIF timestamp set for {}", item.file_name));
        Ok(Stamp::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::read_capture_times;
    use crate::logger::targets;
    use crate::logger::testing::capture;
    use chrono::NaiveDate;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn normalizer() -> Normalizer {
        Normalizer::new(DEFAULT_JPEG_QUALITY, Logger::global(targets::NORMALIZER))
    }

    fn rgba_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(10, 6, image::Rgba([200, 100, 50, 128]))
            .save(&path)
            .unwrap();
        path
    }

    // ── convert ──────────────────────────────────────────────────────

    #[test]
    fn convert_png_to_rgb_jpeg() {
        let dir = TempDir::new().unwrap();
        let png = rgba_png(dir.path(), "2023-05-01 10.00.00.png");
        let item = MediaItem::from_path(&png).unwrap();

        let converted = normalizer().convert(&item).unwrap();

        assert_eq!(converted.file_name, "2023-05-01 10.00.00.jpg");
        assert_eq!(converted.format_extension, ".jpg");
        assert_eq!(converted.source_path, dir.path().join("2023-05-01 10.00.00.jpg"));
        assert_eq!(converted.captured_at, item.captured_at);
        assert_eq!(converted.containing_folder, item.containing_folder);

        let decoded = image::open(&converted.source_path).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (10, 6));
    }

    #[test]
    fn convert_is_repeatable_and_keeps_png() {
        let dir = TempDir::new().unwrap();
        let png = rgba_png(dir.path(), "shot.png");
        let item = MediaItem::from_path(&png).unwrap();

        let first = normalizer().convert(&item).unwrap();
        let second = normalizer().convert(&item).unwrap();

        assert_eq!(first.source_path, second.source_path);
        assert!(first.source_path.exists());
        assert!(png.exists(), "source PNG must never be deleted");

        let jpgs = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "jpg"))
            .count();
        assert_eq!(jpgs, 1);
    }

    #[test]
    fn convert_leaves_other_formats_alone() {
        let item = MediaItem::from_path(Path::new("/lib/a/clip.mp4")).unwrap();
        let same = normalizer().convert(&item).unwrap();
        assert_eq!(same, item);
    }

    #[test]
    fn convert_corrupt_png_is_error() {
        let dir = TempDir::new().unwrap();
        let png = dir.path().join("broken.png");
        fs::write(&png, b"not a png").unwrap();
        let item = MediaItem::from_path(&png).unwrap();

        let err = normalizer().convert(&item).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to decode"));
        assert!(!dir.path().join("broken.jpg").exists());
    }

    // ── stamp_timestamp ──────────────────────────────────────────────

    #[test]
    fn stamp_without_time_is_noop_with_warning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-date.jpg");
        image::RgbImage::new(4, 4).save(&path).unwrap();
        let before = fs::read(&path).unwrap();
        let item = MediaItem::from_path(&path).unwrap();
        let (sink, log) = capture(targets::NORMALIZER);

        let stamp = Normalizer::new(DEFAULT_JPEG_QUALITY, log)
            .stamp_timestamp(&item)
            .unwrap();

        assert_eq!(stamp, Stamp::Skipped);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(sink.contains(log::Level::Warn, "No timestamp found for not-a-date.jpg"));
    }

    #[test]
    fn stamp_converted_png() {
        let dir = TempDir::new().unwrap();
        let png = rgba_png(dir.path(), "2023-05-01 10.00.00.png");
        let n = normalizer();
        let jpg = n.convert(&MediaItem::from_path(&png).unwrap()).unwrap();

        assert_eq!(n.stamp_timestamp(&jpg).unwrap(), Stamp::Written);

        let expected = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let times = read_capture_times(&jpg.source_path).unwrap();
        assert_eq!(times.original, Some(expected));
        assert_eq!(times.modified, Some(expected));
    }

    #[test]
    fn stamp_video_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2021-07-04 12.30.00.mp4");
        fs::write(&path, b"ftyp....").unwrap();
        let item = MediaItem::from_path(&path).unwrap();

        let err = normalizer().stamp_timestamp(&item).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to set EXIF timestamp for 2021-07-04 12.30.00.mp4"));
    }
}
