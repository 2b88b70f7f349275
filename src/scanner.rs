use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::logger::Logger;

/// Extensions picked up by the scanner (compared case-insensitively).
pub const MEDIA_EXTENSIONS: &[&str] = &["png", "jpg", "mov", "mp4"];

/// Filename stem layout the capture time is parsed from, e.g. `2023-05-01 10.00.00`.
pub const FILENAME_TIME_FORMAT: &str = "%Y-%m-%d %H.%M.%S";

/// One media file discovered under the library root.
///
/// Values are never mutated after creation: conversion produces a new item
/// through [`MediaItem::relocated`] that keeps the folder and capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub source_path: PathBuf,
    pub file_name: String,
    pub containing_folder: PathBuf,
    /// Lowercase, including the leading dot (`.png`).
    pub format_extension: String,
    pub captured_at: Option<NaiveDateTime>,
}

impl MediaItem {
    /// Build an item for `path`, or `None` if its extension is not on the allow-list.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        if !MEDIA_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let captured_at = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(parse_capture_time);

        Some(Self {
            source_path: path.to_path_buf(),
            file_name,
            containing_folder: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            format_extension: format!(".{extension}"),
            captured_at,
        })
    }

    /// A copy of this item pointing at `new_path`; folder and capture time carry over.
    pub fn relocated(&self, new_path: PathBuf) -> Self {
        let file_name = new_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format_extension = new_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Self {
            source_path: new_path,
            file_name,
            containing_folder: self.containing_folder.clone(),
            format_extension,
            captured_at: self.captured_at,
        }
    }

    pub fn is_png(&self) -> bool {
        self.format_extension == ".png"
    }

    /// Description attached to the library entry on commit.
    pub fn description(&self) -> String {
        match self.captured_at {
            Some(ts) => format!("File date: {ts}"),
            None => "No timestamp available".to_string(),
        }
    }
}

/// Parse a capture time from a filename stem. Anything but an exact match is `None`.
pub fn parse_capture_time(stem: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stem, FILENAME_TIME_FORMAT).ok()
}

/// Media items keyed by file name, iterated in order of first discovery.
///
/// Inserting a name that is already present replaces the stored item but keeps
/// its original position (last write wins, no content deduplication).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<MediaItem>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under `item.file_name`. Returns the item that was replaced, if any.
    pub fn insert(&mut self, item: MediaItem) -> Option<MediaItem> {
        match self.index.get(&item.file_name) {
            Some(&slot) => Some(std::mem::replace(&mut self.items[slot], item)),
            None => {
                self.index.insert(item.file_name.clone(), self.items.len());
                self.items.push(item);
                None
            }
        }
    }

    /// Reassign a slot to a new value. The lookup key stays the name the slot
    /// was discovered under.
    pub fn replace(&mut self, slot: usize, item: MediaItem) {
        if let Some(existing) = self.items.get_mut(slot) {
            *existing = item;
        }
    }

    pub fn get(&self, file_name: &str) -> Option<&MediaItem> {
        self.index.get(file_name).map(|&slot| &self.items[slot])
    }

    pub fn item(&self, slot: usize) -> Option<&MediaItem> {
        self.items.get(slot)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaItem> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a MediaItem;
    type IntoIter = std::slice::Iter<'a, MediaItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Walks a library root laid out as one folder per album.
#[derive(Debug, Clone)]
pub struct Scanner {
    log: Logger,
}

impl Scanner {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    /// Build the catalog for `root`.
    ///
    /// Only files inside at least one subfolder are considered; files sitting
    /// directly in `root` are ignored. Subfolders are walked recursively in
    /// file-name order, following symlinks.
    ///
    /// A root that is missing or cannot be listed is an error. Anything that
    /// fails further down (an unreadable album, a symlink loop) is logged and
    /// skipped so the rest of the tree is still catalogued.
    pub fn scan(&self, root: &Path) -> Result<Catalog> {
        std::fs::read_dir(root)
            .with_context(|| format!("Cannot read media folder {}", root.display()))?;

        let mut catalog = Catalog::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(e).with_context(|| {
                        format!("Cannot read media folder {}", root.display())
                    });
                }
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    self.log
                        .warn(format_args!("Skipping unreadable entry {path}: {e}"));
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                self.log
                    .info(format_args!("Scanning folder: {}", entry.path().display()));
                continue;
            }

            // Loose files next to the album folders are not media.
            if entry.depth() == 1 {
                continue;
            }

            if let Some(item) = MediaItem::from_path(entry.path()) {
                self.log
                    .debug(format_args!("Processed metadata for: {}", item.file_name));
                if let Some(previous) = catalog.insert(item) {
                    self.log.debug(format_args!(
                        "Duplicate file name {}, replacing {}",
                        previous.file_name,
                        previous.source_path.display()
                    ));
                }
            }
        }

        self.log
            .info(format_args!("Found {} media files.", catalog.len()));
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::targets;
    use crate::logger::testing::capture;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn scanner() -> Scanner {
        Scanner::new(Logger::global(targets::SCANNER))
    }

    // ── parse_capture_time ───────────────────────────────────────────

    #[test]
    fn parses_exact_pattern() {
        assert_eq!(
            parse_capture_time("2023-05-01 10.00.00"),
            Some(ts(2023, 5, 1, 10, 0, 0))
        );
        assert_eq!(
            parse_capture_time("1999-12-31 23.59.59"),
            Some(ts(1999, 12, 31, 23, 59, 59))
        );
    }

    #[test]
    fn rejects_other_layouts() {
        assert_eq!(parse_capture_time("not-a-date"), None);
        assert_eq!(parse_capture_time("2023-05-01 10:00:00"), None);
        assert_eq!(parse_capture_time("2023-05-01_10.00.00"), None);
        assert_eq!(parse_capture_time("2023-05-01 10.00.00 (1)"), None);
        assert_eq!(parse_capture_time("2023-13-01 10.00.00"), None);
        assert_eq!(parse_capture_time(""), None);
    }

    // ── MediaItem ────────────────────────────────────────────────────

    #[test]
    fn item_from_path_fields() {
        let item = MediaItem::from_path(Path::new("/lib/Album1/2023-05-01 10.00.00.PNG")).unwrap();
        assert_eq!(item.file_name, "2023-05-01 10.00.00.PNG");
        assert_eq!(item.containing_folder, PathBuf::from("/lib/Album1"));
        assert_eq!(item.format_extension, ".png");
        assert!(item.is_png());
        assert_eq!(item.captured_at, Some(ts(2023, 5, 1, 10, 0, 0)));
    }

    #[test]
    fn item_from_path_rejects_unlisted_extensions() {
        assert!(MediaItem::from_path(Path::new("/lib/a/notes.txt")).is_none());
        assert!(MediaItem::from_path(Path::new("/lib/a/photo.jpeg")).is_none());
        assert!(MediaItem::from_path(Path::new("/lib/a/photo.heic")).is_none());
        assert!(MediaItem::from_path(Path::new("/lib/a/noext")).is_none());
    }

    #[test]
    fn relocated_keeps_folder_and_time() {
        let item = MediaItem::from_path(Path::new("/lib/a/2020-01-02 03.04.05.png")).unwrap();
        let moved = item.relocated(PathBuf::from("/lib/a/2020-01-02 03.04.05.jpg"));
        assert_eq!(moved.file_name, "2020-01-02 03.04.05.jpg");
        assert_eq!(moved.format_extension, ".jpg");
        assert_eq!(moved.containing_folder, item.containing_folder);
        assert_eq!(moved.captured_at, item.captured_at);
        // original value is untouched
        assert_eq!(item.format_extension, ".png");
    }

    #[test]
    fn description_with_and_without_time() {
        let dated = MediaItem::from_path(Path::new("/l/a/2023-05-01 10.00.00.jpg")).unwrap();
        assert_eq!(dated.description(), "File date: 2023-05-01 10:00:00");

        let undated = MediaItem::from_path(Path::new("/l/a/not-a-date.mp4")).unwrap();
        assert_eq!(undated.captured_at, None);
        assert_eq!(undated.description(), "No timestamp available");
    }

    // ── Catalog ──────────────────────────────────────────────────────

    #[test]
    fn catalog_last_write_wins_in_first_slot() {
        let mut catalog = Catalog::new();
        catalog.insert(MediaItem::from_path(Path::new("/l/a/x.jpg")).unwrap());
        catalog.insert(MediaItem::from_path(Path::new("/l/a/y.jpg")).unwrap());
        let replaced = catalog.insert(MediaItem::from_path(Path::new("/l/b/x.jpg")).unwrap());

        assert!(replaced.is_some());
        assert_eq!(catalog.len(), 2);
        let names: Vec<_> = catalog.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, ["x.jpg", "y.jpg"]);
        assert_eq!(
            catalog.get("x.jpg").unwrap().containing_folder,
            PathBuf::from("/l/b")
        );
    }

    #[test]
    fn catalog_replace_slot() {
        let mut catalog = Catalog::new();
        let png = MediaItem::from_path(Path::new("/l/a/p.png")).unwrap();
        catalog.insert(png.clone());
        catalog.replace(0, png.relocated(PathBuf::from("/l/a/p.jpg")));

        assert_eq!(catalog.item(0).unwrap().file_name, "p.jpg");
        // still reachable under the discovery name
        assert_eq!(catalog.get("p.png").unwrap().format_extension, ".jpg");
    }

    // ── Scanner::scan ────────────────────────────────────────────────

    #[test]
    fn scan_ignores_root_level_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("loose.jpg"), b"fake").unwrap();
        let album = dir.path().join("Album1");
        fs::create_dir(&album).unwrap();
        fs::write(album.join("inside.jpg"), b"fake").unwrap();

        let catalog = scanner().scan(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("inside.jpg").is_some());
        assert!(catalog.get("loose.jpg").is_none());
    }

    #[test]
    fn scan_filters_and_recurses() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("Album1");
        let nested = album.join("Day 2");
        fs::create_dir_all(&nested).unwrap();

        fs::write(album.join("2023-05-01 10.00.00.png"), b"fake").unwrap();
        fs::write(album.join("not-a-date.mp4"), b"fake").unwrap();
        fs::write(album.join("clip.MOV"), b"fake").unwrap();
        fs::write(album.join("readme.txt"), b"fake").unwrap();
        fs::write(nested.join("deep.jpg"), b"fake").unwrap();

        let catalog = scanner().scan(dir.path()).unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.get("2023-05-01 10.00.00.png").unwrap().captured_at,
            Some(ts(2023, 5, 1, 10, 0, 0))
        );
        assert_eq!(catalog.get("not-a-date.mp4").unwrap().captured_at, None);
        assert_eq!(catalog.get("clip.MOV").unwrap().format_extension, ".mov");
        assert!(catalog.get("deep.jpg").is_some());
        assert!(catalog.get("readme.txt").is_none());
    }

    #[test]
    fn scan_order_is_by_file_name() {
        let dir = TempDir::new().unwrap();
        let album = dir.path().join("A");
        fs::create_dir(&album).unwrap();
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            fs::write(album.join(name), b"fake").unwrap();
        }

        let catalog = scanner().scan(dir.path()).unwrap();
        let names: Vec<_> = catalog.iter().map(|i| i.file_name.clone()).collect();
        assert_eq!(names, ["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn scan_duplicate_names_across_albums() {
        let dir = TempDir::new().unwrap();
        for album in ["A", "B"] {
            let p = dir.path().join(album);
            fs::create_dir(&p).unwrap();
            fs::write(p.join("same.jpg"), b"fake").unwrap();
        }

        let catalog = scanner().scan(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("same.jpg").unwrap().containing_folder,
            dir.path().join("B")
        );
    }

    #[test]
    fn scan_missing_root_is_error() {
        let err = scanner().scan(Path::new("/nonexistent/library/root")).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot read media folder"));
    }

    #[test]
    fn scan_logs_summary() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("Empty")).unwrap();
        let (sink, log) = capture(targets::SCANNER);

        let catalog = Scanner::new(log).scan(dir.path()).unwrap();
        assert!(catalog.is_empty());
        assert!(sink.contains(log::Level::Info, "Scanning folder"));
        assert!(sink.contains(log::Level::Info, "Found 0 media files."));
    }

    #[cfg(unix)]
    #[test]
    fn scan_skips_unreadable_album() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let open = dir.path().join("Open");
        let locked = dir.path().join("Locked");
        fs::create_dir(&open).unwrap();
        fs::create_dir(&locked).unwrap();
        fs::write(open.join("ok.jpg"), b"fake").unwrap();
        fs::write(locked.join("hidden.jpg"), b"fake").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // root can bypass permissions; only assert when the lock took effect
        let locked_out = fs::read_dir(&locked).is_err();
        let (sink, log) = capture(targets::SCANNER);
        let catalog = Scanner::new(log).scan(dir.path()).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(catalog.get("ok.jpg").is_some());
        if locked_out {
            assert!(catalog.get("hidden.jpg").is_none());
            assert!(sink.contains(log::Level::Warn, "Skipping unreadable entry"));
        }
    }
}
