//! # Archive extraction
//!
//! Unpacks an inbound zip archive next to itself so the partitioner can pick up
//! its files. Entries whose name starts with the metadata prefix (`__` by
//! default, e.g. `__MACOSX/`) are archive tooling artifacts and are skipped.
//!
//! ```rust
//! use batch_import::extract::{ArchiveExtractor, ZipExtractor};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), batch_import::BatchError> {
//! let extractor = ZipExtractor::new();
//! let files = extractor.extract(Path::new("/tmp/inbound/customers.zip"))?;
//! for file in &files {
//!     println!("extracted {}", file.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use log::{debug, info};
use zip::ZipArchive;

use crate::BatchError;

/// Prefix of archive entries that carry tooling metadata rather than data.
pub const DEFAULT_METADATA_PREFIX: &str = "__";

/// Extracts an archive into the directory that contains it.
pub trait ArchiveExtractor: Sync {
    /// Returns the written files in archive entry order.
    ///
    /// Extraction is not transactional: files written before a failure stay
    /// on disk.
    fn extract(&self, archive: &Path) -> Result<Vec<PathBuf>, BatchError>;
}

#[derive(Debug, Clone)]
pub struct ZipExtractor {
    metadata_prefix: String,
}

impl Default for ZipExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipExtractor {
    pub fn new() -> Self {
        Self {
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
        }
    }

    /// Sets the prefix of entries to skip.
    pub fn metadata_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.metadata_prefix = prefix.into();
        self
    }

    fn is_metadata(&self, name: &str) -> bool {
        !self.metadata_prefix.is_empty() && name.starts_with(&self.metadata_prefix)
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path) -> Result<Vec<PathBuf>, BatchError> {
        let failure = |reason: String| BatchError::Extraction {
            archive: archive.to_path_buf(),
            reason,
        };

        info!("Extracting archive {}", archive.display());

        let target_dir = archive
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let file = File::open(archive).map_err(|e| failure(e.to_string()))?;
        let mut zip = ZipArchive::new(file).map_err(|e| failure(e.to_string()))?;

        let mut extracted = Vec::new();

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| failure(e.to_string()))?;
            let name = entry.name().to_string();

            if self.is_metadata(&name) {
                debug!("Skipping metadata entry {}", name);
                continue;
            }
            if entry.is_dir() {
                debug!("Skipping directory entry {}", name);
                continue;
            }

            let relative = entry
                .enclosed_name()
                .ok_or_else(|| failure(format!("entry {name} escapes the target directory")))?;
            let target = target_dir.join(relative);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    failure(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }

            let mut output = File::create(&target)
                .map_err(|e| failure(format!("cannot create {}: {}", target.display(), e)))?;
            io::copy(&mut entry, &mut output)
                .map_err(|e| failure(format!("cannot write {}: {}", target.display(), e)))?;

            debug!("Extracted {} -> {}", name, target.display());
            extracted.push(target);
        }

        info!(
            "Extracted {} file(s) from {}",
            extracted.len(),
            archive.display()
        );

        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;
    use zip::{ZipWriter, write::SimpleFileOptions};

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn skips_metadata_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("batch.zip");
        write_zip(&archive, &[("a.txt", "alpha"), ("__MACOSX/b.txt", "meta")]);

        let files = ZipExtractor::new().extract(&archive).unwrap();

        assert_eq!(files, vec![temp_dir.path().join("a.txt")]);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "alpha");
        assert!(!temp_dir.path().join("__MACOSX").exists());
    }

    #[test]
    fn keeps_entry_order_and_creates_nested_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("batch.zip");
        write_zip(&archive, &[("z.csv", "z"), ("nested/a.csv", "a")]);

        let files = ZipExtractor::new().extract(&archive).unwrap();

        assert_eq!(
            files,
            vec![
                temp_dir.path().join("z.csv"),
                temp_dir.path().join("nested").join("a.csv")
            ]
        );
        assert!(files[1].exists());
    }

    #[test]
    fn overwrites_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.csv"), "old").unwrap();
        let archive = temp_dir.path().join("batch.zip");
        write_zip(&archive, &[("a.csv", "new")]);

        ZipExtractor::new().extract(&archive).unwrap();

        assert_eq!(fs::read_to_string(temp_dir.path().join("a.csv")).unwrap(), "new");
    }

    #[test]
    fn custom_metadata_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("batch.zip");
        write_zip(&archive, &[(".hidden", "h"), ("__kept.csv", "k")]);

        let files = ZipExtractor::new()
            .metadata_prefix(".")
            .extract(&archive)
            .unwrap();

        assert_eq!(files, vec![temp_dir.path().join("__kept.csv")]);
    }

    #[test]
    fn invalid_archive_is_an_extraction_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        fs::write(&archive, "this is not a zip file").unwrap();

        let result = ZipExtractor::new().extract(&archive);

        assert!(matches!(result, Err(BatchError::Extraction { archive: a, .. }) if a == archive));
    }

    #[test]
    fn missing_archive_is_an_extraction_error() {
        let temp_dir = TempDir::new().unwrap();

        let result = ZipExtractor::new().extract(&temp_dir.path().join("missing.zip"));

        assert!(matches!(result, Err(BatchError::Extraction { .. })));
    }
}
