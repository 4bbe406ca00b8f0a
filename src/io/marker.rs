//! Filesystem-resident completion ledger.
//!
//! A unit of work is complete exactly when its marker file exists. Markers
//! are written only after every artifact of the unit has been validated and
//! they are created atomically (temporary file in the same directory, then
//! rename), so a crash never leaves a marker behind for broken output.

use crate::types::{ArdError, ArdResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

pub const PROCESSED_SUFFIX: &str = "processed";
pub const DOWNLOADED_SUFFIX: &str = "downloaded";

const PROCESSED_LINE: &str = "passed all tests";
const DOWNLOADED_LINE: &str = "successfully downloaded";

/// Marker store rooted at the unit output directories
pub struct MarkerStore;

impl MarkerStore {
    /// `<dir>/.processed`, or `<dir>/.<qualifier>.processed`
    pub fn marker_path<P: AsRef<Path>>(dir: P, qualifier: Option<&str>) -> PathBuf {
        let name = match qualifier {
            Some(q) => format!(".{}.{}", q, PROCESSED_SUFFIX),
            None => format!(".{}", PROCESSED_SUFFIX),
        };
        dir.as_ref().join(name)
    }

    /// `<file>.downloaded` next to a downloaded archive
    pub fn download_marker_path<P: AsRef<Path>>(file: P) -> PathBuf {
        let mut name = file.as_ref().as_os_str().to_os_string();
        name.push(format!(".{}", DOWNLOADED_SUFFIX));
        PathBuf::from(name)
    }

    pub fn is_complete<P: AsRef<Path>>(dir: P, qualifier: Option<&str>) -> bool {
        Self::marker_path(dir, qualifier).is_file()
    }

    pub fn is_downloaded<P: AsRef<Path>>(file: P) -> bool {
        Self::download_marker_path(file).is_file()
    }

    /// Validate `artifacts` and then write the unit's processed marker
    pub fn mark_complete<P: AsRef<Path>>(
        dir: P,
        qualifier: Option<&str>,
        artifacts: &[PathBuf],
    ) -> ArdResult<PathBuf> {
        for artifact in artifacts {
            Self::validate_artifact(artifact)?;
        }
        let marker = Self::marker_path(dir, qualifier);
        Self::write_marker(&marker, PROCESSED_LINE)?;
        log::debug!("Wrote completion marker {}", marker.display());
        Ok(marker)
    }

    /// Validate a downloaded archive's size and write its `.downloaded` marker
    pub fn mark_downloaded<P: AsRef<Path>>(file: P) -> ArdResult<PathBuf> {
        Self::validate_artifact(file.as_ref())?;
        let marker = Self::download_marker_path(file);
        Self::write_marker(&marker, DOWNLOADED_LINE)?;
        Ok(marker)
    }

    /// A file artifact must be non-empty. A directory artifact (DIMAP
    /// `.data`) must hold at least one entry.
    pub fn validate_artifact(path: &Path) -> ArdResult<()> {
        let metadata = std::fs::metadata(path).map_err(|_| ArdError::ArtifactValidation {
            path: path.to_path_buf(),
            reason: "missing".to_string(),
        })?;

        if metadata.is_dir() {
            let mut entries = std::fs::read_dir(path)?;
            if entries.next().is_none() {
                return Err(ArdError::ArtifactValidation {
                    path: path.to_path_buf(),
                    reason: "empty directory".to_string(),
                });
            }
        } else if metadata.len() == 0 {
            return Err(ArdError::ArtifactValidation {
                path: path.to_path_buf(),
                reason: "zero-sized file".to_string(),
            });
        }
        Ok(())
    }

    /// Atomically create `path` holding a single line
    pub fn write_marker(path: &Path, line: &str) -> ArdResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| ArdError::Processing(format!("Marker {} has no parent", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut temp = NamedTempFile::new_in(dir)?;
        writeln!(temp, "{}", line)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| ArdError::Io(e.error))?;
        Ok(())
    }

    /// All processed markers below `root`, sorted
    pub fn list_markers<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
        let suffix = format!(".{}", PROCESSED_SUFFIX);
        let mut markers: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                name.starts_with('.') && name.ends_with(&suffix)
            })
            .map(|entry| entry.into_path())
            .collect();
        markers.sort();
        markers
    }
}
