//! Log bundle extraction
//!
//! Users usually hand over logs as an exported ZIP. `extract_zip` unpacks
//! the archive into a fresh temp directory owned by the returned
//! `LogBundle`; dropping the bundle removes the directory, so no separate
//! cleanup pass is needed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::{DoctorError, Result};

/// An extracted log bundle. The backing temp directory lives exactly as
/// long as this value.
pub struct LogBundle {
    dir: TempDir,
}

impl LogBundle {
    /// Path of the extracted content.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Extract a ZIP archive into a temp directory.
///
/// # Errors
/// - `NotFound` when the archive path does not exist
/// - `Load` when the file is not a valid ZIP archive or an entry escapes
///   the extraction root
pub fn extract_zip(zip_path: &Path) -> Result<LogBundle> {
    if !zip_path.exists() {
        return Err(DoctorError::NotFound(format!(
            "archive not found: {}",
            zip_path.display()
        )));
    }

    let file = fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| DoctorError::Load(format!("not a valid ZIP archive: {e}")))?;

    let dir = TempDir::new()?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| DoctorError::Load(format!("corrupt ZIP entry: {e}")))?;

        // enclosed_name rejects absolute paths and `..` traversal.
        let Some(rel) = entry.enclosed_name().map(PathBuf::from) else {
            return Err(DoctorError::Load(format!(
                "ZIP entry '{}' escapes the extraction root",
                entry.name()
            )));
        };
        let target = dir.path().join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }
    }

    debug!(archive = %zip_path.display(), dir = %dir.path().display(), "Extracted log bundle");
    Ok(LogBundle { dir })
}
