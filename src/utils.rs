//! Utility functions shared by the registry and checkpoint store

use std::fs;
use std::path::Path;

use chrono::Local;

use crate::error::Result;

/// Timestamp format used for `time_ran` and response history entries
pub const TIMESTAMP_FORMAT: &str = "%d %b %Y, %H:%M";

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn timestamp_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Compact timestamp safe for directory names
pub fn path_stamp_now() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// File I/O utilities
pub mod io {
    use super::*;

    /// Ensure directory exists
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Write through a sibling temp file and rename, so readers never see a
    /// half-written file
    pub fn write_file_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);

        fs::write(&temp_path, content)?;
        fs::rename(temp_path, path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        io::write_file_atomic(&path, b"first").unwrap();
        io::write_file_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("meta.json.tmp").exists());
    }

    #[test]
    fn test_timestamp_shape() {
        // "16 Oct 2026, 09:05"
        let stamp = timestamp_now();
        assert_eq!(stamp.len(), 18);
        assert!(stamp.contains(", "));
    }
}
