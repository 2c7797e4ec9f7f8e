use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

/// `<output_dir>/<YYYYMMDD>/<HHMMSS>.png`
pub fn result_save_path(output_dir: &Path, timestamp: NaiveDateTime) -> PathBuf {
    output_dir
        .join(timestamp.format("%Y%m%d").to_string())
        .join(format!("{}.png", timestamp.format("%H%M%S")))
}

/// Like [`result_save_path`], creating the date directory when it is missing.
pub fn prepare_result_path(output_dir: &Path, timestamp: NaiveDateTime) -> Result<PathBuf> {
    let path = result_save_path(output_dir, timestamp);
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
            tracing::debug!("Created output directory {}", parent.display());
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap()
    }

    #[test]
    fn test_result_save_path_layout() {
        let path = result_save_path(Path::new("out"), timestamp());
        assert_eq!(path, PathBuf::from("out/20240307/090502.png"));
    }

    #[test]
    fn test_prepare_creates_date_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = prepare_result_path(dir.path(), timestamp()).unwrap();
        assert!(dir.path().join("20240307").is_dir());
        assert_eq!(path, dir.path().join("20240307").join("090502.png"));
        assert!(!path.exists());

        // existing directory is fine
        let again = prepare_result_path(dir.path(), timestamp()).unwrap();
        assert_eq!(again, path);
    }
}
