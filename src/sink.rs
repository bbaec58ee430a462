//! Writes run artifacts: the JSON crawl report and diagnostic screenshots.

use crate::driver::Driver;
use crate::error::Result;
use crate::models::CrawlReport;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Timestamp embedded in report and screenshot file names.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub(crate) fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn report_file_name(prefix: &str, timestamp: &str, attempt: usize) -> String {
    if attempt == 0 {
        format!("{}_{}.json", prefix, timestamp)
    } else {
        format!("{}_{}_{}.json", prefix, timestamp, attempt)
    }
}

/// Serializes `report` into a new file under `dir` named after its timestamp.
///
/// Existing files are never overwritten: when the name is taken, `_1`, `_2`, ...
/// is appended.
pub(crate) fn persist_report(report: &CrawlReport, dir: &Path, prefix: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut attempt = 0;
    let (path, file) = loop {
        let path = dir.join(report_file_name(prefix, report.timestamp(), attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => break (path, file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!("{} already exists, trying the next name", path.display());
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    tracing::info!("Results saved to {}", path.display());
    Ok(path)
}

/// Reads back the report generated at `timestamp`.
pub(crate) fn load_report(dir: &Path, prefix: &str, timestamp: &str) -> Result<CrawlReport> {
    let path = dir.join(report_file_name(prefix, timestamp, 0));
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Saves a screenshot named `error_{category}_{timestamp}.png` under `dir`.
///
/// Failures are logged and swallowed so they never mask the error being
/// diagnosed.
pub(crate) async fn save_error_screenshot<D: Driver>(
    driver: &D,
    category: &str,
    dir: &Path,
) -> Option<PathBuf> {
    if let Err(e) = fs::create_dir_all(dir) {
        tracing::warn!("Cannot create screenshot directory {}: {}", dir.display(), e);
        return None;
    }
    let path = dir.join(format!(
        "error_{}_{}.png",
        category,
        format_timestamp(Local::now())
    ));
    match driver.save_screenshot(&path).await {
        Ok(()) => {
            tracing::info!("Error screenshot saved as {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("Could not capture {} screenshot: {}", category, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_driver::FakeDriver;
    use chrono::TimeZone;

    fn report(timestamp: &str) -> CrawlReport {
        CrawlReport::new(
            timestamp.to_string(),
            "quark.cr",
            2,
            vec!["jane.doe@example.com".to_string()],
        )
    }

    #[test]
    fn test_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(at), "20240309_070501");
    }

    #[test]
    fn test_persisted_report_is_retrievable_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let original = report("20240101_120000");
        let path = persist_report(&original, dir.path(), "instagram_results").unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "instagram_results_20240101_120000.json"
        );

        let loaded = load_report(dir.path(), "instagram_results", "20240101_120000").unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_distinct_timestamps_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = persist_report(&report("20240101_120000"), dir.path(), "r").unwrap();
        let second = persist_report(&report("20240101_120001"), dir.path(), "r").unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_existing_report_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = persist_report(&report("20240101_120000"), dir.path(), "r").unwrap();
        let before = fs::read_to_string(&first).unwrap();

        let other = CrawlReport::new("20240101_120000".to_string(), "someone.else", 0, Vec::new());
        let second = persist_report(&other, dir.path(), "r").unwrap();

        assert_eq!(fs::read_to_string(&first).unwrap(), before);
        assert!(second.to_str().unwrap().ends_with("r_20240101_120000_1.json"));
    }

    #[tokio::test]
    async fn test_error_screenshot_is_named_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new();
        let path = save_error_screenshot(&driver, "login_error", dir.path())
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("error_login_error_"));
        assert!(name.ends_with(".png"));
        assert!(path.exists());
    }
}
