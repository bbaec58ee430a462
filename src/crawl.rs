//! Runs one crawl end to end: login, follower collection, bio extraction and
//! report persistence.

use crate::collector::collect_followers;
use crate::config::Config;
use crate::driver::Driver;
use crate::error::Result;
use crate::extractor::extract_emails;
use crate::models::{CrawlReport, StopReason};
use crate::session::authenticate;
use crate::sink::{format_timestamp, persist_report};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

/// A persisted crawl.
#[derive(Debug)]
pub(crate) struct CrawlOutcome {
    pub report: CrawlReport,
    pub path: PathBuf,
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar
}

/// Runs the crawl against an already opened browser.
///
/// Authentication failures propagate; a failed follower collection degrades to
/// an empty report. Closing the browser is left to the caller.
pub(crate) async fn run_crawl<D: Driver>(driver: &D, config: &Config) -> Result<CrawlOutcome> {
    let target = config.credentials.target.as_str();
    let session = authenticate(driver, config).await?;

    let followers = collect_followers(&session, config, target, &config.collector_policy()).await;
    match followers.stop_reason() {
        StopReason::Failed(reason) => tracing::warn!(
            "Follower collection for {} failed ({}); the follower count is unknown",
            target,
            reason
        ),
        _ if followers.is_empty() => tracing::info!("{} shows no followers", target),
        _ => {}
    }

    let progress = progress_bar(followers.len());
    let extraction = extract_emails(&session, config, &followers, &progress).await;
    progress.finish_with_message("Extraction complete");

    let report = CrawlReport::new(
        format_timestamp(Local::now()),
        target,
        extraction.processed,
        extraction.emails,
    );
    let path = persist_report(&report, &config.output_dir, &config.report_prefix)?;

    tracing::info!("Final Results:");
    tracing::info!("Total Followers Processed: {}", report.followers_processed());
    tracing::info!("Total Emails Found: {}", report.emails().len());
    tracing::info!("Emails: {:?}", report.emails());

    Ok(CrawlOutcome { report, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::fake_driver::{FakeDriver, FakeNode, fast_config};

    fn site(config: &Config) -> FakeDriver {
        let s = &config.selectors;
        FakeDriver::new()
            .with_element(&s.username_input, FakeNode::new())
            .with_element(&s.password_input, FakeNode::new())
            .with_element(&s.submit_button, FakeNode::new())
    }

    #[tokio::test]
    async fn test_full_crawl_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let s = &config.selectors;
        let driver = site(&config)
            .with_element(&s.login_landmark, FakeNode::new())
            .with_element(&s.followers_link, FakeNode::new())
            .with_element(&s.followers_modal, FakeNode::new())
            .with_follower_batches(
                &s.follower_entry,
                vec![vec![
                    FakeNode::link("/jane/"),
                    FakeNode::link("/joe/"),
                    FakeNode::link("/jill/"),
                ]],
                vec![400],
            )
            .with_page_element(
                "https://www.instagram.com/jane/",
                &s.bio,
                FakeNode::new().with_text("contact me at jane.doe@example.com or junk@@bad"),
            )
            .with_page_element(
                "https://www.instagram.com/joe/",
                &s.bio,
                FakeNode::new().with_text("no email"),
            )
            .with_page_element(
                "https://www.instagram.com/jill/",
                &s.bio,
                FakeNode::new().with_text("jane.doe@example.com / jill@shop.co"),
            );

        let outcome = run_crawl(&driver, &config).await.unwrap();
        assert_eq!(outcome.report.target(), "quark.cr");
        assert_eq!(outcome.report.followers_processed(), 3);
        assert_eq!(
            outcome.report.emails(),
            ["jane.doe@example.com", "jill@shop.co"]
        );
        assert!(outcome.path.starts_with(dir.path().join("out")));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&outcome.path).unwrap()).unwrap();
        assert_eq!(written["total_emails_found"], 2);
    }

    #[tokio::test]
    async fn test_login_failure_aborts_before_collection() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let driver = site(&config);

        let err = run_crawl(&driver, &config).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
        assert_eq!(driver.visited().len(), 1);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_failed_collection_still_reports() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(dir.path());
        let driver = site(&config).with_element(&config.selectors.login_landmark, FakeNode::new());

        let outcome = run_crawl(&driver, &config).await.unwrap();
        assert_eq!(outcome.report.followers_processed(), 0);
        assert!(outcome.report.emails().is_empty());
        assert!(outcome.path.exists());
    }
}
