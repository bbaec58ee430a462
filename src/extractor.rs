//! Visits follower profiles and pulls validated emails out of their bios.

use crate::config::{Config, random_sleep_duration};
use crate::driver::{Driver, WebElement};
use crate::error::Result;
use crate::models::{FollowerSet, Handle, profile_url};
use crate::patterns::extract_valid_emails;
use crate::session::AuthenticatedSession;
use indicatif::ProgressBar;
use tokio::time::sleep;

/// Emits an info progress line every this many profiles.
const PROGRESS_LOG_INTERVAL: usize = 10;

/// Outcome of one extraction pass over a follower set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Extraction {
    /// Profiles attempted, including the ones that failed.
    pub processed: usize,
    /// Profiles skipped because of a timeout or another error.
    pub failures: usize,
    /// Validated emails in visiting order.
    pub emails: Vec<String>,
}

/// Extracts emails from the bio of every follower in `followers`.
///
/// A profile that times out or fails in any other way contributes nothing; the
/// pass always continues with the next handle.
pub(crate) async fn extract_emails<D: Driver>(
    session: &AuthenticatedSession<'_, D>,
    config: &Config,
    followers: &FollowerSet,
    progress: &ProgressBar,
) -> Extraction {
    let driver = session.driver();
    let total = followers.len();
    let mut extraction = Extraction::default();
    tracing::info!(target: "extractor", "Starting email extraction from {} follower bios", total);

    for handle in followers.iter() {
        extraction.processed += 1;
        if extraction.processed % PROGRESS_LOG_INTERVAL == 0 {
            tracing::info!(target: "extractor", "Processed {}/{} followers", extraction.processed, total);
        }
        progress.set_message(handle.to_string());

        match profile_emails(driver, config, handle).await {
            Ok(found) => {
                for email in found {
                    tracing::info!(target: "extractor", "Found valid email for {}: {}", handle, email);
                    extraction.emails.push(email);
                }
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(target: "extractor", "Timeout while processing follower {}: {}", handle, e);
                extraction.failures += 1;
            }
            Err(e) => {
                tracing::warn!(target: "extractor", "Error processing follower {}: {}", handle, e);
                extraction.failures += 1;
            }
        }

        progress.inc(1);
        sleep(random_sleep_duration(config.sleep_between_profiles)).await;
    }

    tracing::info!(target: "extractor",
        "Email extraction completed. Found {} email addresses ({} profiles skipped)",
        extraction.emails.len(), extraction.failures
    );
    extraction
}

async fn profile_emails<D: Driver>(driver: &D, config: &Config, handle: &Handle) -> Result<Vec<String>> {
    let url = profile_url(&config.base_url, handle.as_str())?;
    driver.navigate(url.as_str()).await?;
    sleep(config.profile_settle).await;

    let bio = read_bio(driver, config).await?;
    tracing::debug!(target: "extractor", "Bio of {}: {:?}", handle, bio);
    Ok(extract_valid_emails(&bio))
}

/// Reads the bio text, falling back to the page's description metadata when
/// the bio element is missing, unreadable or empty.
async fn read_bio<D: Driver>(driver: &D, config: &Config) -> Result<String> {
    let selectors = &config.selectors;
    match driver.find_element(&selectors.bio).await {
        Ok(element) => match element.text().await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => tracing::debug!(target: "extractor", "Bio element is empty, using page description"),
            Err(e) => tracing::debug!(target: "extractor", "Bio text unreadable ({}), using page description", e),
        },
        Err(e) => tracing::debug!(target: "extractor", "Bio element not found ({}), using page description", e),
    }

    let meta = driver
        .wait_until(&selectors.meta_description, config.element_timeout)
        .await?;
    Ok(meta.attr("content").await?.unwrap_or_default())
}
