//! Harvests follower handles from the site's followers dialog.
//!
//! The dialog is an infinitely scrolling, virtualized list: only a window of rows
//! is rendered at any time and rows are recycled while scrolling. The collector
//! alternates between reading the rendered rows and scrolling the list, and
//! stops once the cap is reached or the list stops growing. The site exposes no
//! end-of-list signal, so "stopped growing" means the scroll extent did not
//! change for `stall_threshold` consecutive scrolls.

use crate::config::Config;
use crate::driver::{Driver, DriverResult, WebElement};
use crate::error::{AppError, DriverError, Result};
use crate::models::{FollowerSet, Handle, StopReason, profile_url};
use crate::session::AuthenticatedSession;
use crate::sink::save_error_screenshot;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

/// Prefixes a script body with `target`: `arguments[0]` when it scrolls itself,
/// otherwise its first scrollable descendant.
macro_rules! scroll_target_script {
    ($body:literal) => {
        concat!(
            "const root = arguments[0];",
            "const scrollable = (el) => el.scrollHeight > el.clientHeight",
            " && getComputedStyle(el).overflowY !== 'visible';",
            "const target = scrollable(root) ? root",
            " : (Array.from(root.querySelectorAll('*')).find(scrollable) || root);",
            $body
        )
    };
}

/// Scrolls the list to its current bottom, which triggers loading the next page.
pub(crate) const SCROLL_TO_BOTTOM_JS: &str =
    scroll_target_script!("target.scrollTop = target.scrollHeight;");

/// Reads the list's current scrollable extent.
pub(crate) const SCROLL_EXTENT_JS: &str = scroll_target_script!("return target.scrollHeight;");

/// The collector's configuration surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CollectorPolicy {
    /// Stop as soon as this many unique handles are recorded.
    pub cap: Option<usize>,
    /// Consecutive scrolls without extent change that end the pass.
    pub stall_threshold: u32,
    /// Pause after each scroll so the next page can render.
    pub scroll_settle: Duration,
    /// Bound for waiting on the profile link, the dialog and the list.
    pub element_timeout: Duration,
}

/// Counts scrolls that did not change the list's extent.
#[derive(Debug)]
struct StallDetector {
    threshold: u32,
    last_extent: u64,
    consecutive_no_growth: u32,
}

impl StallDetector {
    fn new(threshold: u32, baseline: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            last_extent: baseline,
            consecutive_no_growth: 0,
        }
    }

    /// Records the extent measured after a scroll. Returns `true` once the
    /// threshold of consecutive unchanged measurements is reached.
    fn observe(&mut self, extent: u64) -> bool {
        if extent != self.last_extent {
            self.last_extent = extent;
            self.consecutive_no_growth = 0;
            return false;
        }
        self.consecutive_no_growth += 1;
        self.consecutive_no_growth >= self.threshold
    }
}

/// Unique handles in discovery order, bounded by the cap.
struct HandleAccumulator {
    handles: Vec<Handle>,
    seen: HashSet<Handle>,
    cap: Option<usize>,
}

impl HandleAccumulator {
    fn new(cap: Option<usize>) -> Self {
        Self {
            handles: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    /// Returns whether the handle was new.
    fn insert(&mut self, handle: Handle) -> bool {
        if self.is_full() || !self.seen.insert(handle.clone()) {
            return false;
        }
        self.handles.push(handle);
        true
    }

    fn is_full(&self) -> bool {
        self.cap.is_some_and(|cap| self.handles.len() >= cap)
    }

    fn len(&self) -> usize {
        self.handles.len()
    }

    fn finish(self, stop_reason: StopReason) -> FollowerSet {
        FollowerSet::new(self.handles, stop_reason)
    }
}

enum Phase {
    Collecting,
    Scrolling,
    Done(StopReason),
}

/// Collects the followers of `target`.
///
/// Never fails: when the dialog cannot be opened or read, the error is logged,
/// a `followers_error` screenshot is saved and an empty set with
/// [`StopReason::Failed`] is returned. Callers must treat that as an unknown
/// outcome, not as "no followers".
pub(crate) async fn collect_followers<D: Driver>(
    session: &AuthenticatedSession<'_, D>,
    config: &Config,
    target: &str,
    policy: &CollectorPolicy,
) -> FollowerSet {
    let driver = session.driver();
    tracing::info!(target: "collector",
        "Fetching followers for user: {} (logged in as {})", target, session.account()
    );

    match run_collection(driver, config, target, policy).await {
        Ok(followers) => {
            tracing::info!(target: "collector",
                "Successfully collected {} followers of {} ({:?})",
                followers.len(), target, followers.stop_reason()
            );
            followers
        }
        Err(e) => {
            tracing::error!(target: "collector", "Error getting followers of {}: {}", target, e);
            save_error_screenshot(driver, "followers_error", &config.artifacts_dir).await;
            FollowerSet::failed(e.to_string())
        }
    }
}

async fn run_collection<D: Driver>(
    driver: &D,
    config: &Config,
    target: &str,
    policy: &CollectorPolicy,
) -> Result<FollowerSet> {
    let list = open_followers_dialog(driver, config, target, policy).await?;
    let baseline = measure_extent(driver, &list, SCROLL_EXTENT_JS).await?;

    let mut stall = StallDetector::new(policy.stall_threshold, baseline);
    let mut accumulator = HandleAccumulator::new(policy.cap);
    let mut phase = if accumulator.is_full() {
        Phase::Done(StopReason::CapReached)
    } else {
        Phase::Collecting
    };
    let mut scrolls = 0usize;

    let stop_reason = loop {
        phase = match phase {
            Phase::Collecting => {
                let added = harvest_rendered(driver, config, &mut accumulator).await?;
                tracing::info!(target: "collector",
                    "Current number of followers collected: {} (+{})",
                    accumulator.len(), added
                );
                if accumulator.is_full() {
                    tracing::info!(target: "collector", "Reached maximum followers limit: {}", accumulator.len());
                    Phase::Done(StopReason::CapReached)
                } else {
                    Phase::Scrolling
                }
            }
            Phase::Scrolling => {
                driver.execute_script(SCROLL_TO_BOTTOM_JS, &[&list]).await?;
                scrolls += 1;
                sleep(policy.scroll_settle).await;
                let extent = measure_extent(driver, &list, SCROLL_EXTENT_JS).await?;
                tracing::debug!(target: "collector", "Scroll #{}: extent {}", scrolls, extent);
                if stall.observe(extent) {
                    tracing::info!(target: "collector",
                        "Reached end of followers list after {} scrolls", scrolls
                    );
                    Phase::Done(StopReason::Stalled)
                } else {
                    Phase::Collecting
                }
            }
            Phase::Done(reason) => break reason,
        };
    };

    Ok(accumulator.finish(stop_reason))
}

/// Opens the target's followers dialog and returns the element to scroll.
async fn open_followers_dialog<D: Driver>(
    driver: &D,
    config: &Config,
    target: &str,
    policy: &CollectorPolicy,
) -> Result<D::Element> {
    let selectors = &config.selectors;
    let url = profile_url(&config.base_url, target)?;
    driver.navigate(url.as_str()).await?;

    driver
        .wait_until(&selectors.followers_link, policy.element_timeout)
        .await?
        .click()
        .await?;

    let modal = driver
        .wait_until(&selectors.followers_modal, policy.element_timeout)
        .await?;
    tracing::debug!(target: "collector", "Followers dialog open");

    match &selectors.scroll_container {
        Some(container) => Ok(driver.wait_until(container, policy.element_timeout).await?),
        None => Ok(modal),
    }
}

async fn measure_extent<D: Driver>(driver: &D, list: &D::Element, script: &str) -> Result<u64> {
    let value = driver.execute_script(script, &[list]).await?;
    parse_extent(&value).map_err(AppError::from)
}

fn parse_extent(value: &Value) -> DriverResult<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
        .ok_or_else(|| DriverError::Script(format!("expected a scroll extent, got {}", value)))
}

/// Reads the currently rendered follower rows into `accumulator`. Returns the
/// number of new handles. Stops early once the cap is reached.
async fn harvest_rendered<D: Driver>(
    driver: &D,
    config: &Config,
    accumulator: &mut HandleAccumulator,
) -> Result<usize> {
    let entries = driver.find_elements(&config.selectors.follower_entry).await?;
    let mut added = 0;

    for entry in &entries {
        let href = match entry.attr("href").await {
            Ok(Some(href)) => href,
            Ok(None) => continue,
            Err(e) if e.is_stale() => {
                // the row was recycled between the query and the read
                tracing::trace!(target: "collector", "Skipping stale follower row");
                continue;
            }
            Err(e) => {
                tracing::warn!(target: "collector", "Could not read follower row: {}", e);
                continue;
            }
        };

        let Some(handle) = handle_from(&href, &config.base_url) else {
            continue;
        };
        if accumulator.insert(handle) {
            added += 1;
            if accumulator.is_full() {
                break;
            }
        }
    }

    Ok(added)
}

fn handle_from(href: &str, base: &Url) -> Option<Handle> {
    let handle = Handle::from_href(href, base);
    if handle.is_none() {
        tracing::trace!(target: "collector", "No handle in link {}", href);
    }
    handle
}
