//! Defines the core data structures used in the follower-mail application.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// An account identifier, usable as a URL path segment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub(crate) struct Handle(String);

impl Handle {
    /// Returns `None` for blank input or input that is not a single path segment.
    pub(crate) fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return None;
        }
        Some(Handle(trimmed.to_string()))
    }

    /// Derives the handle from a profile link: the path segment preceding the
    /// trailing slash (`https://site/jane.doe/` → `jane.doe`). Relative links are
    /// resolved against `base`.
    pub(crate) fn from_href(href: &str, base: &Url) -> Option<Self> {
        let url = base.join(href.trim()).ok()?;
        let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
        Handle::new(segment)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the profile URL of `account` under the site root.
pub(crate) fn profile_url(base: &Url, account: &str) -> Result<Url, url::ParseError> {
    base.join(&format!("{}/", account))
}

/// Why a follower collection pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// The configured follower cap was reached.
    CapReached,
    /// The list stopped growing for the configured number of scrolls.
    Stalled,
    /// The pass could not run; the set is empty and says nothing about the
    /// real follower count.
    Failed(String),
}

/// The unique handles gathered by one collection pass, in discovery order.
#[derive(Debug, Clone)]
pub(crate) struct FollowerSet {
    handles: Vec<Handle>,
    stop_reason: StopReason,
}

impl FollowerSet {
    /// Keeps the first occurrence of every handle.
    pub(crate) fn new(handles: impl IntoIterator<Item = Handle>, stop_reason: StopReason) -> Self {
        let mut seen = HashSet::new();
        let handles = handles
            .into_iter()
            .filter(|h| seen.insert(h.clone()))
            .collect();
        Self {
            handles,
            stop_reason,
        }
    }

    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self {
            handles: Vec::new(),
            stop_reason: StopReason::Failed(reason.into()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Handle> {
        self.handles.iter()
    }

    pub(crate) fn stop_reason(&self) -> &StopReason {
        &self.stop_reason
    }
}

/// The output of one run, serialized exactly once by the sink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct CrawlReport {
    timestamp: String,
    target: String,
    total_followers_processed: usize,
    total_emails_found: usize,
    emails: Vec<String>,
}

impl CrawlReport {
    /// Repeated addresses keep their first position only.
    pub(crate) fn new(
        timestamp: String,
        target: &str,
        followers_processed: usize,
        emails: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let emails: Vec<String> = emails
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .collect();
        Self {
            timestamp,
            target: target.to_string(),
            total_followers_processed: followers_processed,
            total_emails_found: emails.len(),
            emails,
        }
    }

    pub(crate) fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn followers_processed(&self) -> usize {
        self.total_followers_processed
    }

    pub(crate) fn emails(&self) -> &[String] {
        &self.emails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.instagram.com/").unwrap()
    }

    #[test]
    fn test_handle_from_absolute_href() {
        let handle = Handle::from_href("https://www.instagram.com/jane.doe/", &base()).unwrap();
        assert_eq!(handle.as_str(), "jane.doe");
    }

    #[test]
    fn test_handle_from_relative_href() {
        assert_eq!(
            Handle::from_href("/quark_cr/", &base()).unwrap().as_str(),
            "quark_cr"
        );
        assert_eq!(
            Handle::from_href("/no_slash", &base()).unwrap().as_str(),
            "no_slash"
        );
    }

    #[test]
    fn test_handle_rejects_empty() {
        assert!(Handle::from_href("/", &base()).is_none());
        assert!(Handle::from_href("", &base()).is_none());
        assert!(Handle::new("   ").is_none());
        assert!(Handle::new("a/b").is_none());
    }

    #[test]
    fn test_profile_url() {
        assert_eq!(
            profile_url(&base(), "jane").unwrap().as_str(),
            "https://www.instagram.com/jane/"
        );
    }

    #[test]
    fn test_follower_set_dedups_in_order() {
        let handles = ["b", "a", "b", "c"].iter().filter_map(|h| Handle::new(h));
        let set = FollowerSet::new(handles, StopReason::Stalled);
        let names: Vec<&str> = set.iter().map(Handle::as_str).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(set.stop_reason(), &StopReason::Stalled);
    }

    #[test]
    fn test_report_counts_and_serialized_keys() {
        let report = CrawlReport::new(
            "20240101_120000".to_string(),
            "quark.cr",
            3,
            vec![
                "a@x.com".to_string(),
                "b@y.org".to_string(),
                "a@x.com".to_string(),
            ],
        );
        assert_eq!(report.emails(), ["a@x.com", "b@y.org"]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["timestamp"], "20240101_120000");
        assert_eq!(json["target"], "quark.cr");
        assert_eq!(json["total_followers_processed"], 3);
        assert_eq!(json["total_emails_found"], 2);
        assert_eq!(json["emails"][1], "b@y.org");
    }
}
