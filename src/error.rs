//! Defines the custom error types for the follower-mail application.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// Failures reported by the browser automation boundary.
///
/// Backends map their native errors into these kinds so the crawl logic can
/// decide which failures are per-item noise and which end an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum DriverError {
    /// A bounded wait expired before its condition held.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The element was detached from the DOM between lookup and use.
    #[error("stale element reference")]
    StaleElement,

    /// No element matched the selector.
    #[error("no element matches {0}")]
    NoSuchElement(String),

    /// A script evaluated in the page failed or returned an unexpected value.
    #[error("script error: {0}")]
    Script(String),

    /// Any other backend failure (lost session, protocol error, ...).
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }

    pub(crate) fn is_stale(&self) -> bool {
        matches!(self, DriverError::StaleElement)
    }
}

/// The primary error type for the crawl.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error parsing the TOML configuration file.
    #[error("TOML Error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Error reported by the browser automation backend.
    #[error("Browser Error: {0}")]
    Driver(#[from] DriverError),

    /// The WebDriver session could not be created.
    #[error("Session Error: {0}")]
    Session(String),

    /// Logging in did not reach an authenticated state.
    #[error("Authentication Error: {0}")]
    Auth(String),
}

impl AppError {
    /// Whether the failure was a bounded wait or page load running out of time.
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, AppError::Driver(e) if e.is_timeout())
    }
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
