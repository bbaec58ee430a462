//! Browser automation boundary.
//!
//! The crawl logic only talks to the [`Driver`] and [`WebElement`] traits, so any
//! automation backend exposing navigation, element lookup, bounded waits, script
//! execution and screenshots can drive it. [`WebDriverSession`] is the production
//! backend, speaking the W3C WebDriver protocol through `fantoccini`.

use crate::error::{AppError, DriverError};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::{CmdError, ErrorStatus};
use fantoccini::wd::TimeoutConfiguration;
use fantoccini::{Client, ClientBuilder, Locator};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub(crate) type DriverResult<T> = std::result::Result<T, DriverError>;

/// A DOM query, either CSS or XPath.
///
/// Deserializes from `{ css = "..." }` or `{ xpath = "..." }` in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Selector {
    Css(String),
    Xpath(String),
}

impl Selector {
    pub(crate) fn css(query: impl Into<String>) -> Self {
        Selector::Css(query.into())
    }

    pub(crate) fn xpath(query: impl Into<String>) -> Self {
        Selector::Xpath(query.into())
    }

    /// Matches a `button` whose whitespace-normalized visible text equals `label`.
    pub(crate) fn button_with_text(label: &str) -> Self {
        Selector::Xpath(format!(
            "//button[normalize-space()={}]",
            xpath_literal(label)
        ))
    }

    fn locator(&self) -> Locator<'_> {
        match self {
            Selector::Css(query) => Locator::Css(query),
            Selector::Xpath(query) => Locator::XPath(query),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(query) => write!(f, "css `{}`", query),
            Selector::Xpath(query) => write!(f, "xpath `{}`", query),
        }
    }
}

/// Quotes `text` as an XPath string literal. XPath 1.0 has no escape sequences,
/// so text containing both quote kinds is assembled with `concat()`.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// An element handle returned by a [`Driver`].
#[async_trait]
pub(crate) trait WebElement: Send + Sync {
    async fn attr(&self, name: &str) -> DriverResult<Option<String>>;
    async fn text(&self) -> DriverResult<String>;
    async fn click(&self) -> DriverResult<()>;
    async fn clear(&self) -> DriverResult<()>;
    async fn send_keys(&self, text: &str) -> DriverResult<()>;
}

/// The capability set the crawl needs from a browser.
#[async_trait]
pub(crate) trait Driver: Send + Sync {
    type Element: WebElement;

    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Looks the element up once, without waiting.
    async fn find_element(&self, selector: &Selector) -> DriverResult<Self::Element>;

    /// Returns every currently rendered match; an empty list is not an error.
    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<Self::Element>>;

    /// Runs `script` in the page with `args` bound to `arguments[0..]`.
    async fn execute_script(&self, script: &str, args: &[&Self::Element])
    -> DriverResult<Value>;

    /// Polls until `selector` matches, failing with [`DriverError::Timeout`].
    async fn wait_until(&self, selector: &Selector, timeout: Duration)
    -> DriverResult<Self::Element>;

    async fn save_screenshot(&self, path: &Path) -> DriverResult<()>;

    async fn quit(&self) -> DriverResult<()>;
}

/// Chrome flags applied to every session; `--headless=new` is prepended on demand.
const CHROME_ARGS: &[&str] = &[
    "--disable-notifications",
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--window-size=1280,900",
];

/// A Chrome session driven through a running WebDriver server (chromedriver).
#[derive(Debug, Clone)]
pub(crate) struct WebDriverSession {
    client: Client,
}

impl WebDriverSession {
    /// Connects to the WebDriver server at `webdriver_url` and opens a Chrome session.
    ///
    /// Page loads taking longer than `page_load` fail with a timeout.
    pub(crate) async fn connect(
        webdriver_url: &str,
        headless: bool,
        page_load: Duration,
    ) -> Result<Self, AppError> {
        let mut args: Vec<&str> = Vec::with_capacity(CHROME_ARGS.len() + 1);
        if headless {
            args.push("--headless=new");
        }
        args.extend_from_slice(CHROME_ARGS);

        let mut caps = serde_json::map::Map::new();
        caps.insert("browserName".to_string(), serde_json::json!("chrome"));
        caps.insert(
            "goog:chromeOptions".to_string(),
            serde_json::json!({ "args": args }),
        );

        tracing::debug!(target: "driver", "Connecting to WebDriver at {}...", webdriver_url);
        let mut builder = ClientBuilder::native();
        let builder = builder.capabilities(caps);
        let client = match builder.connect(webdriver_url).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(target: "driver", "Failed to connect to WebDriver at {}: {}", webdriver_url, e);
                return Err(AppError::Session(format!(
                    "could not open a browser session at {}: {}",
                    webdriver_url, e
                )));
            }
        };

        if let Err(e) = client.update_timeouts(session_timeouts(page_load)).await {
            let _ = client.clone().close().await;
            return Err(AppError::Session(format!(
                "could not set the page load timeout: {}",
                e
            )));
        }

        tracing::info!(target: "driver", "WebDriver session established (headless: {})", headless);
        Ok(Self { client })
    }
}

/// Bounds page loads; scripts and implicit waits keep the server defaults.
fn session_timeouts(page_load: Duration) -> TimeoutConfiguration {
    TimeoutConfiguration::new(None, Some(page_load), None)
}

/// Maps a fantoccini command error onto the boundary's error kinds.
fn classify(err: CmdError, selector: Option<&Selector>) -> DriverError {
    let what = || selector.map_or_else(|| "page".to_string(), |s| s.to_string());
    match err {
        CmdError::WaitTimeout => DriverError::Timeout(what()),
        CmdError::Standard(e) => match e.error {
            ErrorStatus::NoSuchElement => DriverError::NoSuchElement(what()),
            ErrorStatus::StaleElementReference => DriverError::StaleElement,
            ErrorStatus::Timeout | ErrorStatus::ScriptTimeout => {
                DriverError::Timeout(format!("{} ({})", what(), e.message))
            }
            ErrorStatus::JavascriptError => DriverError::Script(e.message.to_string()),
            _ => DriverError::Other(e.to_string()),
        },
        other => DriverError::Other(other.to_string()),
    }
}

/// An element living in a [`WebDriverSession`].
#[derive(Debug, Clone)]
pub(crate) struct RemoteElement(Element);

#[async_trait]
impl WebElement for RemoteElement {
    async fn attr(&self, name: &str) -> DriverResult<Option<String>> {
        self.0.attr(name).await.map_err(|e| classify(e, None))
    }

    async fn text(&self) -> DriverResult<String> {
        self.0.text().await.map_err(|e| classify(e, None))
    }

    async fn click(&self) -> DriverResult<()> {
        self.0.click().await.map_err(|e| classify(e, None))
    }

    async fn clear(&self) -> DriverResult<()> {
        self.0.clear().await.map_err(|e| classify(e, None))
    }

    async fn send_keys(&self, text: &str) -> DriverResult<()> {
        self.0.send_keys(text).await.map_err(|e| classify(e, None))
    }
}

#[async_trait]
impl Driver for WebDriverSession {
    type Element = RemoteElement;

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        tracing::debug!(target: "driver", "GET {}", url);
        self.client.goto(url).await.map_err(|e| match classify(e, None) {
            DriverError::Timeout(_) => DriverError::Timeout(url.to_string()),
            other => other,
        })
    }

    async fn find_element(&self, selector: &Selector) -> DriverResult<RemoteElement> {
        self.client
            .find(selector.locator())
            .await
            .map(RemoteElement)
            .map_err(|e| classify(e, Some(selector)))
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<RemoteElement>> {
        self.client
            .find_all(selector.locator())
            .await
            .map(|elements| elements.into_iter().map(RemoteElement).collect())
            .map_err(|e| classify(e, Some(selector)))
    }

    async fn execute_script(&self, script: &str, args: &[&RemoteElement]) -> DriverResult<Value> {
        let args = args
            .iter()
            .map(|el| serde_json::to_value(&el.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DriverError::Script(format!("unserializable script argument: {}", e)))?;
        self.client
            .execute(script, args)
            .await
            .map_err(|e| classify(e, None))
    }

    async fn wait_until(&self, selector: &Selector, timeout: Duration) -> DriverResult<RemoteElement> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(selector.locator())
            .await
            .map(RemoteElement)
            .map_err(|e| classify(e, Some(selector)))
    }

    async fn save_screenshot(&self, path: &Path) -> DriverResult<()> {
        let png = self.client.screenshot().await.map_err(|e| classify(e, None))?;
        tokio::fs::write(path, png)
            .await
            .map_err(|e| DriverError::Other(format!("writing {}: {}", path.display(), e)))
    }

    async fn quit(&self) -> DriverResult<()> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| classify(e, None))
    }
}
