//! In-memory browser used by the unit tests.
//!
//! Elements are registered per selector, either on every page or on one URL.
//! The follower list is simulated as a sequence of rendered batches: after `k`
//! scrolls the batch `min(k, last)` is rendered and the scroll extent is
//! `extents[min(k, last)]`.

use crate::collector::{SCROLL_EXTENT_JS, SCROLL_TO_BOTTOM_JS};
use crate::config::{Config, Credentials};
use crate::driver::{Driver, DriverResult, Selector, WebElement};
use crate::error::DriverError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration with zero waits, writing artifacts under `dir`.
pub(crate) fn fast_config(dir: &Path) -> Config {
    Config {
        credentials: Credentials {
            username: "scout".to_string(),
            password: "hunter2".to_string(),
            target: "quark.cr".to_string(),
        },
        element_timeout: Duration::ZERO,
        login_settle: Duration::ZERO,
        scroll_settle: Duration::ZERO,
        profile_settle: Duration::ZERO,
        sleep_between_profiles: (0.0, 0.0),
        output_dir: dir.join("out"),
        artifacts_dir: dir.join("artifacts"),
        ..Config::default()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeNode {
    attrs: HashMap<String, String>,
    text: String,
    stale: bool,
}

impl FakeNode {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn link(href: &str) -> Self {
        Self::new().with_attr("href", href)
    }

    /// A node whose every read fails with a stale reference.
    pub(crate) fn stale() -> Self {
        Self {
            stale: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    current_url: String,
    visited: Vec<String>,
    global: HashMap<String, Vec<FakeNode>>,
    pages: HashMap<String, HashMap<String, Vec<FakeNode>>>,
    follower_selector: Option<String>,
    follower_batches: Vec<Vec<FakeNode>>,
    extents: Vec<u64>,
    scrolls: usize,
    navigation_timeouts: HashSet<String>,
    events: Vec<String>,
}

impl FakeState {
    fn rendered(&self, key: &str) -> Vec<FakeNode> {
        if self.follower_selector.as_deref() == Some(key) && !self.follower_batches.is_empty() {
            let idx = self.scrolls.min(self.follower_batches.len() - 1);
            return self.follower_batches[idx].clone();
        }
        if let Some(nodes) = self
            .pages
            .get(&self.current_url)
            .and_then(|page| page.get(key))
        {
            return nodes.clone();
        }
        self.global.get(key).cloned().unwrap_or_default()
    }

    fn extent(&self) -> u64 {
        if self.extents.is_empty() {
            return 0;
        }
        self.extents[self.scrolls.min(self.extents.len() - 1)]
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `node` under `selector` on every page.
    pub(crate) fn with_element(self, selector: &Selector, node: FakeNode) -> Self {
        self.state
            .lock()
            .unwrap()
            .global
            .entry(selector.to_string())
            .or_default()
            .push(node);
        self
    }

    /// Registers `node` under `selector` on the page at `url` only.
    pub(crate) fn with_page_element(self, url: &str, selector: &Selector, node: FakeNode) -> Self {
        self.state
            .lock()
            .unwrap()
            .pages
            .entry(url.to_string())
            .or_default()
            .entry(selector.to_string())
            .or_default()
            .push(node);
        self
    }

    pub(crate) fn with_follower_batches(
        self,
        selector: &Selector,
        batches: Vec<Vec<FakeNode>>,
        extents: Vec<u64>,
    ) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.follower_selector = Some(selector.to_string());
            state.follower_batches = batches;
            state.extents = extents;
        }
        self
    }

    /// Loading `url` fails with a timeout.
    pub(crate) fn with_navigation_timeout(self, url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .navigation_timeouts
            .insert(url.to_string());
        self
    }

    pub(crate) fn scrolls(&self) -> usize {
        self.state.lock().unwrap().scrolls
    }

    pub(crate) fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }

    fn element(&self, key: String, node: FakeNode) -> FakeElement {
        FakeElement {
            key,
            node,
            driver: self.clone(),
        }
    }

    fn lookup(&self, selector: &Selector) -> Vec<FakeElement> {
        let key = selector.to_string();
        let nodes = self.state.lock().unwrap().rendered(&key);
        nodes
            .into_iter()
            .map(|node| self.element(key.clone(), node))
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct FakeElement {
    key: String,
    node: FakeNode,
    driver: FakeDriver,
}

impl FakeElement {
    fn check(&self) -> DriverResult<()> {
        if self.node.stale {
            Err(DriverError::StaleElement)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WebElement for FakeElement {
    async fn attr(&self, name: &str) -> DriverResult<Option<String>> {
        self.check()?;
        Ok(self.node.attrs.get(name).cloned())
    }

    async fn text(&self) -> DriverResult<String> {
        self.check()?;
        Ok(self.node.text.clone())
    }

    async fn click(&self) -> DriverResult<()> {
        self.check()?;
        self.driver.record(format!("click {}", self.key));
        Ok(())
    }

    async fn clear(&self) -> DriverResult<()> {
        self.check()?;
        self.driver.record(format!("clear {}", self.key));
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> DriverResult<()> {
        self.check()?;
        self.driver.record(format!("type {} {}", self.key, text));
        Ok(())
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.visited.push(url.to_string());
        if state.navigation_timeouts.contains(url) {
            return Err(DriverError::Timeout(url.to_string()));
        }
        state.current_url = url.to_string();
        Ok(())
    }

    async fn find_element(&self, selector: &Selector) -> DriverResult<FakeElement> {
        self.lookup(selector)
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::NoSuchElement(selector.to_string()))
    }

    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<FakeElement>> {
        Ok(self.lookup(selector))
    }

    async fn execute_script(&self, script: &str, _args: &[&FakeElement]) -> DriverResult<Value> {
        let mut state = self.state.lock().unwrap();
        if script == SCROLL_TO_BOTTOM_JS {
            state.scrolls += 1;
            state.events.push("scroll".to_string());
            Ok(Value::Null)
        } else if script == SCROLL_EXTENT_JS {
            Ok(Value::from(state.extent()))
        } else {
            Ok(Value::Null)
        }
    }

    async fn wait_until(&self, selector: &Selector, _timeout: Duration) -> DriverResult<FakeElement> {
        self.lookup(selector)
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::Timeout(selector.to_string()))
    }

    async fn save_screenshot(&self, path: &Path) -> DriverResult<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("screenshot {}", name));
        std::fs::write(path, b"\x89PNG").map_err(|e| DriverError::Other(e.to_string()))
    }

    async fn quit(&self) -> DriverResult<()> {
        self.record("quit".to_string());
        Ok(())
    }
}
