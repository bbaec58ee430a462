//! Defines the configuration settings for the follower-mail application.

use crate::collector::CollectorPolicy;
use crate::driver::Selector;
use crate::error::{AppError, Result};
use clap::Args;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub(crate) const DEFAULT_REPORT_PREFIX: &str = "instagram_results";

/// Command line arguments for the `crawl` subcommand. Every value overrides the
/// config file.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct CrawlArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "FOLLOWER_MAIL_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Account used to log in
    #[arg(long, env = "FOLLOWER_MAIL_USERNAME")]
    pub username: Option<String>,

    /// Password of the login account
    #[arg(long, env = "FOLLOWER_MAIL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Account whose followers are collected
    #[arg(long, env = "FOLLOWER_MAIL_TARGET")]
    pub target: Option<String>,

    /// Stop collecting after this many followers (0 = no limit)
    #[arg(long, env = "FOLLOWER_MAIL_MAX_FOLLOWERS")]
    pub max_followers: Option<usize>,

    /// URL of the running WebDriver server
    #[arg(long, env = "FOLLOWER_MAIL_WEBDRIVER_URL")]
    pub webdriver_url: Option<String>,

    /// Run the browser without a window
    #[arg(long, env = "FOLLOWER_MAIL_HEADLESS")]
    pub headless: Option<bool>,

    /// Bounded wait for page elements (seconds)
    #[arg(long, env = "FOLLOWER_MAIL_ELEMENT_TIMEOUT")]
    pub element_timeout: Option<u64>,

    /// Minimum sleep between profile visits (seconds)
    #[arg(long, env = "FOLLOWER_MAIL_MIN_SLEEP")]
    pub min_sleep: Option<f32>,

    /// Maximum sleep between profile visits (seconds)
    #[arg(long, env = "FOLLOWER_MAIL_MAX_SLEEP")]
    pub max_sleep: Option<f32>,

    /// Scroll attempts without growth before the follower list counts as exhausted
    #[arg(long, env = "FOLLOWER_MAIL_STALL_THRESHOLD")]
    pub stall_threshold: Option<u32>,

    /// Directory receiving the JSON reports
    #[arg(long, env = "FOLLOWER_MAIL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Directory receiving error screenshots
    #[arg(long, env = "FOLLOWER_MAIL_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    credentials: Option<CredentialsConfig>,
    browser: Option<BrowserConfig>,
    timing: Option<TimingConfig>,
    collector: Option<CollectorConfig>,
    selectors: Option<SelectorsConfig>,
    output: Option<OutputConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct CredentialsConfig {
    username: Option<String>,
    password: Option<String>,
    target: Option<String>,
    max_followers: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct BrowserConfig {
    webdriver_url: Option<String>,
    headless: Option<bool>,
    base_url: Option<String>,
    login_path: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct TimingConfig {
    element_timeout: Option<u64>,
    login_settle: Option<f32>,
    scroll_settle: Option<f32>,
    profile_settle: Option<f32>,
    min_sleep: Option<f32>,
    max_sleep: Option<f32>,
}

#[derive(Deserialize, Debug, Default)]
struct CollectorConfig {
    stall_threshold: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
struct SelectorsConfig {
    username_input: Option<Selector>,
    password_input: Option<Selector>,
    submit_button: Option<Selector>,
    login_landmark: Option<Selector>,
    dismiss_labels: Option<Vec<String>>,
    followers_link: Option<Selector>,
    followers_modal: Option<Selector>,
    scroll_container: Option<Selector>,
    follower_entry: Option<Selector>,
    bio: Option<Selector>,
    meta_description: Option<Selector>,
}

#[derive(Deserialize, Debug, Default)]
struct OutputConfig {
    output_dir: Option<PathBuf>,
    artifacts_dir: Option<PathBuf>,
    report_prefix: Option<String>,
}

/// Login account and crawl target.
#[derive(Clone, Default, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub username: String,
    pub password: String,
    /// Handle of the account whose followers are collected.
    pub target: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("target", &self.target)
            .finish()
    }
}

/// DOM queries used by the crawl. All of them are configurable because the
/// site's markup changes without notice.
#[derive(Debug, Clone)]
pub(crate) struct Selectors {
    pub username_input: Selector,
    pub password_input: Selector,
    pub submit_button: Selector,
    /// Element that only exists once logged in.
    pub login_landmark: Selector,
    /// Visible button texts of interstitial dialogs shown after login.
    pub dismiss_labels: Vec<String>,
    /// The follower-count link on a profile that opens the followers dialog.
    pub followers_link: Selector,
    pub followers_modal: Selector,
    /// Scrollable list inside the dialog. When unset, the first scrollable
    /// descendant of the dialog is used.
    pub scroll_container: Option<Selector>,
    /// Anchors of rendered follower rows; their `href` carries the handle.
    pub follower_entry: Selector,
    pub bio: Selector,
    /// Page metadata carrying a summary of the bio, used as a fallback.
    pub meta_description: Selector,
}

impl Default for Selectors {
    fn default() -> Self {
        Selectors {
            username_input: Selector::css("input[name='username']"),
            password_input: Selector::css("input[name='password']"),
            submit_button: Selector::css("button[type='submit']"),
            login_landmark: Selector::css("svg[aria-label='Home']"),
            dismiss_labels: vec!["Not Now".to_string(), "Not Now".to_string(), "Not now".to_string()],
            followers_link: Selector::css("a[href$='/followers/']"),
            followers_modal: Selector::css("div[role='dialog']"),
            scroll_container: None,
            follower_entry: Selector::xpath(
                "//div[@role='dialog']//a[contains(@class, 'notranslate')]",
            ),
            bio: Selector::css("header section h1"),
            meta_description: Selector::xpath("//meta[@property='og:description']"),
        }
    }
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub credentials: Credentials,
    /// Follower cap; `None` collects until the list is exhausted.
    pub max_followers: Option<usize>,
    /// URL of the WebDriver server (chromedriver).
    pub webdriver_url: String,
    pub headless: bool,
    /// Root of the site; profile URLs are `{base_url}{handle}/`.
    pub base_url: Url,
    pub login_path: String,
    /// Upper bound for every wait on a DOM condition.
    pub element_timeout: Duration,
    /// Pause after submitting the login form.
    pub login_settle: Duration,
    /// Pause after each scroll of the followers list.
    pub scroll_settle: Duration,
    /// Pause after loading a follower profile.
    pub profile_settle: Duration,
    /// Minimum and maximum sleep duration between profile visits (seconds).
    pub sleep_between_profiles: (f32, f32),
    /// Scroll attempts without growth that end follower collection.
    pub stall_threshold: u32,
    pub selectors: Selectors,
    pub output_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub report_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            credentials: Credentials::default(),
            max_followers: None,
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            base_url: Url::parse("https://www.instagram.com/")
                .expect("Failed to parse default base URL. This should not happen."),
            login_path: "accounts/login/".to_string(),
            element_timeout: Duration::from_secs(10),
            login_settle: Duration::from_secs(10),
            scroll_settle: Duration::from_secs(2),
            profile_settle: Duration::from_secs(1),
            sleep_between_profiles: (1.0, 3.0),
            stall_threshold: 3,
            selectors: Selectors::default(),
            output_dir: PathBuf::from("."),
            artifacts_dir: PathBuf::from("."),
            report_prefix: DEFAULT_REPORT_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// The collector's view of the configuration.
    pub(crate) fn collector_policy(&self) -> CollectorPolicy {
        CollectorPolicy {
            cap: self.max_followers,
            stall_threshold: self.stall_threshold,
            scroll_settle: self.scroll_settle,
            element_timeout: self.element_timeout,
        }
    }
}

/// Load configuration from a TOML file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: ConfigFile = toml::from_str(&content)?;

    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Converts a `[timing]` value, rejecting negative, non-finite and overflowing input.
fn secs(key: &str, value: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(value)
        .map_err(|e| AppError::Config(format!("invalid [timing] {} = {}: {}", key, value, e)))
}

fn apply_file_config(config: &mut Config, file_config: ConfigFile) -> Result<()> {
    if let Some(credentials) = file_config.credentials {
        if let Some(username) = credentials.username {
            config.credentials.username = username;
        }
        if let Some(password) = credentials.password {
            config.credentials.password = password;
        }
        if let Some(target) = credentials.target {
            config.credentials.target = target;
        }
        if let Some(max) = credentials.max_followers {
            config.max_followers = Some(max);
        }
    }

    if let Some(browser) = file_config.browser {
        if let Some(url) = browser.webdriver_url {
            config.webdriver_url = url;
        }
        if let Some(headless) = browser.headless {
            config.headless = headless;
        }
        if let Some(base) = browser.base_url {
            config.base_url = Url::parse(&base)?;
        }
        if let Some(path) = browser.login_path {
            config.login_path = path;
        }
    }

    if let Some(timing) = file_config.timing {
        if let Some(timeout) = timing.element_timeout {
            config.element_timeout = Duration::from_secs(timeout);
        }
        if let Some(settle) = timing.login_settle {
            config.login_settle = secs("login_settle", settle)?;
        }
        if let Some(settle) = timing.scroll_settle {
            config.scroll_settle = secs("scroll_settle", settle)?;
        }
        if let Some(settle) = timing.profile_settle {
            config.profile_settle = secs("profile_settle", settle)?;
        }
        if let Some(min_sleep) = timing.min_sleep {
            config.sleep_between_profiles.0 = min_sleep;
        }
        if let Some(max_sleep) = timing.max_sleep {
            config.sleep_between_profiles.1 = max_sleep;
        }
    }

    if let Some(collector) = file_config.collector {
        if let Some(threshold) = collector.stall_threshold {
            config.stall_threshold = threshold;
        }
    }

    if let Some(selectors) = file_config.selectors {
        let target = &mut config.selectors;
        let replace = |slot: &mut Selector, value: Option<Selector>| {
            if let Some(value) = value {
                *slot = value;
            }
        };
        replace(&mut target.username_input, selectors.username_input);
        replace(&mut target.password_input, selectors.password_input);
        replace(&mut target.submit_button, selectors.submit_button);
        replace(&mut target.login_landmark, selectors.login_landmark);
        replace(&mut target.followers_link, selectors.followers_link);
        replace(&mut target.followers_modal, selectors.followers_modal);
        replace(&mut target.follower_entry, selectors.follower_entry);
        replace(&mut target.bio, selectors.bio);
        replace(&mut target.meta_description, selectors.meta_description);
        if selectors.scroll_container.is_some() {
            target.scroll_container = selectors.scroll_container;
        }
        if let Some(labels) = selectors.dismiss_labels {
            target.dismiss_labels = labels;
        }
    }

    if let Some(output) = file_config.output {
        if let Some(dir) = output.output_dir {
            config.output_dir = dir;
        }
        if let Some(dir) = output.artifacts_dir {
            config.artifacts_dir = dir;
        }
        if let Some(prefix) = output.report_prefix {
            config.report_prefix = prefix;
        }
    }

    Ok(())
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &CrawlArgs) {
    if let Some(ref username) = args.username {
        config.credentials.username = username.clone();
    }
    if let Some(ref password) = args.password {
        config.credentials.password = password.clone();
    }
    if let Some(ref target) = args.target {
        config.credentials.target = target.clone();
    }
    if let Some(max) = args.max_followers {
        config.max_followers = Some(max);
    }
    if let Some(ref url) = args.webdriver_url {
        config.webdriver_url = url.clone();
    }
    if let Some(headless) = args.headless {
        config.headless = headless;
    }
    if let Some(timeout) = args.element_timeout {
        config.element_timeout = Duration::from_secs(timeout);
    }
    if let Some(min_sleep) = args.min_sleep {
        config.sleep_between_profiles.0 = min_sleep;
    }
    if let Some(max_sleep) = args.max_sleep {
        config.sleep_between_profiles.1 = max_sleep;
    }
    if let Some(threshold) = args.stall_threshold {
        config.stall_threshold = threshold;
    }
    if let Some(ref dir) = args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ref dir) = args.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }
}

fn validate_config(config: &mut Config) -> Result<()> {
    let credentials = &mut config.credentials;
    credentials.username = credentials.username.trim().to_string();
    credentials.target = credentials.target.trim().trim_matches('/').to_string();

    let missing: Vec<&str> = [
        ("username", credentials.username.is_empty()),
        ("password", credentials.password.is_empty()),
        ("target", credentials.target.is_empty()),
    ]
    .iter()
    .filter(|(_, empty)| *empty)
    .map(|(key, _)| *key)
    .collect();
    if !missing.is_empty() {
        return Err(AppError::Config(format!(
            "missing required credential keys: {}",
            missing.join(", ")
        )));
    }

    if config.max_followers == Some(0) {
        config.max_followers = None;
    }

    let (min_sleep, max_sleep) = config.sleep_between_profiles;
    for (key, value) in [("min_sleep", min_sleep), ("max_sleep", max_sleep)] {
        if !value.is_finite() || Duration::try_from_secs_f32(value.max(0.0)).is_err() {
            return Err(AppError::Config(format!(
                "{} must be a finite number of seconds, got {}",
                key, value
            )));
        }
    }
    if config.sleep_between_profiles.0 < 0.0 {
        config.sleep_between_profiles.0 = 0.0;
    }
    if config.sleep_between_profiles.0 > config.sleep_between_profiles.1 {
        config.sleep_between_profiles.1 = config.sleep_between_profiles.0;
        tracing::warn!(
            "Min sleep was greater than max sleep. Setting both to {}",
            config.sleep_between_profiles.0
        );
    }

    if config.stall_threshold == 0 {
        config.stall_threshold = 1;
        tracing::warn!("Stall threshold was set to 0. Setting to 1.");
    }

    if !config.base_url.path().ends_with('/') {
        let path = format!("{}/", config.base_url.path());
        config.base_url.set_path(&path);
    }

    Ok(())
}

/// Builds the crawl configuration: defaults, then the TOML file, then CLI/env.
///
/// Fails when the login account, its password or the target account is missing
/// after all sources are merged.
pub(crate) fn build_config(args: &CrawlArgs) -> Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, file_config)?;
    } else {
        for path in ["./follower-mail.toml", "./config.toml"] {
            let path = Path::new(path);
            if path.exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, file_config)?;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

/// Picks a random pause in `[min, max)` seconds.
pub(crate) fn random_sleep_duration((min, max): (f32, f32)) -> Duration {
    use rand::Rng;
    if min >= max {
        return Duration::from_secs_f32(min.max(0.0));
    }
    let duration_secs = rand::thread_rng().gen_range(min..max);
    Duration::from_secs_f32(duration_secs)
}
