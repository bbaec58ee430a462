//! Logs into the site and hands out the authenticated session.

use crate::config::Config;
use crate::driver::{Driver, Selector, WebElement};
use crate::error::{AppError, Result};
use crate::sink::save_error_screenshot;
use tokio::time::sleep;

/// Proof of a verified login. The collector and the extractor only accept
/// this, so they cannot run against an anonymous browser.
#[derive(Debug)]
pub(crate) struct AuthenticatedSession<'a, D> {
    driver: &'a D,
    account: String,
}

impl<'a, D: Driver> AuthenticatedSession<'a, D> {
    pub(crate) fn driver(&self) -> &'a D {
        self.driver
    }

    pub(crate) fn account(&self) -> &str {
        &self.account
    }
}

/// Logs in with the configured credentials.
///
/// Any failure saves a `login_error` screenshot and is returned as
/// [`AppError::Auth`].
pub(crate) async fn authenticate<'a, D: Driver>(
    driver: &'a D,
    config: &Config,
) -> Result<AuthenticatedSession<'a, D>> {
    let username = &config.credentials.username;
    tracing::info!(target: "session", "Attempting to log in as {}...", username);

    match login(driver, config).await {
        Ok(()) => {
            tracing::info!(target: "session", "Successfully logged in as {}", username);
            Ok(AuthenticatedSession {
                driver,
                account: username.clone(),
            })
        }
        Err(e) => {
            tracing::error!(target: "session", "Login failed: {}", e);
            save_error_screenshot(driver, "login_error", &config.artifacts_dir).await;
            Err(match e {
                AppError::Auth(_) => e,
                other => AppError::Auth(other.to_string()),
            })
        }
    }
}

async fn login<D: Driver>(driver: &D, config: &Config) -> Result<()> {
    let selectors = &config.selectors;
    let credentials = &config.credentials;

    let login_url = config.base_url.join(&config.login_path)?;
    driver.navigate(login_url.as_str()).await?;

    let username_input = driver
        .wait_until(&selectors.username_input, config.element_timeout)
        .await?;
    username_input.clear().await?;
    username_input.send_keys(&credentials.username).await?;
    tracing::debug!(target: "session", "Username entered");

    let password_input = driver.find_element(&selectors.password_input).await?;
    password_input.clear().await?;
    password_input.send_keys(&credentials.password).await?;
    tracing::debug!(target: "session", "Password entered");

    driver
        .find_element(&selectors.submit_button)
        .await?
        .click()
        .await?;
    tracing::debug!(target: "session", "Login form submitted");

    sleep(config.login_settle).await;

    dismiss_interstitials(driver, &selectors.dismiss_labels).await;

    match driver
        .wait_until(&selectors.login_landmark, config.element_timeout)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_timeout() => Err(AppError::Auth("login verification failed".to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Clicks away post-login dialogs ("save login info", "turn on notifications").
/// A label with no matching button is skipped silently.
async fn dismiss_interstitials<D: Driver>(driver: &D, labels: &[String]) {
    for label in labels {
        let selector = Selector::button_with_text(label);
        match driver.find_element(&selector).await {
            Ok(button) => match button.click().await {
                Ok(()) => tracing::info!(target: "session", "Dismissed '{}' dialog", label),
                Err(e) => tracing::debug!(target: "session", "Could not click '{}': {}", label, e),
            },
            Err(_) => tracing::debug!(target: "session", "No '{}' dialog shown", label),
        }
    }
}
