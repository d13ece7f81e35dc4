use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::config::BrowserConfig;
use crate::error::{PilotError, PilotResult};
use crate::page::{ChromePage, PageHandle};

/// Browser lifecycle as seen by the agent.
#[async_trait]
pub trait BrowserLifecycle: Send {
    /// Returns the open page, opening one first if needed. Idempotent.
    async fn acquire_page(&mut self, headless_override: Option<bool>) -> PilotResult<Arc<dyn PageHandle>>;

    async fn relaunch(&mut self, headless: bool) -> PilotResult<Arc<dyn PageHandle>>;

    /// Closes every resource. Safe to call repeatedly.
    fn release(&mut self);

    fn pages_count(&self) -> usize;
}

/// Browser lifecycle owned by the host: one browser, one active page.
///
/// Passed explicitly to whoever needs a page; there is no process-wide browser.
pub struct BrowserSession {
    config: BrowserConfig,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    headless: bool,
}

impl BrowserSession {
    pub fn new(config: BrowserConfig) -> Self {
        let headless = config.headless;
        Self {
            config,
            browser: None,
            tab: None,
            headless,
        }
    }

    async fn launch(&mut self) -> PilotResult<Arc<dyn PageHandle>> {
        let config = self.config.clone();
        let headless = self.headless;
        let (browser, tab) = tokio::task::spawn_blocking(move || open_browser(&config, headless))
            .await
            .map_err(|e| PilotError::Browser(format!("browser launch panicked: {e}")))??;

        self.browser = Some(browser);
        self.tab = Some(tab.clone());
        Ok(Arc::new(ChromePage::new(tab)))
    }
}

#[async_trait]
impl BrowserLifecycle for BrowserSession {
    /// A headless override that differs from the running mode relaunches.
    async fn acquire_page(&mut self, headless_override: Option<bool>) -> PilotResult<Arc<dyn PageHandle>> {
        if let Some(headless) = headless_override {
            if self.browser.is_some() && headless != self.headless {
                tracing::info!(target: "pilot::session", headless, "switching browser mode");
                self.release();
            }
            self.headless = headless;
        }

        if let Some(tab) = &self.tab {
            return Ok(Arc::new(ChromePage::new(tab.clone())));
        }
        self.launch().await
    }

    async fn relaunch(&mut self, headless: bool) -> PilotResult<Arc<dyn PageHandle>> {
        tracing::info!(target: "pilot::session", headless, "relaunching browser");
        self.release();
        self.headless = headless;
        self.launch().await
    }

    fn release(&mut self) {
        if self.tab.take().is_some() || self.browser.is_some() {
            tracing::info!(target: "pilot::session", "releasing browser");
        }
        // Dropping the Browser closes a launched process; attached ones stay up.
        self.browser = None;
    }

    fn pages_count(&self) -> usize {
        let Some(browser) = &self.browser else {
            return 0;
        };
        browser
            .get_tabs()
            .lock()
            .map(|tabs| tabs.len())
            .unwrap_or(usize::from(self.tab.is_some()))
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_browser(config: &BrowserConfig, headless: bool) -> PilotResult<(Browser, Arc<Tab>)> {
    if let Some(url) = &config.cdp_attach_url {
        tracing::debug!(target: "pilot::session", %url, "attempting to attach to running Chrome");
        match Browser::connect(url.clone()) {
            Ok(browser) => {
                let existing = browser
                    .get_tabs()
                    .lock()
                    .ok()
                    .and_then(|tabs| tabs.first().cloned());
                let tab = match existing {
                    Some(tab) => tab,
                    None => browser.new_tab().map_err(browser_err)?,
                };
                tracing::info!(target: "pilot::session", %url, "attached to running Chrome");
                return Ok((browser, tab));
            }
            Err(e) => {
                tracing::debug!(target: "pilot::session", error = %e, "attach failed, launching");
            }
        }
    }

    let profile = config.resolved_profile_dir()?;
    std::fs::create_dir_all(&profile)?;

    let options = LaunchOptions {
        headless,
        path: config.chrome_path.clone(),
        user_data_dir: Some(profile.clone()),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: Duration::from_secs(config.idle_timeout_secs),
        ..Default::default()
    };

    tracing::info!(target: "pilot::session", headless, profile = %profile.display(), "launching Chrome");
    let browser = Browser::new(options).map_err(browser_err)?;
    let tab = browser.new_tab().map_err(browser_err)?;
    tab.navigate_to("about:blank").map_err(browser_err)?;
    Ok((browser, tab))
}

fn browser_err(e: anyhow::Error) -> PilotError {
    PilotError::Browser(format!("{e:#}"))
}
