use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use browser_agent::resolver::{ElementResolver, Intent};
use browser_agent::{Surface, SurfaceError, SurfaceProvider};
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use crate::dom;

const DEBUG_ENDPOINT: &str = "http://127.0.0.1:9222";

/// Owns the browser process (or the connection to one) and opens a tab per
/// worker.
pub struct ChromeProvider {
    browser: Browser,
    resolver: Arc<ElementResolver>,
    /// Tab already open in an attached browser, handed to the first worker.
    existing: Mutex<Option<Arc<Tab>>>,
}

impl ChromeProvider {
    /// Connect to a running Chrome with remote debugging enabled.
    pub fn attach() -> Result<Self> {
        info!(endpoint = DEBUG_ENDPOINT, "attaching to existing Chrome");
        let browser = Browser::connect(DEBUG_ENDPOINT.to_string())?;
        let existing = browser
            .get_tabs()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned();
        Ok(Self {
            browser,
            resolver: Arc::new(ElementResolver::new()),
            existing: Mutex::new(existing),
        })
    }

    /// Launch Chrome with a persistent profile so logins survive restarts.
    pub fn launch(headless: bool) -> Result<Self> {
        let profile = profile_dir()?;
        std::fs::create_dir_all(&profile)?;
        info!(profile = %profile.display(), headless, "launching Chrome");

        let options = LaunchOptions {
            headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let browser = Browser::new(options).map_err(|e| anyhow::anyhow!("browser launch failed: {e}"))?;
        Ok(Self {
            browser,
            resolver: Arc::new(ElementResolver::new()),
            existing: Mutex::new(None),
        })
    }

    /// Attach when asked, otherwise launch.
    pub fn connect(attach: bool, headless: bool) -> Result<Self> {
        if attach {
            match Self::attach() {
                Ok(provider) => return Ok(provider),
                Err(e) => warn!(error = %e, "could not attach, launching instead"),
            }
        }
        Self::launch(headless)
    }
}

fn profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("no local data directory"))?;
    Ok(base.join("browser-agent").join("profile"))
}

#[async_trait]
impl SurfaceProvider for ChromeProvider {
    async fn new_surface(&self) -> Result<Box<dyn Surface>, SurfaceError> {
        let reused = self
            .existing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let (tab, owned) = match reused {
            Some(tab) => (tab, false),
            None => {
                let browser = self.browser.clone();
                let tab = tokio::task::spawn_blocking(move || browser.new_tab())
                    .await
                    .map_err(|e| SurfaceError::Driver(format!("driver task failed: {e}")))?
                    .map_err(|e| SurfaceError::Driver(format!("could not open tab: {e}")))?;
                (tab, true)
            }
        };
        Ok(Box::new(ChromeSurface {
            tab,
            owned,
            resolver: self.resolver.clone(),
        }))
    }
}

/// One browser tab driven through the DevTools protocol.
pub struct ChromeSurface {
    tab: Arc<Tab>,
    /// Tabs we opened are closed on shutdown; an attached user tab is left alone.
    owned: bool,
    resolver: Arc<ElementResolver>,
}

impl ChromeSurface {
    /// Run a blocking driver call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SurfaceError>
    where
        F: FnOnce(&Tab, &ElementResolver) -> Result<T, SurfaceError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        let resolver = self.resolver.clone();
        tokio::task::spawn_blocking(move || f(&tab, &resolver))
            .await
            .map_err(|e| SurfaceError::Driver(format!("driver task failed: {e}")))?
    }
}

#[async_trait]
impl Surface for ChromeSurface {
    async fn extract_state(&mut self) -> Result<String, SurfaceError> {
        self.blocking(|tab, _| dom::capture_snapshot(tab).map(|page| page.render()))
            .await
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        let url = url.to_string();
        self.blocking(move |tab, _| {
            tab.navigate_to(&url)
                .map_err(|e| SurfaceError::Navigation(format!("{url}: {e}")))?;
            tab.wait_until_navigated()
                .map_err(|e| SurfaceError::Navigation(format!("{url}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn click_element(&mut self, description: &str) -> Result<(), SurfaceError> {
        let description = description.to_string();
        self.blocking(move |tab, resolver| {
            let page = dom::capture_snapshot(tab)?;
            let found = resolver.resolve(&description, Intent::Click, &page)?;
            info!(
                description = %description,
                eid = %found.element.eid,
                strategy = found.strategy,
                "clicking element"
            );
            let element = tab
                .find_element(&found.element.selector())
                .map_err(|_| SurfaceError::ElementNotFound(description.clone()))?;
            element
                .click()
                .map_err(|e| SurfaceError::NotVisible(format!("{description}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn type_text(&mut self, description: &str, text: &str) -> Result<(), SurfaceError> {
        let description = description.to_string();
        let text = text.to_string();
        self.blocking(move |tab, resolver| {
            let page = dom::capture_snapshot(tab)?;
            let found = resolver.resolve_fillable(&description, &page)?;
            info!(
                description = %description,
                eid = %found.element.eid,
                strategy = found.strategy,
                "typing into field"
            );
            let element = tab
                .find_element(&found.element.selector())
                .map_err(|_| SurfaceError::ElementNotFound(description.clone()))?;
            element
                .click()
                .map_err(|e| SurfaceError::NotVisible(format!("{description}: {e}")))?;
            element
                .call_js_fn("function() { this.value = ''; }", vec![], false)
                .map_err(|e| SurfaceError::Driver(format!("could not clear field: {e}")))?;
            tab.type_str(&text)
                .map_err(|e| SurfaceError::Driver(format!("typing failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn scroll_page(&mut self) -> Result<(), SurfaceError> {
        self.blocking(|tab, _| {
            tab.evaluate("window.scrollBy(0, 500)", false)
                .map_err(|e| SurfaceError::Driver(format!("scroll failed: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn wait(&mut self, seconds: u64) {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    async fn close(&mut self) -> Result<(), SurfaceError> {
        if !self.owned {
            return Ok(());
        }
        self.blocking(|tab, _| {
            tab.close(true)
                .map_err(|e| SurfaceError::Driver(format!("could not close tab: {e}")))?;
            Ok(())
        })
        .await
    }
}
