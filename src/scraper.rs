//! Single-page scraping
//!
//! [`scrape_page`] is the per-URL operation shared by every entry point: it
//! opens its own page in a shared browsing context, loads the URL, extracts
//! markup, title and metadata, and always closes the page. It reports every
//! failure on the returned [`ScrapeResult`] instead of returning an error.
//!
//! ```rust,no_run
//! use scrape_worker::scrape_url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let result = scrape_url("https://example.com", true, Some("h1")).await?;
//!     if result.success {
//!         println!("{:?} ({} bytes)", result.title, result.html.unwrap_or_default().len());
//!     }
//!     Ok(())
//! }
//! ```

use crate::browser_session::BrowserSession;
use crate::chrome::ChromeEngine;
use crate::engine::{BrowserEngine, BrowsingContext, PageHandle};
use crate::metadata::extract_metadata;
use crate::utils::run_blocking;
use crate::{Config, ScrapeError, ScrapeRequest, ScrapeResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Scrape one URL in an already open browsing context.
pub async fn scrape_page(context: &dyn BrowsingContext, request: &ScrapeRequest) -> ScrapeResult {
    let mut result = ScrapeResult::new(&request.url);

    let mut page = match context.new_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!("Failed to open page for {} ({:?}): {}", request.url, e.kind(), e);
            result.error = Some(e.to_string());
            return result;
        }
    };
    page.set_default_timeout(request.timeout);

    let outcome = AssertUnwindSafe(load_page(page.as_ref(), request, &mut result))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => debug!("Scraped {} ({:?})", result.url, result.status_code),
        Ok(Err(e)) => {
            if e.is_fatal() {
                error!("Failed to scrape {} ({:?}): {}", request.url, e.kind(), e);
            } else if e.is_timeout() {
                warn!("Timed out scraping {}: {}", request.url, e);
            } else {
                warn!("Failed to scrape {} ({:?}): {}", request.url, e.kind(), e);
            }
            result.error = Some(e.to_string());
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!("Scrape of {} panicked: {}", request.url, message);
            result.error = Some(ScrapeError::PageError(message).to_string());
        }
    }

    if let Err(e) = page.close().await {
        debug!("Failed to close page for {}: {}", request.url, e);
    }

    result
}

/// Status and final URL are written as soon as they are known; markup,
/// title and metadata only once every step has succeeded.
async fn load_page(
    page: &dyn PageHandle,
    request: &ScrapeRequest,
    result: &mut ScrapeResult,
) -> Result<(), ScrapeError> {
    if let Some(response) = page.goto(&request.url).await? {
        result.status_code = response.status;
        if let Some(final_url) = page.url().await? {
            result.url = final_url;
        }
    }

    if let Some(selector) = &request.wait_for_selector {
        page.wait_for_selector(selector).await?;
    }

    let html = page.content().await?;
    let title = page.title().await?;
    let meta = extract_metadata(page).await;

    result.html = Some(html);
    result.title = title;
    result.meta = meta;
    result.success = true;
    Ok(())
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "scrape task panicked".to_string()
    }
}

/// Scraper owning one lazily opened browser session
///
/// Pages scraped with [`WebScraper::scrape`] share the session until
/// [`WebScraper::close`] is called.
pub struct WebScraper {
    config: Config,
    session: Arc<BrowserSession>,
}

impl WebScraper {
    /// Scraper backed by a local Chrome installation
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(ChromeEngine::new(config.clone()));
        Self::with_engine(engine, config)
    }

    pub fn with_engine(engine: Arc<dyn BrowserEngine>, config: Config) -> Self {
        let session = Arc::new(BrowserSession::new(
            engine,
            config.headless,
            config.context_options(),
        ));
        Self { config, session }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    fn request(&self, url: &str, wait_for_selector: Option<&str>) -> ScrapeRequest {
        ScrapeRequest::new(url, &self.config).with_selector(wait_for_selector.map(str::to_string))
    }

    /// Scrape in the shared session, opening it first if needed.
    pub async fn scrape(
        &self,
        url: &str,
        wait_for_selector: Option<&str>,
    ) -> Result<ScrapeResult, ScrapeError> {
        self.session.open().await?;
        let context = self.session.context().await?;
        Ok(scrape_page(context.as_ref(), &self.request(url, wait_for_selector)).await)
    }

    /// Open the session, scrape one URL, and close the session again.
    pub async fn scrape_once(
        &self,
        url: &str,
        wait_for_selector: Option<&str>,
    ) -> Result<ScrapeResult, ScrapeError> {
        let request = self.request(url, wait_for_selector);
        self.session
            .run_scoped(|session| async move {
                let context = session.context().await?;
                Ok::<_, ScrapeError>(scrape_page(context.as_ref(), &request).await)
            })
            .await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// Scrape one URL with Chrome, configured from the environment.
///
/// Only browser launch and configuration problems are returned as errors;
/// page-level failures come back as a result with `success == false`.
pub async fn scrape_url(
    url: &str,
    headless: bool,
    wait_for_selector: Option<&str>,
) -> Result<ScrapeResult, ScrapeError> {
    let config = Config::from_env()?.for_entry_point(headless, None)?;
    let engine = Arc::new(ChromeEngine::new(config.clone()));
    scrape_url_with(engine, config, url, wait_for_selector).await
}

pub async fn scrape_url_with(
    engine: Arc<dyn BrowserEngine>,
    config: Config,
    url: &str,
    wait_for_selector: Option<&str>,
) -> Result<ScrapeResult, ScrapeError> {
    info!("Scraping {}", url);
    WebScraper::with_engine(engine, config)
        .scrape_once(url, wait_for_selector)
        .await
}

/// Blocking form of [`scrape_url`]. Safe to call from inside a tokio
/// runtime: the scrape then runs on its own thread and runtime.
pub fn scrape_url_blocking(
    url: &str,
    headless: bool,
    wait_for_selector: Option<&str>,
) -> Result<ScrapeResult, ScrapeError> {
    let config = Config::from_env()?.for_entry_point(headless, None)?;
    let engine = Arc::new(ChromeEngine::new(config.clone()));
    scrape_url_blocking_with(engine, config, url, wait_for_selector)
}

pub fn scrape_url_blocking_with(
    engine: Arc<dyn BrowserEngine>,
    config: Config,
    url: &str,
    wait_for_selector: Option<&str>,
) -> Result<ScrapeResult, ScrapeError> {
    let url = url.to_string();
    let wait_for_selector = wait_for_selector.map(str::to_string);
    run_blocking(async move {
        scrape_url_with(engine, config, &url, wait_for_selector.as_deref()).await
    })?
}
