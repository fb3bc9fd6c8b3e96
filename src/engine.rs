//! Browser engine abstraction
//!
//! The scraper only needs a handful of capabilities from a browser: launch a
//! process, create a browsing context, open pages in it, navigate until the
//! network is idle, wait for a selector, and read markup, title and
//! attributes. These traits name exactly that surface. [`crate::chrome`]
//! implements them over the DevTools protocol.

use crate::config::Viewport;
use crate::error::ScrapeError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Settings applied when a browsing context is created
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub user_agent: String,
    /// Default timeout for navigation and selector waits on every page
    pub default_timeout: Duration,
}

/// Main-document response observed during navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationResponse {
    pub status: Option<u16>,
}

/// Launches browser processes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserProcess>, ScrapeError>;
}

/// A running browser process
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserProcess: Send + Sync {
    async fn new_context(
        &mut self,
        options: &ContextOptions,
    ) -> Result<Arc<dyn BrowsingContext>, ScrapeError>;

    /// Ask the browser to exit and wait for the process.
    async fn close(&mut self) -> Result<(), ScrapeError>;

    /// Tear down whatever drives the browser (event loop, temp profile).
    async fn stop_driver(&mut self) -> Result<(), ScrapeError>;
}

/// An isolated browsing context shared by concurrently scraped pages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError>;
}

/// One page (tab) owned by a single scrape
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageHandle: Send + Sync {
    fn set_default_timeout(&mut self, timeout: Duration);

    /// Navigate and wait until no requests have been in flight for the idle
    /// window. `None` means the navigation produced no response.
    async fn goto(&self, url: &str) -> Result<Option<NavigationResponse>, ScrapeError>;

    async fn url(&self) -> Result<Option<String>, ScrapeError>;

    async fn wait_for_selector(&self, selector: &str) -> Result<(), ScrapeError>;

    async fn content(&self) -> Result<String, ScrapeError>;

    async fn title(&self) -> Result<Option<String>, ScrapeError>;

    async fn query_selector_all(
        &self,
        selector: &str,
    ) -> Result<Vec<Box<dyn ElementHandle>>, ScrapeError>;

    async fn query_selector(
        &self,
        selector: &str,
    ) -> Result<Option<Box<dyn ElementHandle>>, ScrapeError>;

    async fn close(&self) -> Result<(), ScrapeError>;
}

/// A DOM element found on a page
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn attribute(&self, name: &str) -> Result<Option<String>, ScrapeError>;
}
