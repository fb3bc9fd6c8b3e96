//! Chrome implementation of the browser engine over the DevTools protocol
//!
//! Each launch gets its own temporary profile directory and its own CDP
//! handler task. Browsing contexts map onto CDP browser contexts, so pages
//! opened for different sessions never share cookies or storage.

use crate::engine::{
    BrowserEngine, BrowserProcess, BrowsingContext, ContextOptions, ElementHandle,
    NavigationResponse, PageHandle,
};
use crate::{create_browser_config, Config, ScrapeError};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches local Chrome/Chromium processes
#[derive(Debug, Clone)]
pub struct ChromeEngine {
    config: Config,
    profile_root: PathBuf,
}

impl ChromeEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            profile_root: std::env::temp_dir(),
        }
    }

    /// Directory under which per-launch profile directories are created
    pub fn with_profile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profile_root = root.into();
        self
    }
}

#[async_trait]
impl BrowserEngine for ChromeEngine {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserProcess>, ScrapeError> {
        // Removed on drop, so a failed launch leaves nothing behind.
        let profile = tempfile::Builder::new()
            .prefix("scrape-worker-")
            .tempdir_in(&self.profile_root)
            .map_err(|e| {
                ScrapeError::BrowserLaunchFailed(format!("Failed to create user data dir: {e}"))
            })?;

        let mut config = self.config.clone();
        config.headless = headless;
        let browser_config = create_browser_config(&config, profile.path())?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::BrowserLaunchFailed(e.to_string()))?;

        // The handler drives all CDP traffic and must be polled for the
        // lifetime of the browser.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {}", e);
                }
            }
            debug!("CDP handler stream ended");
        });

        info!(
            "Launched Chrome ({}) with profile {}",
            if headless { "headless" } else { "headed" },
            profile.path().display()
        );

        Ok(Box::new(ChromeBrowser {
            browser: Arc::new(RwLock::new(browser)),
            handler: Some(handler_task),
            profile: Some(profile),
            network_idle: self.config.network_idle_duration(),
        }))
    }
}

pub struct ChromeBrowser {
    browser: Arc<RwLock<Browser>>,
    handler: Option<JoinHandle<()>>,
    profile: Option<TempDir>,
    network_idle: Duration,
}

#[async_trait]
impl BrowserProcess for ChromeBrowser {
    async fn new_context(
        &mut self,
        options: &ContextOptions,
    ) -> Result<Arc<dyn BrowsingContext>, ScrapeError> {
        let context_id = {
            let browser = self.browser.read().await;
            browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(|e| ScrapeError::ContextCreationFailed(e.to_string()))?
                .result
                .browser_context_id
        };

        Ok(Arc::new(ChromeContext {
            browser: self.browser.clone(),
            context_id,
            options: options.clone(),
            network_idle: self.network_idle,
        }))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        let mut browser = self.browser.write().await;
        browser
            .close()
            .await
            .map_err(|e| ScrapeError::CleanupFailed(format!("browser close: {e}")))?;
        browser
            .wait()
            .await
            .map_err(|e| ScrapeError::CleanupFailed(format!("browser wait: {e}")))?;
        Ok(())
    }

    async fn stop_driver(&mut self) -> Result<(), ScrapeError> {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        let Some(profile) = self.profile.take() else {
            return Ok(());
        };
        let path = profile.path().to_path_buf();
        tokio::task::spawn_blocking(move || profile.close())
            .await?
            .map_err(|e| ScrapeError::CleanupFailed(format!("remove {}: {e}", path.display())))
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

pub struct ChromeContext {
    browser: Arc<RwLock<Browser>>,
    context_id: BrowserContextId,
    options: ContextOptions,
    network_idle: Duration,
}

#[async_trait]
impl BrowsingContext for ChromeContext {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, ScrapeError> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.context_id.clone())
            .build()
            .map_err(ScrapeError::PageError)?;

        let page = {
            let browser = self.browser.read().await;
            browser
                .new_page(params)
                .await
                .map_err(|e| ScrapeError::PageError(e.to_string()))?
        };

        page.execute(SetUserAgentOverrideParams::new(
            self.options.user_agent.clone(),
        ))
        .await
        .map_err(|e| ScrapeError::PageError(e.to_string()))?;

        let emulation_params = SetDeviceMetricsOverrideParams::builder()
            .width(self.options.viewport.width)
            .height(self.options.viewport.height)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(ScrapeError::PageError)?;

        page.execute(emulation_params)
            .await
            .map_err(|e| ScrapeError::PageError(e.to_string()))?;

        Ok(Box::new(ChromePage {
            page,
            timeout: self.options.default_timeout,
            network_idle: self.network_idle,
        }))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let browser = self.browser.read().await;
        browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await
            .map_err(|e| ScrapeError::CleanupFailed(format!("dispose context: {e}")))?;
        Ok(())
    }
}

pub struct ChromePage {
    page: Page,
    timeout: Duration,
    network_idle: Duration,
}

impl ChromePage {
    /// Navigate, then wait until nothing has been in flight for
    /// `network_idle`.
    async fn navigate_until_idle(&self, url: &str) -> Result<Option<NavigationResponse>, ScrapeError> {
        let started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?
            .map(|event| NetworkEvent::RequestStarted {
                id: event.request_id.inner().clone(),
                redirect: event.redirect_response.is_some(),
            });
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await?
            .map(|event| NetworkEvent::RequestFinished {
                id: event.request_id.inner().clone(),
            });
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await?
            .map(|event| NetworkEvent::RequestFailed {
                id: event.request_id.inner().clone(),
                error: event.error_text.clone(),
            });
        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await?
            .map(|event| NetworkEvent::Response {
                document: event.r#type == ResourceType::Document,
                frame_id: event.frame_id.as_ref().map(|frame| frame.inner().clone()),
                status: event.response.status,
            });
        let events = futures::stream::select_all([
            started.boxed(),
            finished.boxed(),
            failed.boxed(),
            responses.boxed(),
        ]);
        let main_frame = self
            .page
            .mainframe()
            .await?
            .map(|frame| frame.inner().clone());

        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapeError::NavigationFailed(e.to_string()))?;

        Ok(wait_for_network_idle(events, self.network_idle, main_frame).await)
    }
}

/// Network activity relevant to the idle wait
#[derive(Debug, Clone, PartialEq, Eq)]
enum NetworkEvent {
    RequestStarted { id: String, redirect: bool },
    RequestFinished { id: String },
    RequestFailed { id: String, error: String },
    Response {
        document: bool,
        frame_id: Option<String>,
        status: i64,
    },
}

/// Requests seen but not yet finished
///
/// Each CDP event type arrives on its own stream, so a request can finish
/// before its start is read. Redirect hops reuse the id of the first hop
/// and get a single finish event.
#[derive(Debug, Default)]
struct InFlightRequests {
    pending: HashSet<String>,
    finished_early: HashSet<String>,
}

impl InFlightRequests {
    fn started(&mut self, id: String, redirect: bool) {
        if redirect {
            return;
        }
        if !self.finished_early.remove(&id) {
            self.pending.insert(id);
        }
    }

    fn finished(&mut self, id: String) {
        if !self.pending.remove(&id) {
            self.finished_early.insert(id);
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Consume network events until nothing has been pending for `idle`.
/// Returns the first main-frame document response, if any.
async fn wait_for_network_idle<S>(
    mut events: S,
    idle: Duration,
    main_frame: Option<String>,
) -> Option<NavigationResponse>
where
    S: Stream<Item = NetworkEvent> + Unpin,
{
    let mut requests = InFlightRequests::default();
    let mut response: Option<NavigationResponse> = None;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(NetworkEvent::RequestStarted { id, redirect }) => requests.started(id, redirect),
                Some(NetworkEvent::RequestFinished { id }) => requests.finished(id),
                Some(NetworkEvent::RequestFailed { id, error }) => {
                    debug!("Request {} failed: {}", id, error);
                    requests.finished(id);
                }
                Some(NetworkEvent::Response { document, frame_id, status }) => {
                    let in_main_frame = main_frame.is_none() || frame_id == main_frame;
                    if response.is_none() && document && in_main_frame {
                        response = Some(NavigationResponse {
                            status: u16::try_from(status).ok(),
                        });
                    }
                }
                None => break,
            },
            _ = sleep(idle), if requests.is_idle() => break,
        }
    }

    response
}

/// Poll `find` until it reports a match. Errors from `find` end the wait
/// immediately.
async fn poll_until_found<F, Fut>(
    selector: &str,
    timeout: Duration,
    mut find: F,
) -> Result<(), ScrapeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ScrapeError>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if find().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        sleep(SELECTOR_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    fn set_default_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn goto(&self, url: &str) -> Result<Option<NavigationResponse>, ScrapeError> {
        match timeout(self.timeout, self.navigate_until_idle(url)).await {
            Ok(result) => result,
            Err(_) => Err(ScrapeError::NavigationTimeout(self.timeout)),
        }
    }

    async fn url(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.page.url().await?)
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), ScrapeError> {
        let page = &self.page;
        poll_until_found(selector, self.timeout, move || async move {
            Ok::<_, ScrapeError>(!page.find_elements(selector).await?.is_empty())
        })
        .await
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        Ok(self.page.content().await?)
    }

    async fn title(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.page.get_title().await?)
    }

    async fn query_selector_all(
        &self,
        selector: &str,
    ) -> Result<Vec<Box<dyn ElementHandle>>, ScrapeError> {
        let elements = self.page.find_elements(selector).await?;
        Ok(elements
            .into_iter()
            .map(|element| Box::new(ChromeElement { element }) as Box<dyn ElementHandle>)
            .collect())
    }

    async fn query_selector(
        &self,
        selector: &str,
    ) -> Result<Option<Box<dyn ElementHandle>>, ScrapeError> {
        let elements = self.page.find_elements(selector).await?;
        Ok(elements
            .into_iter()
            .next()
            .map(|element| Box::new(ChromeElement { element }) as Box<dyn ElementHandle>))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| ScrapeError::CleanupFailed(format!("page close: {e}")))
    }
}

pub struct ChromeElement {
    element: Element,
}

#[async_trait]
impl ElementHandle for ChromeElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, ScrapeError> {
        Ok(self.element.attribute(name).await?)
    }
}
