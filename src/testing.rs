//! In-memory browser engine for tests
//!
//! Pages are described per URL with [`PageSpec`]. The engine records a
//! lifecycle log and tracks how many pages are open at once, which is what
//! the concurrency and cleanup tests assert on.

use crate::engine::{
    BrowserEngine, BrowserProcess, BrowsingContext, ContextOptions, ElementHandle,
    NavigationResponse, PageHandle,
};
use crate::ScrapeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PageSpec {
    pub delay: Duration,
    pub navigation_error: Option<String>,
    pub panic_on_goto: bool,
    pub no_response: bool,
    pub status: u16,
    pub final_url: Option<String>,
    pub html: String,
    pub title: Option<String>,
    pub metas: Vec<FakeMeta>,
    pub canonical: Option<String>,
    pub lang: Option<String>,
    pub selectors: Vec<String>,
    pub fail_attribute_reads_after: Option<usize>,
    pub fail_close: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeMeta {
    pub name: Option<String>,
    pub property: Option<String>,
    pub content: Option<String>,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            navigation_error: None,
            panic_on_goto: false,
            no_response: false,
            status: 200,
            final_url: None,
            html: "<html><head><title>Fake</title></head><body><h1>Fake</h1></body></html>"
                .to_string(),
            title: Some("Fake".to_string()),
            metas: Vec::new(),
            canonical: None,
            lang: None,
            selectors: vec!["h1".to_string()],
            fail_attribute_reads_after: None,
            fail_close: false,
        }
    }
}

impl PageSpec {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn navigation_error(mut self, message: &str) -> Self {
        self.navigation_error = Some(message.to_string());
        self
    }

    pub fn panic_on_goto(mut self) -> Self {
        self.panic_on_goto = true;
        self
    }

    pub fn no_response(mut self) -> Self {
        self.no_response = true;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.final_url = Some(url.to_string());
        self
    }

    pub fn title(mut self, title: Option<&str>) -> Self {
        self.title = title.map(str::to_string);
        self
    }

    pub fn meta(mut self, name: Option<&str>, property: Option<&str>, content: Option<&str>) -> Self {
        self.metas.push(FakeMeta {
            name: name.map(str::to_string),
            property: property.map(str::to_string),
            content: content.map(str::to_string),
        });
        self
    }

    pub fn canonical(mut self, href: &str) -> Self {
        self.canonical = Some(href.to_string());
        self
    }

    pub fn lang(mut self, lang: &str) -> Self {
        self.lang = Some(lang.to_string());
        self
    }

    pub fn selectors(mut self, selectors: &[&str]) -> Self {
        self.selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Attribute reads on this page fail once `n` reads have succeeded.
    pub fn fail_attribute_reads_after(mut self, n: usize) -> Self {
        self.fail_attribute_reads_after = Some(n);
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub open_pages: AtomicUsize,
    pub max_open_pages: AtomicUsize,
    pub pages_closed: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    pages: Arc<HashMap<String, PageSpec>>,
    launch_failure: Option<String>,
    context_failure: Option<String>,
    pub counters: Arc<Counters>,
    events: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, spec: PageSpec) -> Self {
        let mut pages = (*self.pages).clone();
        pages.insert(url.to_string(), spec);
        self.pages = Arc::new(pages);
        self
    }

    pub fn fail_launch(mut self, message: &str) -> Self {
        self.launch_failure = Some(message.to_string());
        self
    }

    pub fn fail_context(mut self, message: &str) -> Self {
        self.context_failure = Some(message.to_string());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn max_open_pages(&self) -> usize {
        self.counters.max_open_pages.load(Ordering::SeqCst)
    }

    pub fn open_pages(&self) -> usize {
        self.counters.open_pages.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn launch(&self, _headless: bool) -> Result<Box<dyn BrowserProcess>, ScrapeError> {
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_failure {
            return Err(ScrapeError::BrowserLaunchFailed(message.clone()));
        }
        self.record("launch");
        Ok(Box::new(FakeBrowser {
            engine: self.clone(),
        }))
    }
}

struct FakeBrowser {
    engine: FakeEngine,
}

#[async_trait]
impl BrowserProcess for FakeBrowser {
    async fn new_context(
        &mut self,
        options: &ContextOptions,
    ) -> Result<Arc<dyn BrowsingContext>, ScrapeError> {
        if let Some(message) = &self.engine.context_failure {
            return Err(ScrapeError::ContextCreationFailed(message.clone()));
        }
        self.engine.record("new_context");
        Ok(Arc::new(FakeContext {
            engine: self.engine.clone(),
            default_timeout: options.default_timeout,
        }))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        self.engine.record("browser_close");
        Ok(())
    }

    async fn stop_driver(&mut self) -> Result<(), ScrapeError> {
        self.engine.record("stop_driver");
        Ok(())
    }
}

struct FakeContext {
    engine: FakeEngine,
    default_timeout: Duration,
}

#[async_trait]
impl BrowsingContext for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, ScrapeError> {
        let counters = &self.engine.counters;
        counters.pages_opened.fetch_add(1, Ordering::SeqCst);
        let now_open = counters.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_open_pages.fetch_max(now_open, Ordering::SeqCst);

        Ok(Box::new(FakePage {
            engine: self.engine.clone(),
            timeout: self.default_timeout,
            loaded: Mutex::new(None),
            attribute_reads: Arc::new(AtomicUsize::new(0)),
        }))
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.engine.record("context_close");
        Ok(())
    }
}

struct FakePage {
    engine: FakeEngine,
    timeout: Duration,
    loaded: Mutex<Option<(String, PageSpec)>>,
    attribute_reads: Arc<AtomicUsize>,
}

impl FakePage {
    fn spec(&self) -> Result<PageSpec, ScrapeError> {
        self.loaded
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, spec)| spec.clone())
            .ok_or_else(|| ScrapeError::PageError("no document loaded".to_string()))
    }

    fn element(&self, attributes: &[(&str, Option<&String>)], spec: &PageSpec) -> Box<dyn ElementHandle> {
        Box::new(FakeElement {
            attributes: attributes
                .iter()
                .filter_map(|(name, value)| value.map(|v| (name.to_string(), v.clone())))
                .collect(),
            reads: self.attribute_reads.clone(),
            fail_after: spec.fail_attribute_reads_after,
        })
    }
}

#[async_trait]
impl PageHandle for FakePage {
    fn set_default_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn goto(&self, url: &str) -> Result<Option<NavigationResponse>, ScrapeError> {
        let spec = self.engine.pages.get(url).cloned().unwrap_or_default();

        if !spec.delay.is_zero() {
            tokio::time::sleep(spec.delay).await;
        }
        if spec.panic_on_goto {
            panic!("renderer crashed while loading {url}");
        }
        if let Some(message) = &spec.navigation_error {
            return Err(ScrapeError::NavigationFailed(message.clone()));
        }

        let final_url = spec.final_url.clone().unwrap_or_else(|| url.to_string());
        let response = (!spec.no_response).then_some(NavigationResponse {
            status: Some(spec.status),
        });
        *self.loaded.lock().unwrap() = Some((final_url, spec));
        Ok(response)
    }

    async fn url(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.loaded.lock().unwrap().as_ref().map(|(url, _)| url.clone()))
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), ScrapeError> {
        let spec = self.spec()?;
        if spec.selectors.iter().any(|s| s == selector) {
            return Ok(());
        }
        tokio::time::sleep(self.timeout).await;
        Err(ScrapeError::SelectorTimeout {
            selector: selector.to_string(),
            timeout: self.timeout,
        })
    }

    async fn content(&self) -> Result<String, ScrapeError> {
        Ok(self.spec()?.html)
    }

    async fn title(&self) -> Result<Option<String>, ScrapeError> {
        Ok(self.spec()?.title)
    }

    async fn query_selector_all(
        &self,
        selector: &str,
    ) -> Result<Vec<Box<dyn ElementHandle>>, ScrapeError> {
        let spec = self.spec()?;
        if selector != "meta" {
            return Ok(Vec::new());
        }
        Ok(spec
            .metas
            .iter()
            .map(|meta| {
                self.element(
                    &[
                        ("name", meta.name.as_ref()),
                        ("property", meta.property.as_ref()),
                        ("content", meta.content.as_ref()),
                    ],
                    &spec,
                )
            })
            .collect())
    }

    async fn query_selector(
        &self,
        selector: &str,
    ) -> Result<Option<Box<dyn ElementHandle>>, ScrapeError> {
        let spec = self.spec()?;
        let element = match selector {
            r#"link[rel="canonical"]"# => spec
                .canonical
                .as_ref()
                .map(|href| self.element(&[("href", Some(href))], &spec)),
            "html" => Some(self.element(&[("lang", spec.lang.as_ref())], &spec)),
            _ => None,
        };
        Ok(element)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        let counters = &self.engine.counters;
        counters.open_pages.fetch_sub(1, Ordering::SeqCst);
        counters.pages_closed.fetch_add(1, Ordering::SeqCst);

        let fail_close = self
            .loaded
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|(_, spec)| spec.fail_close);
        if fail_close {
            return Err(ScrapeError::CleanupFailed("target already detached".to_string()));
        }
        Ok(())
    }
}

struct FakeElement {
    attributes: HashMap<String, String>,
    reads: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

#[async_trait]
impl ElementHandle for FakeElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, ScrapeError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| read >= limit) {
            return Err(ScrapeError::ExtractionFailed(
                "element is not attached to the document".to_string(),
            ));
        }
        Ok(self.attributes.get(name).cloned())
    }
}
