//! Browser session management
//!
//! A session owns one browser process and one browsing context. Every page
//! scraped during the session is opened in that context. The session is
//! opened lazily and closed exactly once; [`BrowserSession::run_scoped`]
//! ties both to the lifetime of a future.

use crate::engine::{BrowserEngine, BrowserProcess, BrowsingContext, ContextOptions};
use crate::ScrapeError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

struct OpenSession {
    browser: Box<dyn BrowserProcess>,
    context: Arc<dyn BrowsingContext>,
}

pub struct BrowserSession {
    engine: Arc<dyn BrowserEngine>,
    headless: bool,
    options: ContextOptions,
    state: Mutex<Option<OpenSession>>,
}

impl BrowserSession {
    pub fn new(engine: Arc<dyn BrowserEngine>, headless: bool, options: ContextOptions) -> Self {
        Self {
            engine,
            headless,
            options,
            state: Mutex::new(None),
        }
    }

    /// Launch the browser and create the context. Does nothing when the
    /// session is already open.
    pub async fn open(&self) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let mut browser = self.engine.launch(self.headless).await.map_err(|e| {
            error!("Browser launch failed ({:?}): {}", e.kind(), e);
            e
        })?;

        let context = match browser.new_context(&self.options).await {
            Ok(context) => context,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    debug!("Failed to close browser after context error: {}", close_err);
                }
                if let Err(stop_err) = browser.stop_driver().await {
                    debug!("Failed to stop driver after context error: {}", stop_err);
                }
                return Err(match e {
                    ScrapeError::ContextCreationFailed(_) => e,
                    other => ScrapeError::ContextCreationFailed(other.to_string()),
                });
            }
        };

        info!(
            "Browser session opened ({}x{}, headless: {})",
            self.options.viewport.width, self.options.viewport.height, self.headless
        );

        *state = Some(OpenSession { browser, context });
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// The shared browsing context, or [`ScrapeError::SessionClosed`].
    pub async fn context(&self) -> Result<Arc<dyn BrowsingContext>, ScrapeError> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|open| open.context.clone())
            .ok_or(ScrapeError::SessionClosed)
    }

    /// Release context, browser and driver in that order. Each step is
    /// attempted even if an earlier one failed. Closing a closed session is
    /// a no-op.
    pub async fn close(&self) {
        let Some(OpenSession {
            mut browser,
            context,
        }) = self.state.lock().await.take()
        else {
            return;
        };

        if let Err(e) = context.close().await {
            debug!("Failed to close browsing context: {}", e);
        }
        drop(context);

        if let Err(e) = browser.close().await {
            debug!("Failed to close browser: {}", e);
        }

        if let Err(e) = browser.stop_driver().await {
            debug!("Failed to stop browser driver: {}", e);
        }

        info!("Browser session closed");
    }

    /// Open the session, run `body`, and close the session on every exit
    /// path. A panic inside `body` is re-raised after the session is closed.
    pub async fn run_scoped<F, Fut, T>(self: &Arc<Self>, body: F) -> Result<T, ScrapeError>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        if let Err(e) = self.open().await {
            self.close().await;
            return Err(e);
        }

        let outcome = AssertUnwindSafe(body(self.clone())).catch_unwind().await;
        self.close().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
