//! Batch scraping with bounded concurrency
//!
//! All URLs of a batch share one browser session. Each URL becomes its own
//! task, and a semaphore limits how many of them hold an open page at once.
//! Results come back in input order, one per URL, whatever order the
//! tasks finish in.

use crate::browser_session::BrowserSession;
use crate::chrome::ChromeEngine;
use crate::engine::BrowserEngine;
use crate::scraper::{panic_message, scrape_page};
use crate::{Config, ScrapeError, ScrapeRequest, ScrapeResult};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub struct BatchCoordinator {
    session: Arc<BrowserSession>,
    config: Config,
    progress: Option<Arc<ProgressTracker>>,
}

impl BatchCoordinator {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: Config) -> Self {
        let session = Arc::new(BrowserSession::new(
            engine,
            config.headless,
            config.context_options(),
        ));
        Self {
            session,
            config,
            progress: None,
        }
    }

    /// Session shared by every URL of a run. Closing it from outside ends
    /// the run's browser early.
    pub fn session(&self) -> &Arc<BrowserSession> {
        &self.session
    }

    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Scrape every URL and return one result per URL, in input order.
    ///
    /// Fails only if the browser session cannot be opened or the
    /// concurrency limit is zero.
    pub async fn run(&self, urls: Vec<String>) -> Result<Vec<ScrapeResult>, ScrapeError> {
        let max_concurrent = self.config.max_concurrent_scrapes;
        if max_concurrent == 0 {
            return Err(ScrapeError::ConfigurationError(
                "Max concurrent scrapes must be greater than 0".to_string(),
            ));
        }

        if urls.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Processing batch of {} URLs (max {} concurrent)",
            urls.len(),
            max_concurrent
        );

        let config = self.config.clone();
        let progress = self.progress.clone();

        let results = self
            .session
            .run_scoped(move |session| async move {
                let context = session.context().await?;
                let semaphore = Arc::new(Semaphore::new(max_concurrent));

                let tasks: Vec<_> = urls
                    .iter()
                    .map(|url| {
                        let request = ScrapeRequest::new(url.as_str(), &config);
                        let semaphore = semaphore.clone();
                        let context = context.clone();
                        let progress = progress.clone();

                        tokio::spawn(async move {
                            let result = match semaphore.acquire_owned().await {
                                Ok(_permit) => scrape_page(context.as_ref(), &request).await,
                                Err(e) => ScrapeResult::failure(&request.url, ScrapeError::from(e)),
                            };
                            if let Some(progress) = &progress {
                                progress.record_completion(result.success);
                            }
                            result
                        })
                    })
                    .collect();

                let joined = join_all(tasks).await;

                let results: Vec<ScrapeResult> = joined
                    .into_iter()
                    .zip(urls)
                    .map(|(outcome, url)| match outcome {
                        Ok(result) => result,
                        Err(e) => {
                            let message = if e.is_panic() {
                                panic_message(e.into_panic().as_ref())
                            } else {
                                e.to_string()
                            };
                            warn!("Scrape task for {} did not complete: {}", url, message);
                            if let Some(progress) = &progress {
                                progress.record_completion(false);
                            }
                            ScrapeResult::failure(url, ScrapeError::RuntimeError(message))
                        }
                    })
                    .collect();

                Ok::<_, ScrapeError>(results)
            })
            .await?;

        info!(
            "Batch processing completed. Success: {}, Errors: {}",
            results.iter().filter(|r| r.success).count(),
            results.iter().filter(|r| !r.success).count()
        );

        Ok(results)
    }
}

/// Scrape `urls` with Chrome, at most `max_concurrent` at a time.
pub async fn scrape_urls_batch(
    urls: Vec<String>,
    headless: bool,
    max_concurrent: usize,
) -> Result<Vec<ScrapeResult>, ScrapeError> {
    let config = Config::from_env()?.for_entry_point(headless, Some(max_concurrent))?;
    let engine = Arc::new(ChromeEngine::new(config.clone()));
    scrape_urls_batch_with(engine, config, urls).await
}

pub async fn scrape_urls_batch_with(
    engine: Arc<dyn BrowserEngine>,
    config: Config,
    urls: Vec<String>,
) -> Result<Vec<ScrapeResult>, ScrapeError> {
    BatchCoordinator::new(engine, config).run(urls).await
}

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        ProgressInfo {
            total: self.total,
            completed,
            errors,
            success: completed.saturating_sub(errors),
            elapsed,
            rate,
            eta: if completed > 0 && rate > 0.0 {
                let remaining = self.total.saturating_sub(completed);
                Some(Duration::from_secs_f64(remaining as f64 / rate))
            } else {
                None
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

impl ProgressInfo {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}
