//! # Scrape Worker
//!
//! Headless-browser page scraping with Chrome. Pages are loaded until the
//! network goes idle, then their markup, title and metadata (meta tags,
//! canonical link, document language) are captured.
//!
//! Three entry points cover the common cases:
//!
//! | Function | Use |
//! |----------|-----|
//! | [`scrape_url`] | one URL, async |
//! | [`scrape_url_blocking`] | one URL from synchronous code, also callable inside a runtime |
//! | [`scrape_urls_batch`] | many URLs over one shared browser, bounded concurrency |
//!
//! Every per-URL failure (unreachable host, timeout, missing selector) is
//! reported on its [`ScrapeResult`] with `success == false`. Only a browser
//! that cannot be launched surfaces as an `Err`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scrape_worker::scrape_urls_batch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let urls = vec![
//!         "https://example.com".to_string(),
//!         "https://invalid.invalid".to_string(),
//!     ];
//!     let results = scrape_urls_batch(urls, true, 2).await?;
//!
//!     for result in &results {
//!         match &result.error {
//!             None => println!("{} -> {:?}", result.url, result.status_code),
//!             Some(error) => println!("{} failed: {}", result.url, error),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`Config`] defaults can be overridden from the environment or a `.env`
//! file: `HEADLESS`, `TIMEOUT` (ms), `MAX_CONCURRENT_SCRAPES`,
//! `VIEWPORT_WIDTH`, `VIEWPORT_HEIGHT`, `USER_AGENT`, `MAX_RETRIES`,
//! `RETRY_DELAY`, `CHROME_PATH`, `NETWORK_IDLE` (ms).
//!
//! ## CLI Usage
//!
//! ```bash
//! scrape-worker single --url https://example.com --selector h1 --output result.json
//! scrape-worker batch --input urls.txt --concurrency 5 --output results.json
//! ```

/// Configuration, request and result types
pub mod config;

/// Error types and error classification
pub mod error;

/// Browser engine traits
pub mod engine;

/// Chrome implementation of the engine traits
pub mod chrome;

/// Browser process and context lifecycle
pub mod browser_session;

/// Meta tag, canonical link and language extraction
pub mod metadata;

/// Single-page scrape operation and single-URL entry points
pub mod scraper;

/// Bounded-concurrency batch scraping
pub mod batch;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;


pub use batch::*;
pub use browser_session::*;
pub use chrome::*;
pub use cli::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use metadata::*;
pub use scraper::*;
pub use utils::*;
