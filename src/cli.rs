use crate::{
    parse_url_list, save_result_to_file, save_results_to_file, scrape_url_blocking_with,
    validate_url, BatchCoordinator, BrowserEngine, BrowserSession, ChromeEngine, Config,
    ProgressTracker, ScrapeResult, WebScraper,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scrape-worker")]
#[command(about = "Headless browser page scraper")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Show the browser window instead of running headless")]
    pub headed: bool,

    #[arg(long, help = "Navigation timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Maximum concurrent scrapes")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape a single URL
    Single {
        #[arg(short, long, help = "URL to scrape")]
        url: String,

        #[arg(short, long, help = "CSS selector to wait for before extracting")]
        selector: Option<String>,

        #[arg(short, long, help = "Write the result as JSON to this file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Use the blocking entry point")]
        blocking: bool,
    },

    /// Scrape many URLs over one shared browser
    Batch {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: Option<PathBuf>,

        #[arg(help = "URLs to scrape, after any read from --input")]
        urls: Vec<String>,

        #[arg(short, long, help = "Concurrency level")]
        concurrency: Option<usize>,

        #[arg(short, long, help = "Write the results as a JSON array to this file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },

    /// Print the effective configuration as JSON
    ShowConfig,
}

pub struct CliRunner {
    pub config: Config,
    engine: Arc<dyn BrowserEngine>,
    active_session: Mutex<Option<Arc<BrowserSession>>>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        let engine = Arc::new(ChromeEngine::new(config.clone()));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: Config, engine: Arc<dyn BrowserEngine>) -> Self {
        Self {
            config,
            engine,
            active_session: Mutex::new(None),
        }
    }

    async fn track(&self, session: &Arc<BrowserSession>) {
        *self.active_session.lock().await = Some(session.clone());
    }

    /// Close the browser session of an interrupted command. Does nothing if
    /// the command already finished.
    pub async fn shutdown(&self) {
        if let Some(session) = self.active_session.lock().await.take() {
            if session.is_open().await {
                info!("Closing browser session");
            }
            session.close().await;
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Single {
                url,
                selector,
                output,
                blocking,
            } => self.run_single(url, selector, output, blocking).await,
            Commands::Batch {
                input,
                urls,
                concurrency,
                output,
                progress_interval,
            } => {
                self.run_batch(input, urls, concurrency, output, progress_interval)
                    .await
            }
            Commands::Validate { config } => self.validate_config(&config).await,
            Commands::ShowConfig => self.show_config(),
        }
    }

    pub async fn run_single(
        &self,
        url: String,
        selector: Option<String>,
        output: Option<PathBuf>,
        blocking: bool,
    ) -> anyhow::Result<()> {
        if let Err(e) = validate_url(&url) {
            warn!("{}", e);
        }

        let result = if blocking {
            let engine = self.engine.clone();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || {
                scrape_url_blocking_with(engine, config, &url, selector.as_deref())
            })
            .await
            .context("blocking scrape task failed")??
        } else {
            let scraper = WebScraper::with_engine(self.engine.clone(), self.config.clone());
            self.track(scraper.session()).await;
            scraper.scrape_once(&url, selector.as_deref()).await?
        };

        print_result(&result);

        if let Some(path) = &output {
            save_result_to_file(&result, path)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Result saved to: {}", path.display());
        }

        if !result.success {
            bail!(
                "Scrape failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(())
    }

    pub async fn run_batch(
        &self,
        input: Option<PathBuf>,
        extra_urls: Vec<String>,
        concurrency: Option<usize>,
        output: Option<PathBuf>,
        progress_interval: Option<u64>,
    ) -> anyhow::Result<()> {
        let mut urls = match &input {
            Some(path) => read_urls_from_file(path).await?,
            None => Vec::new(),
        };
        urls.extend(extra_urls);

        if urls.is_empty() {
            bail!("No URLs given: pass --input <file> or URLs as arguments");
        }

        for url in &urls {
            if let Err(e) = validate_url(url) {
                warn!("{}", e);
            }
        }

        let mut config = self.config.clone();
        if let Some(concurrency) = concurrency {
            config.max_concurrent_scrapes = concurrency;
        }

        info!(
            "Starting batch of {} URLs with concurrency {}",
            urls.len(),
            config.max_concurrent_scrapes
        );

        let progress_tracker = Arc::new(ProgressTracker::new(urls.len()));

        if let Some(interval) = progress_interval.filter(|secs| *secs > 0) {
            let tracker = progress_tracker.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval));
                interval.tick().await;

                while !tracker.is_complete() {
                    interval.tick().await;
                    let progress = tracker.get_progress();

                    println!(
                        "Progress: {}/{} ({:.1}%) - Success: {}, Errors: {}, Rate: {:.1}/s, ETA: {}",
                        progress.completed,
                        progress.total,
                        progress.percent(),
                        progress.success,
                        progress.errors,
                        progress.rate,
                        progress
                            .eta
                            .map(crate::format_duration)
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            });
        }

        let coordinator = BatchCoordinator::new(self.engine.clone(), config)
            .with_progress(progress_tracker.clone());
        self.track(coordinator.session()).await;
        let results = coordinator.run(urls).await?;

        for result in &results {
            print_result(result);
        }

        let progress = progress_tracker.get_progress();
        println!(
            "Batch completed in {}. Success: {}, Errors: {}",
            crate::format_duration(progress.elapsed),
            results.iter().filter(|r| r.success).count(),
            results.iter().filter(|r| !r.success).count()
        );

        if let Some(path) = &output {
            save_results_to_file(&results, path)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Results saved to: {}", path.display());
        }

        Ok(())
    }

    pub async fn validate_config(&self, config_path: &Path) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let config_content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Headless: {}", config.headless);
        println!("  Timeout: {}ms", config.timeout);
        println!("  Max concurrent: {}", config.max_concurrent_scrapes);
        println!(
            "  Viewport: {}x{}",
            config.viewport.width, config.viewport.height
        );
        println!("  User agent: {}", config.user_agent);

        Ok(())
    }

    pub fn show_config(&self) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(&self.config)?);
        Ok(())
    }
}

pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read URL list {}", path.display()))?;
    let urls = parse_url_list(&content);
    info!("Loaded {} URLs from {}", urls.len(), path.display());
    Ok(urls)
}

fn print_result(result: &ScrapeResult) {
    if result.success {
        println!("OK    {}", result.url);
        if let Some(status) = result.status_code {
            println!("  Status: {status}");
        }
        if let Some(title) = &result.title {
            println!("  Title: {title}");
        }
        if let Some(html) = &result.html {
            println!("  HTML: {}", crate::format_bytes(html.len()));
        }
        println!("  Meta tags: {}", result.meta.len());
    } else {
        println!("FAIL  {}", result.url);
        if let Some(error) = &result.error {
            println!("  Error: {error}");
        }
    }
}

/// Merge configuration sources: JSON file, then environment, then flags.
pub async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let config = if let Some(config_path) = &args.config {
        let config_content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Config::default()
    };

    let mut config = config.with_env_overrides()?;

    if args.headed {
        config.headless = false;
    }

    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }

    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent_scrapes = max_concurrent;
    }

    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Headless: {}", config.headless);
    info!("Max concurrent scrapes: {}", config.max_concurrent_scrapes);
    info!("Timeout: {}ms", config.timeout);

    Ok(config)
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
