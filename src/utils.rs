use crate::{ScrapeError, ScrapeResult};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Drive `future` to completion from synchronous code.
///
/// Inside a tokio runtime the current thread cannot block on another
/// runtime, so the future runs on a fresh thread with its own runtime and
/// the caller waits for that thread.
pub fn run_blocking<F, T>(future: F) -> Result<T, ScrapeError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    fn build_runtime() -> Result<tokio::runtime::Runtime, ScrapeError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ScrapeError::RuntimeError(format!("Failed to build runtime: {e}")))
    }

    match tokio::runtime::Handle::try_current() {
        Ok(_) => std::thread::Builder::new()
            .name("scrape-blocking".to_string())
            .spawn(move || build_runtime().map(|runtime| runtime.block_on(future)))
            .map_err(|e| ScrapeError::RuntimeError(format!("Failed to spawn thread: {e}")))?
            .join()
            .map_err(|_| ScrapeError::RuntimeError("Blocking scrape thread panicked".to_string()))?,
        Err(_) => Ok(build_runtime()?.block_on(future)),
    }
}

/// Copy of `result` suitable for debug output: the markup is replaced by a
/// placeholder carrying its length in characters.
pub fn debug_artifact(result: &ScrapeResult) -> ScrapeResult {
    let mut artifact = result.clone();
    if let Some(html) = artifact.html.as_mut().filter(|html| !html.is_empty()) {
        *html = format!("<HTML content - {} characters>", html.chars().count());
    }
    artifact
}

pub async fn save_result_to_file(result: &ScrapeResult, path: &Path) -> Result<(), ScrapeError> {
    let json = serde_json::to_string_pretty(&debug_artifact(result))?;
    write_creating_parent(path, json).await
}

pub async fn save_results_to_file(results: &[ScrapeResult], path: &Path) -> Result<(), ScrapeError> {
    let artifacts: Vec<ScrapeResult> = results.iter().map(debug_artifact).collect();
    let json = serde_json::to_string_pretty(&artifacts)?;
    write_creating_parent(path, json).await
}

async fn write_creating_parent(path: &Path, contents: String) -> Result<(), ScrapeError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Parse `url`, accepting only http and https.
pub fn validate_url(url: &str) -> Result<Url, ScrapeError> {
    let parsed = Url::parse(url).map_err(|e| ScrapeError::NavigationFailed(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ScrapeError::NavigationFailed(format!(
            "{url}: unsupported scheme \"{scheme}\""
        ))),
    }
}

/// URLs from a list file: one per line, blank lines and `#` comments skipped.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}
