//! Page metadata extraction
//!
//! Collects `<meta>` name/property pairs in document order, the canonical
//! link and the document language. Extraction problems are reported inside
//! the returned map under `extraction_error` and never fail a scrape.

use crate::engine::PageHandle;
use crate::{Metadata, ScrapeError};
use tracing::debug;

pub const CANONICAL_KEY: &str = "canonical";
pub const LANGUAGE_KEY: &str = "language";
pub const EXTRACTION_ERROR_KEY: &str = "extraction_error";

/// Extract metadata from a loaded page. Later duplicate keys overwrite
/// earlier ones.
pub async fn extract_metadata(page: &dyn PageHandle) -> Metadata {
    let mut meta = Metadata::new();

    if let Err(e) = collect(page, &mut meta).await {
        debug!("Metadata extraction stopped early: {}", e);
        meta.insert(EXTRACTION_ERROR_KEY.to_string(), e.to_string());
    }

    meta
}

async fn collect(page: &dyn PageHandle, meta: &mut Metadata) -> Result<(), ScrapeError> {
    for tag in page.query_selector_all("meta").await? {
        let name = non_empty(tag.attribute("name").await?);
        let property = non_empty(tag.attribute("property").await?);
        let content = non_empty(tag.attribute("content").await?);

        match (name, property, content) {
            (Some(name), _, Some(content)) => {
                meta.insert(name, content);
            }
            (None, Some(property), Some(content)) => {
                meta.insert(property, content);
            }
            _ => {}
        }
    }

    if let Some(link) = page.query_selector(r#"link[rel="canonical"]"#).await? {
        if let Some(href) = link.attribute("href").await? {
            meta.insert(CANONICAL_KEY.to_string(), href);
        }
    }

    if let Some(html) = page.query_selector("html").await? {
        if let Some(lang) = non_empty(html.attribute("lang").await?) {
            meta.insert(LANGUAGE_KEY.to_string(), lang);
        }
    }

    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
