use async_trait::async_trait;
use shared::AppError;

/// Expands a `/*`-suffixed URL pattern into a list of concrete URLs — the
/// same job the map endpoint does for a client, but used internally to
/// resolve extract requests. Kept as an opaque seam, grounded the same way
/// as `crawl::sitemap`'s best-effort `<loc>` scrape.
#[async_trait]
pub trait UrlExpander: Send + Sync {
    /// `pattern` is a URL ending in `/*`; the host/path prefix before the
    /// `*` is what gets expanded.
    async fn expand(&self, pattern: &str) -> Result<Vec<String>, AppError>;
}

/// Expands a `/*` pattern by reading the origin's sitemap, the same
/// best-effort XML scrape `crawl::sitemap` uses to seed a crawl's frontier,
/// filtered down to URLs sharing the pattern's prefix.
pub struct SitemapUrlExpander {
    http: reqwest::Client,
}

impl SitemapUrlExpander {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }
}

impl Default for SitemapUrlExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlExpander for SitemapUrlExpander {
    async fn expand(&self, pattern: &str) -> Result<Vec<String>, AppError> {
        let prefix = pattern.trim_end_matches('*');
        let origin = prefix.trim_end_matches('/');
        let urls = crawl::sitemap::fetch_sitemap(&self.http, origin).await?;
        Ok(urls.into_iter().filter(|u| u.starts_with(prefix)).collect())
    }
}

/// Test double returning a scripted expansion, used by extract orchestrator
/// tests so they don't depend on network access.
pub struct FakeUrlExpander {
    pub urls: Vec<String>,
}

#[async_trait]
impl UrlExpander for FakeUrlExpander {
    async fn expand(&self, _pattern: &str) -> Result<Vec<String>, AppError> {
        Ok(self.urls.clone())
    }
}

/// Resolves a request's raw url list into concrete URLs: `/*`-suffixed
/// entries are expanded, everything else passes through unchanged. Order
/// is preserved for stable-position reassembly.
pub async fn resolve_urls(expander: &dyn UrlExpander, urls: &[String]) -> Result<Vec<String>, AppError> {
    let mut resolved = Vec::with_capacity(urls.len());
    for url in urls {
        if let Some(pattern) = url.strip_suffix("/*").map(|_| url.as_str()) {
            resolved.extend(expander.expand(pattern).await?);
        } else {
            resolved.push(url.clone());
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_plain_urls_unchanged() {
        let expander = FakeUrlExpander { urls: vec![] };
        let resolved = resolve_urls(&expander, &["https://a.test/page".to_string()]).await.unwrap();
        assert_eq!(resolved, vec!["https://a.test/page".to_string()]);
    }

    #[tokio::test]
    async fn expands_star_suffixed_urls() {
        let expander = FakeUrlExpander {
            urls: vec!["https://a.test/1".to_string(), "https://a.test/2".to_string()],
        };
        let resolved = resolve_urls(&expander, &["https://a.test/*".to_string()]).await.unwrap();
        assert_eq!(resolved.len(), 2);
    }
}
