use regex::Regex;
use shared::AppError;
use std::sync::OnceLock;
use std::time::Duration;

fn loc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)<loc>\s*([^<\s]+)\s*</loc>").expect("static regex"))
}

/// Extracts `<loc>` entries from a sitemap (or sitemap index) document.
/// Not a full XML parser; this is enough to seed the frontier from the
/// common case.
pub fn extract_locations(xml: &str) -> Vec<String> {
    loc_pattern()
        .captures_iter(xml)
        .map(|c| c[1].trim().to_string())
        .collect()
}

pub async fn fetch_sitemap(client: &reqwest::Client, origin_url: &str) -> Result<Vec<String>, AppError> {
    let sitemap_url = format!("{}/sitemap.xml", origin_url.trim_end_matches('/'));
    let response = client
        .get(&sitemap_url)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| AppError::Http(e))?;

    if !response.status().is_success() {
        return Ok(Vec::new());
    }

    let body = response.text().await.map_err(|e| AppError::Http(e))?;
    Ok(extract_locations(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiple_locations() {
        let xml = "<urlset><url><loc>https://a.test/one</loc></url><url><loc>https://a.test/two</loc></url></urlset>";
        assert_eq!(extract_locations(xml), vec!["https://a.test/one", "https://a.test/two"]);
    }

    #[test]
    fn empty_document_yields_no_locations() {
        assert!(extract_locations("<urlset></urlset>").is_empty());
    }
}
