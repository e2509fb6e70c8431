use scraper::{Html, Selector};

/// A hand-rolled, dependency-light HTML→markdown reducer used by
/// `HttpEngine` when an engine doesn't already emit markdown itself. Not a
/// full commonmark renderer — headings, paragraphs, and links are reduced
/// to their text with light structure; everything else is flattened to
/// text nodes separated by blank lines.
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();

    let root = document
        .select(&body_selector)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut out = String::new();
    for node in root.text() {
        let trimmed = node.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    out
}

/// Extracts the set of `href` targets from raw HTML, resolved against
/// `base_url`. Used by the crawl orchestrator's discovery step and by the
/// `LinkExtraction` post-transformer.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    let base = url::Url::parse(base_url).ok();

    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| match &base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Some(href.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_keeps_text() {
        let html = "<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>";
        let md = html_to_markdown(html);
        assert!(md.contains("Title"));
        assert!(md.contains("Hello"));
        assert!(md.contains("world"));
    }

    #[test]
    fn extracts_and_resolves_relative_links() {
        let html = r#"<a href="/about">About</a><a href="https://other.test/x">X</a>"#;
        let links = extract_links(html, "https://example.com/page");
        assert_eq!(links, vec!["https://example.com/about", "https://other.test/x"]);
    }
}
