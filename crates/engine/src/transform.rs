use async_trait::async_trait;
use shared::models::Document;
use shared::{AppError, LlmExtractor};
use std::sync::Arc;

use crate::markdown::extract_links;

/// A single post-transform stage: markdown cleanup, link
/// extraction, screenshot attach, JSON extraction, attribute extraction are
/// all just implementations of this trait run in sequence, so
/// `LlmExtractor`-backed extraction slots in as one more stage rather than
/// a special case inside `scrape_url`.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn apply(&self, document: Document) -> Result<Document, AppError>;
}

/// Collapses runs of blank lines left over from the HTML→markdown
/// reduction.
pub struct MarkdownCleanupTransformer;

#[async_trait]
impl Transformer for MarkdownCleanupTransformer {
    async fn apply(&self, mut document: Document) -> Result<Document, AppError> {
        if let Some(markdown) = document.markdown.take() {
            let cleaned: String = markdown
                .lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n");
            let mut collapsed = String::with_capacity(cleaned.len());
            let mut blank_run = 0;
            for line in cleaned.lines() {
                if line.is_empty() {
                    blank_run += 1;
                    if blank_run > 1 {
                        continue;
                    }
                } else {
                    blank_run = 0;
                }
                collapsed.push_str(line);
                collapsed.push('\n');
            }
            document.markdown = Some(collapsed.trim_end().to_string());
        }
        Ok(document)
    }
}

/// Populates `Document::links` from the raw HTML, if present.
pub struct LinkExtractionTransformer;

#[async_trait]
impl Transformer for LinkExtractionTransformer {
    async fn apply(&self, mut document: Document) -> Result<Document, AppError> {
        if let Some(html) = document.html.as_deref().or(document.raw_html.as_deref()) {
            document.links = extract_links(html, &document.metadata.source_url);
        }
        Ok(document)
    }
}

/// JSON extraction via the opaque `LlmExtractor` interface.
/// `schema` is `None` for a free-form `formats: ["extract"]` request.
pub struct JsonExtractionTransformer {
    extractor: Arc<dyn LlmExtractor>,
    schema: Option<serde_json::Value>,
}

impl JsonExtractionTransformer {
    pub fn new(extractor: Arc<dyn LlmExtractor>, schema: Option<serde_json::Value>) -> Self {
        Self { extractor, schema }
    }
}

#[async_trait]
impl Transformer for JsonExtractionTransformer {
    async fn apply(&self, mut document: Document) -> Result<Document, AppError> {
        let content = document.markdown.clone().unwrap_or_default();
        let extracted = self.extractor.extract(&content, self.schema.as_ref()).await?;
        document.extract = Some(extracted);
        Ok(document)
    }
}

/// Runs an ordered pipeline of transformers over a `Document`, the way
/// `scrape_url` invokes post-transformers after an engine result is
/// accepted.
pub async fn run_transformers(
    mut document: Document,
    transformers: &[Arc<dyn Transformer>],
) -> Result<Document, AppError> {
    for transformer in transformers {
        document = transformer.apply(document).await?;
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::DocumentMetadata;

    fn doc(markdown: &str) -> Document {
        Document {
            markdown: Some(markdown.to_string()),
            html: None,
            raw_html: None,
            links: vec![],
            screenshot: None,
            extract: None,
            metadata: DocumentMetadata {
                source_url: "https://example.com".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn cleanup_collapses_blank_line_runs() {
        let transformer = MarkdownCleanupTransformer;
        let out = transformer.apply(doc("a\n\n\n\nb")).await.unwrap();
        assert_eq!(out.markdown.unwrap(), "a\n\nb");
    }

    #[tokio::test]
    async fn link_extraction_populates_from_html() {
        let mut document = doc("ignored");
        document.html = Some(r#"<a href="/x">x</a>"#.to_string());
        let out = LinkExtractionTransformer.apply(document).await.unwrap();
        assert_eq!(out.links, vec!["https://example.com/x"]);
    }
}
