pub mod canonicalize;
pub mod orchestrator;
pub mod policy;
pub mod robots;
pub mod sitemap;
pub mod webhook;

pub use canonicalize::canonicalize_url;
pub use orchestrator::{CrawlErrorEntry, CrawlErrorsView, CrawlOrchestrator, CrawlStatusView, CrawlSubmission};
pub use policy::PathPolicy;
pub use webhook::{HttpWebhookSender, NoopWebhookSender, WebhookSender};
