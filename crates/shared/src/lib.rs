pub mod config;
pub mod error;
pub mod integrations;
pub mod models;
pub mod traits;

pub use config::Config;
pub use error::{AppError, Result, TransportableError};
pub use integrations::{ConfiguredBilling, HttpLlmExtractor};
pub use traits::{Billing, BillableScrape, JobLog, LlmExtractor, MultiEntityClassification, NoopJobLog, TracingJobLog};
