use serde::{Deserialize, Serialize};
use shared::models::{InternalOptions, ScrapeOptions};
use std::time::Duration;

/// The ordered catalogue of engine identifiers the fallback list builder
/// draws from. Only `Http` ships a concrete, always-available
/// implementation in this crate; the others are placeholders a deployment
/// wires up behind the same `Engine` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineId {
    Http,
    HeadlessBrowser,
    Pdf,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Http => "http",
            EngineId::HeadlessBrowser => "headless_browser",
            EngineId::Pdf => "pdf",
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        match self {
            EngineId::Http => EngineCapabilities {
                mobile: false,
                stealth_proxy: false,
                pdf: false,
            },
            EngineId::HeadlessBrowser => EngineCapabilities {
                mobile: true,
                stealth_proxy: true,
                pdf: false,
            },
            EngineId::Pdf => EngineCapabilities {
                mobile: false,
                stealth_proxy: false,
                pdf: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineCapabilities {
    pub mobile: bool,
    pub stealth_proxy: bool,
    pub pdf: bool,
}

/// Per-attempt context handed to `Engine::scrape`.
#[derive(Debug, Clone)]
pub struct EngineMeta {
    pub url: String,
    pub options: ScrapeOptions,
    pub internal_options: InternalOptions,
    pub timeout: Duration,
}

/// The raw result an `Engine` implementation produces, before markdown
/// derivation or post-transformation.
#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    pub html: Option<String>,
    pub markdown: Option<String>,
    pub status_code: u16,
    pub error: Option<String>,
}

/// One line of the per-engine trace returned alongside a scrape outcome
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineLogEntry {
    pub engine: EngineId,
    pub accepted: bool,
    pub is_long_enough: bool,
    pub is_good_status_code: bool,
    pub has_no_page_error: bool,
    pub reason: String,
    /// Set when this entry was recorded because the engine call itself
    /// hit its per-engine timeout, as opposed to running to completion
    /// and being rejected by `Judgement`. Lets a caller distinguish an
    /// all-engines-timed-out fallback (`SCRAPE_TIMEOUT`) from a genuine
    /// no-accept (`NO_ENGINES_LEFT`).
    #[serde(default)]
    pub timed_out: bool,
}

/// The outcome of `scrape_url`: either an accepted `Document` or a
/// `NoEnginesLeft`-shaped failure carrying the full per-engine trace.
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Success {
        document: shared::models::Document,
        logs: Vec<EngineLogEntry>,
    },
    Failure {
        reason: String,
        logs: Vec<EngineLogEntry>,
    },
}

impl ScrapeOutcome {
    pub fn logs(&self) -> &[EngineLogEntry] {
        match self {
            ScrapeOutcome::Success { logs, .. } => logs,
            ScrapeOutcome::Failure { logs, .. } => logs,
        }
    }

    /// True for a `Failure` whose fallback list is non-empty and every
    /// recorded attempt hit its per-engine timeout, rather than running
    /// to completion and being rejected by `Judgement`.
    pub fn all_attempts_timed_out(&self) -> bool {
        let logs = self.logs();
        !logs.is_empty() && logs.iter().all(|l| l.timed_out)
    }
}
