use shared::config::EngineConfig;

use crate::types::EngineResult;

/// The three success factors feeding an accept/retry verdict: if
/// `is_long_enough || !is_good_status_code`, accept this engine's result —
/// a bad status code is authoritative, so there's no point waiting on
/// other engines hoping for a 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgement {
    pub is_long_enough: bool,
    pub is_good_status_code: bool,
    pub has_no_page_error: bool,
}

impl Judgement {
    pub fn evaluate(result: &EngineResult, config: &EngineConfig) -> Self {
        let markdown_len = result.markdown.as_deref().map(str::len).unwrap_or(0);
        Judgement {
            is_long_enough: markdown_len >= config.min_markdown_length,
            is_good_status_code: result.status_code != 0 && result.status_code < config.max_status_code_for_success,
            has_no_page_error: result.error.is_none(),
        }
    }

    /// A bad status code is authoritative: accept even a short body rather
    /// than burn time on further engines hoping for a 200.
    pub fn accepted(&self) -> bool {
        self.is_long_enough || !self.is_good_status_code
    }

    pub fn reason(&self) -> String {
        if self.accepted() {
            if self.is_long_enough {
                "markdown long enough".to_string()
            } else {
                "non-2xx/3xx status code is authoritative".to_string()
            }
        } else {
            "markdown too short and status code looked fine; trying next engine".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            default_timeout_ms: 30_000,
            min_markdown_length: 100,
            max_status_code_for_success: 300,
        }
    }

    #[test]
    fn bad_status_code_is_accepted_even_with_short_markdown() {
        let result = EngineResult {
            html: None,
            markdown: Some("short".to_string()),
            status_code: 404,
            error: None,
        };
        let judgement = Judgement::evaluate(&result, &config());
        assert!(!judgement.is_long_enough);
        assert!(!judgement.is_good_status_code);
        assert!(judgement.accepted());
    }

    #[test]
    fn short_markdown_with_good_status_is_rejected() {
        let result = EngineResult {
            html: None,
            markdown: Some("short".to_string()),
            status_code: 200,
            error: None,
        };
        let judgement = Judgement::evaluate(&result, &config());
        assert!(!judgement.accepted());
    }

    #[test]
    fn long_markdown_with_good_status_is_accepted() {
        let result = EngineResult {
            html: None,
            markdown: Some("x".repeat(200)),
            status_code: 200,
            error: None,
        };
        let judgement = Judgement::evaluate(&result, &config());
        assert!(judgement.accepted());
    }
}
