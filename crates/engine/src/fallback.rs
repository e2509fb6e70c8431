use shared::models::ScrapeOptions;

use crate::types::EngineId;

/// The static, ordered catalogue fallback lists are filtered from. Order
/// matters: earlier engines are tried first.
const CATALOGUE: [EngineId; 3] = [EngineId::Http, EngineId::HeadlessBrowser, EngineId::Pdf];

/// Builds the ordered engine fallback list for a scrape request: filters
/// the static catalogue by the capability flags the request actually
/// needs (`mobile`, `stealth_proxy`). PDF-only engine selection for
/// `format: pdf`-style requests is out of scope here so `pdf` is never
/// requested, but the filter stays general.
pub fn build_fallback_list(options: &ScrapeOptions) -> Vec<EngineId> {
    CATALOGUE
        .into_iter()
        .filter(|id| {
            let caps = id.capabilities();
            (!options.mobile || caps.mobile) && (!options.stealth_proxy || caps.stealth_proxy)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_allows_any_engine() {
        let options = ScrapeOptions::default();
        assert_eq!(
            build_fallback_list(&options),
            vec![EngineId::Http, EngineId::HeadlessBrowser, EngineId::Pdf]
        );
    }

    #[test]
    fn mobile_requests_only_mobile_capable_engines() {
        let options = ScrapeOptions {
            mobile: true,
            ..Default::default()
        };
        assert_eq!(build_fallback_list(&options), vec![EngineId::HeadlessBrowser]);
    }

    #[test]
    fn stealth_proxy_requests_only_stealth_capable_engines() {
        let options = ScrapeOptions {
            stealth_proxy: true,
            ..Default::default()
        };
        assert_eq!(build_fallback_list(&options), vec![EngineId::HeadlessBrowser]);
    }
}
