use regex::Regex;
use shared::models::CrawlerOptions;
use shared::AppError;

/// Compiled include/exclude path policy; each pattern must compile at
/// submission time or the request is rejected with 400. A URL passes iff
/// it matches some include pattern (or none are given) and no exclude
/// pattern.
pub struct PathPolicy {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PathPolicy {
    pub fn compile(options: &CrawlerOptions) -> Result<Self, AppError> {
        let include = options
            .include_paths
            .iter()
            .map(|p| Regex::new(p).map_err(|e| AppError::BadRequest(format!("invalid includePaths regex {p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = options
            .exclude_paths
            .iter()
            .map(|p| Regex::new(p).map_err(|e| AppError::BadRequest(format!("invalid excludePaths regex {p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { include, exclude })
    }

    pub fn allows(&self, url: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(url));
        let excluded = self.exclude.iter().any(|r| r.is_match(url));
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(include: &[&str], exclude: &[&str]) -> CrawlerOptions {
        CrawlerOptions {
            include_paths: include.iter().map(|s| s.to_string()).collect(),
            exclude_paths: exclude.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_include_admits_everything_not_excluded() {
        let policy = PathPolicy::compile(&opts(&[], &["^/admin"])).unwrap();
        assert!(policy.allows("https://a.test/"));
        assert!(policy.allows("https://a.test/blog"));
        assert!(!policy.allows("https://a.test/admin/x"));
    }

    #[test]
    fn include_restricts_to_matches() {
        let policy = PathPolicy::compile(&opts(&["^https://a.test/blog"], &[])).unwrap();
        assert!(policy.allows("https://a.test/blog/post-1"));
        assert!(!policy.allows("https://a.test/other"));
    }

    #[test]
    fn rejects_invalid_regex_at_compile_time() {
        let err = PathPolicy::compile(&opts(&["("], &[])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
