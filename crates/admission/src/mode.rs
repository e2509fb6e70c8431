use serde::{Deserialize, Serialize};

/// The six request shapes the admission controller gates.
/// `Status` exists so read-only polling endpoints can still be
/// rate-limited without going through a credit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Scrape,
    Crawl,
    Map,
    Search,
    Extract,
    Status,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scrape => "scrape",
            Mode::Crawl => "crawl",
            Mode::Map => "map",
            Mode::Search => "search",
            Mode::Extract => "extract",
            Mode::Status => "status",
        }
    }

    /// The complementary mode used to combine concurrency ceilings:
    /// `max(acuc.concurrency, otherACUC.concurrency)` where `other` is the
    /// complementary mode (extract vs crawl). Modes outside that pairing
    /// have no documented complement, so they pair with themselves, which
    /// makes `max` a no-op for them.
    pub fn complement(&self) -> Mode {
        match self {
            Mode::Crawl => Mode::Extract,
            Mode::Extract => Mode::Crawl,
            other => *other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_and_extract_are_mutual_complements() {
        assert_eq!(Mode::Crawl.complement(), Mode::Extract);
        assert_eq!(Mode::Extract.complement(), Mode::Crawl);
    }

    #[test]
    fn unpaired_modes_complement_themselves() {
        assert_eq!(Mode::Scrape.complement(), Mode::Scrape);
        assert_eq!(Mode::Status.complement(), Mode::Status);
    }
}
