use shared::AppError;
use url::Url;

/// Drops the fragment, optionally the query string, lower-cases the scheme
/// and host, strips a default port, and optionally strips a leading `www.`.
/// Idempotent: `canonicalize(canonicalize(u)) == canonicalize(u)`, which
/// the frontier's dedup set relies on.
pub fn canonicalize_url(raw: &str, drop_query: bool, strip_www: bool) -> Result<String, AppError> {
    let mut url = Url::parse(raw).map_err(|e| AppError::BadRequest(format!("invalid url {raw}: {e}")))?;

    url.set_fragment(None);
    if drop_query {
        url.set_query(None);
    }

    let scheme = url.scheme().to_lowercase();
    url.set_scheme(&scheme)
        .map_err(|_| AppError::BadRequest(format!("unsupported scheme in {raw}")))?;

    if let Some(host) = url.host_str() {
        let mut host = host.to_lowercase();
        if strip_www {
            if let Some(stripped) = host.strip_prefix("www.") {
                host = stripped.to_string();
            }
        }
        url.set_host(Some(&host))
            .map_err(|e| AppError::BadRequest(format!("invalid host in {raw}: {e}")))?;
    }

    match (url.scheme(), url.port()) {
        ("http", Some(80)) | ("https", Some(443)) => {
            let _ = url.set_port(None);
        }
        _ => {}
    }

    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_idempotent() {
        let once = canonicalize_url("HTTPS://WWW.Example.com:443/foo?x=1#frag", false, true).unwrap();
        let twice = canonicalize_url(&once, false, true).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn drops_fragment_always() {
        let out = canonicalize_url("https://example.com/foo#section", false, true).unwrap();
        assert!(!out.contains('#'));
    }

    #[test]
    fn drops_query_when_requested() {
        let out = canonicalize_url("https://example.com/foo?a=1", true, true).unwrap();
        assert_eq!(out, "https://example.com/foo");
    }

    #[test]
    fn keeps_query_by_default() {
        let out = canonicalize_url("https://example.com/foo?a=1", false, true).unwrap();
        assert_eq!(out, "https://example.com/foo?a=1");
    }

    #[test]
    fn strips_www_and_default_port() {
        let out = canonicalize_url("https://www.example.com:443/", false, true).unwrap();
        assert_eq!(out, "https://example.com/");
    }

    #[test]
    fn keeps_www_when_not_requested() {
        let out = canonicalize_url("https://www.example.com/", false, false).unwrap();
        assert_eq!(out, "https://www.example.com/");
    }

    #[test]
    fn rejects_unparseable_url() {
        assert!(canonicalize_url("not a url", false, true).is_err());
    }
}
