use url::Url;

/// Minimal `Disallow`-prefix matcher over a `User-agent: *` block. The real
/// robots.txt grammar (wildcards, `Allow` precedence, per-agent groups) is
/// out of scope; this is just enough to honor the common case so the
/// crawl orchestrator has something to check before admitting a URL.
pub fn is_blocked(robots_txt: &str, url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path();

    let mut in_wildcard_group = false;
    let mut disallows: Vec<String> = Vec::new();

    for line in robots_txt.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => in_wildcard_group = value == "*",
            "disallow" if in_wildcard_group && !value.is_empty() => disallows.push(value.to_string()),
            _ => {}
        }
    }

    disallows.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_matching_disallow_prefix() {
        let robots = "User-agent: *\nDisallow: /admin\n";
        assert!(is_blocked(robots, "https://a.test/admin/x"));
        assert!(!is_blocked(robots, "https://a.test/blog"));
    }

    #[test]
    fn ignores_groups_for_other_agents() {
        let robots = "User-agent: GPTBot\nDisallow: /\n";
        assert!(!is_blocked(robots, "https://a.test/anything"));
    }

    #[test]
    fn empty_robots_blocks_nothing() {
        assert!(!is_blocked("", "https://a.test/"));
    }
}
