// Hostname blocklist. Loaded once at startup, read-only afterwards.

use std::collections::HashSet;
use std::path::Path;

use crate::error::RuleLoadError;

/// Decides whether a hostname belongs to an advertising/tracking domain.
///
/// Block and exception rules are stored as normalized domains; a host matches
/// when it or any of its parent domains is listed. Exceptions win.
#[derive(Debug, Clone, Default)]
pub struct BlocklistMatcher {
    blocked: HashSet<String>,
    allowed: HashSet<String>,
}

enum Rule {
    Block(String),
    Allow(String),
}

impl BlocklistMatcher {
    /// Matcher with no rules: classifies nothing as ad traffic.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a matcher from rule lines (Adblock domain rules, hosts entries or bare domains).
    pub fn from_rules<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::empty();
        for line in lines {
            match parse_line(line.as_ref()) {
                Some(Rule::Block(domain)) => {
                    matcher.blocked.insert(domain);
                }
                Some(Rule::Allow(domain)) => {
                    matcher.allowed.insert(domain);
                }
                None => {}
            }
        }
        matcher
    }

    /// Read and parse a rule file. Fails when the file is unreadable or yields no rule.
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, RuleLoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let matcher = Self::from_rules(content.lines());
        if matcher.rule_count() == 0 {
            return Err(RuleLoadError::Empty(path.display().to_string()));
        }
        Ok(matcher)
    }

    /// Like [`try_load`](Self::try_load) but never fails: a bad source degrades to
    /// the empty matcher after a single warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match Self::try_load(path) {
            Ok(matcher) => {
                tracing::info!(
                    blocked = matcher.blocked.len(),
                    exceptions = matcher.allowed.len(),
                    "blocklist loaded"
                );
                matcher
            }
            Err(e) => {
                tracing::warn!(error = %e, "blocklist unavailable; no traffic will be classified as ads");
                Self::empty()
            }
        }
    }

    pub fn rule_count(&self) -> usize {
        self.blocked.len() + self.allowed.len()
    }

    /// `true` when `hostname` or one of its parent domains is blocked and not excepted.
    pub fn classify(&self, hostname: &str) -> bool {
        if self.blocked.is_empty() {
            return false;
        }
        let host = hostname.trim().trim_end_matches('.');
        if host.is_empty() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let mut blocked = false;
        for suffix in suffixes(&host) {
            if self.allowed.contains(suffix) {
                return false;
            }
            blocked = blocked || self.blocked.contains(suffix);
        }
        blocked
    }
}

/// `a.b.c` -> `a.b.c`, `b.c`, `c`
fn suffixes(host: &str) -> impl Iterator<Item = &str> {
    std::iter::once(host).chain(host.match_indices('.').map(move |(i, _)| &host[i + 1..]))
}

fn parse_line(line: &str) -> Option<Rule> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
    {
        return None;
    }
    // Cosmetic (element hiding) rules never name a request host.
    if line.contains("##") || line.contains("#@#") || line.contains("#?#") {
        return None;
    }

    if let Some(rest) = line.strip_prefix("@@") {
        return parse_adblock_domain(rest).map(Rule::Allow);
    }
    if line.starts_with("||") {
        return parse_adblock_domain(line).map(Rule::Block);
    }

    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    match parts.next() {
        Some(domain) if is_sink_address(first) => {
            let domain = normalize(domain);
            if is_localhost(&domain) || !is_valid_domain(&domain) {
                return None;
            }
            Some(Rule::Block(domain))
        }
        Some(_) => None,
        None => {
            let domain = normalize(first);
            is_valid_domain(&domain).then_some(Rule::Block(domain))
        }
    }
}

/// `||ads.example.com^$third-party` -> `ads.example.com`
fn parse_adblock_domain(rule: &str) -> Option<String> {
    let rest = rule.strip_prefix("||")?;
    let end = rest
        .find(['^', '$', '/', '|'])
        .unwrap_or(rest.len());
    let after = &rest[end..];
    // Path rules block individual URLs, not the whole host.
    if after.starts_with('/') && after.len() > 1 {
        return None;
    }
    let domain = normalize(&rest[..end]);
    is_valid_domain(&domain).then_some(domain)
}

fn is_sink_address(s: &str) -> bool {
    matches!(s, "0.0.0.0" | "127.0.0.1" | "::" | "::1" | "0:0:0:0:0:0:0:0")
}

fn is_localhost(domain: &str) -> bool {
    matches!(
        domain,
        "localhost" | "localhost.localdomain" | "local" | "broadcasthost" | "ip6-localhost"
    )
}

fn normalize(domain: &str) -> String {
    let domain = domain.split('#').next().unwrap_or(domain).trim();
    domain.trim_end_matches('.').to_ascii_lowercase()
}

fn is_valid_domain(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 || !s.contains('.') {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}
