// Domain allow/block policy for outbound fetches

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    /// Host matched a blocked-domain entry
    Blocked(String),
    /// Allow list is set and the host matched none of it
    NotAllowListed,
    /// URL could not be parsed or has no host
    Malformed,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed)
    }

    pub fn describe(&self) -> String {
        match self {
            PolicyDecision::Allowed => "allowed".to_string(),
            PolicyDecision::Blocked(entry) => format!("host matches blocked domain '{}'", entry),
            PolicyDecision::NotAllowListed => "host is not in the allowed domains".to_string(),
            PolicyDecision::Malformed => "URL is malformed or has no host".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl DomainPolicy {
    pub fn new(allowed: &[String], blocked: &[String]) -> Self {
        Self {
            allowed: normalize(allowed),
            blocked: normalize(blocked),
        }
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        self.evaluate(url).is_allowed()
    }

    /// Check a URL against the lists. Anything unparseable is refused.
    pub fn evaluate(&self, url: &str) -> PolicyDecision {
        let Some(host) = extract_host(url) else {
            return PolicyDecision::Malformed;
        };

        if let Some(entry) = self.blocked.iter().find(|entry| host.contains(entry.as_str())) {
            return PolicyDecision::Blocked(entry.clone());
        }

        if !self.allowed.is_empty() && !self.allowed.iter().any(|entry| host.contains(entry.as_str()))
        {
            return PolicyDecision::NotAllowListed;
        }

        PolicyDecision::Allowed
    }
}

fn normalize(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| entry.trim().to_lowercase())
        // an empty entry would be a substring of every host
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Lower-cased network location (host plus explicit port) of a URL
pub fn extract_host(url: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
        && !host.is_empty()
    {
        let host = host.to_lowercase();
        return Some(match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        });
    }
    None
}
