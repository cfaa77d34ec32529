// 🏷️ Identifier filter - which entities an ingestion run admits
// Patterns are tried as regular expressions; a pattern that does not
// compile is used as a plain prefix.

use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone)]
enum IdPattern {
    Regex(Regex),
    Prefix(String),
}

impl IdPattern {
    fn parse(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => IdPattern::Regex(re),
            Err(e) => {
                debug!(pattern, error = %e, "id filter pattern is not a regex, using prefix match");
                IdPattern::Prefix(pattern.to_string())
            }
        }
    }

    fn matches(&self, id: &str) -> bool {
        match self {
            IdPattern::Regex(re) => re.is_match(id),
            IdPattern::Prefix(prefix) => id.starts_with(prefix.as_str()),
        }
    }
}

/// Empty filter admits every identifier
#[derive(Debug, Clone, Default)]
pub struct IdFilter {
    patterns: Vec<IdPattern>,
}

impl IdFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        IdFilter {
            patterns: patterns.iter().map(|p| IdPattern::parse(p.as_ref())).collect(),
        }
    }

    pub fn allows(&self, id: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(id))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
