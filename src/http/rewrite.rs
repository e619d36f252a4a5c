//! Ordered URL rewrite rules.
//!
//! Each rule matches the whole path-and-query against a regular expression
//! and substitutes `$1`-style captures into its replacement. The first
//! matching rule wins.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(url_pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("^(?:{})$", url_pattern))?,
            replacement: replacement.into(),
        })
    }

    fn apply(&self, url: &str) -> Option<String> {
        let captures = self.pattern.captures(url)?;
        let mut rewritten = String::new();
        captures.expand(&self.replacement, &mut rewritten);
        Some(rewritten)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewriteRules {
    rules: Vec<RewriteRule>,
}

impl RewriteRules {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewritten URL, or `None` when no rule matches.
    pub fn rewrite(&self, url: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(url))
    }
}
