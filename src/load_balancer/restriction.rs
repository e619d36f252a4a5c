//! Origin-restriction strategy.
//!
//! The restriction cookie holds comma-separated regular expressions. An
//! origin qualifies when any expression matches its whole id, and a random
//! qualifying origin is chosen. A pattern that does not compile matches
//! every origin. Without a cookie the delegate decides.

use std::sync::Arc;

use regex::Regex;
use tracing::error;

use crate::load_balancer::{ActiveOrigins, LoadBalancer, Preferences, RemoteHost};
use crate::origin::OriginId;

pub struct OriginRestriction {
    origins: Arc<dyn ActiveOrigins>,
    delegate: Arc<dyn LoadBalancer>,
}

enum Matcher {
    Pattern(Regex),
    Any,
}

impl Matcher {
    fn matches(&self, id: &OriginId) -> bool {
        match self {
            Matcher::Pattern(regex) => regex.is_match(id.as_str()),
            Matcher::Any => true,
        }
    }
}

fn parse_restriction(cookie: &str) -> Vec<Matcher> {
    cookie
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| match Regex::new(&format!("^(?:{})$", pattern)) {
            Ok(regex) => Matcher::Pattern(regex),
            Err(e) => {
                error!(pattern = %pattern, error = %e, "Invalid origin restriction pattern, matching all origins");
                Matcher::Any
            }
        })
        .collect()
}

impl OriginRestriction {
    pub fn new(origins: Arc<dyn ActiveOrigins>, delegate: Arc<dyn LoadBalancer>) -> Self {
        Self { origins, delegate }
    }
}

impl LoadBalancer for OriginRestriction {
    fn choose(&self, preferences: &Preferences) -> Option<RemoteHost> {
        let Some(cookie) = preferences.preferred_origins.as_deref() else {
            return self.delegate.choose(preferences);
        };

        let matchers = parse_restriction(cookie);
        let hosts = self.origins.snapshot();
        let candidates: Vec<&RemoteHost> = hosts
            .iter()
            .filter(|host| !preferences.avoids(host.id()))
            .filter(|host| matchers.iter().any(|m| m.matches(host.id())))
            .collect();

        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{RoundRobin, StaticOrigins};
    use std::collections::HashSet;

    use crate::testing::{fake_host, HostBehaviour};

    fn restriction(ids: &[&str]) -> OriginRestriction {
        let hosts = ids
            .iter()
            .map(|id| fake_host("shop", id, HostBehaviour::status(200)).0)
            .collect();
        let origins: Arc<dyn ActiveOrigins> = Arc::new(StaticOrigins::new(hosts));
        OriginRestriction::new(origins.clone(), Arc::new(RoundRobin::new(origins)))
    }

    fn restrict(cookie: &str) -> Preferences {
        Preferences {
            preferred_origins: Some(cookie.to_string()),
            avoid_origins: Vec::new(),
        }
    }

    fn chosen(lb: &OriginRestriction, preferences: &Preferences, rounds: usize) -> HashSet<String> {
        (0..rounds)
            .filter_map(|_| lb.choose(preferences))
            .map(|h| h.id().to_string())
            .collect()
    }

    #[test]
    fn exact_id_restricts_to_one_origin() {
        let lb = restriction(&["a1", "a2", "b1"]);
        assert_eq!(chosen(&lb, &restrict("a2"), 20), HashSet::from(["a2".to_string()]));
    }

    #[test]
    fn patterns_match_whole_id() {
        let lb = restriction(&["a1", "a2", "ba1"]);
        let picks = chosen(&lb, &restrict("a.*"), 50);
        assert!(picks.iter().all(|id| id.starts_with('a')));
        assert!(!picks.contains("ba1"));
    }

    #[test]
    fn comma_separated_patterns_combine() {
        let lb = restriction(&["a1", "b1", "c1"]);
        let picks = chosen(&lb, &restrict("a1, c.*"), 100);
        assert_eq!(picks, HashSet::from(["a1".to_string(), "c1".to_string()]));
    }

    #[test]
    fn no_match_yields_nothing() {
        let lb = restriction(&["a1", "a2"]);
        assert!(lb.choose(&restrict("z.*")).is_none());
    }

    #[test]
    fn invalid_pattern_matches_everything() {
        let lb = restriction(&["a1", "a2"]);
        let picks = chosen(&lb, &restrict("(unclosed"), 100);
        assert_eq!(picks.len(), 2);
    }

    #[test]
    fn missing_cookie_uses_delegate() {
        let lb = restriction(&["a1", "a2"]);
        let picks = chosen(&lb, &Preferences::default(), 2);
        assert_eq!(picks.len(), 2);
    }
}
