//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the route with the longest matching prefix
//! - Return matched route or explicit no-match

use crate::routing::PathPrefixMatcher;

/// Immutable prefix router over routes of type `T`.
#[derive(Debug, Clone)]
pub struct Router<T> {
    routes: Vec<(PathPrefixMatcher, T)>,
}

impl<T> Router<T> {
    pub fn new(routes: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut routes: Vec<(PathPrefixMatcher, T)> = routes
            .into_iter()
            .map(|(prefix, route)| (PathPrefixMatcher::new(prefix), route))
            .collect();
        // Stable sort keeps configuration order among equal prefixes.
        routes.sort_by(|a, b| b.0.prefix().len().cmp(&a.0.prefix().len()));
        Self { routes }
    }

    pub fn route(&self, path: &str) -> Option<&T> {
        self.routes
            .iter()
            .find(|(matcher, _)| matcher.matches(path))
            .map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
