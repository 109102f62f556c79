use crate::error::{Result, SyncError};
use globset::{Glob, GlobMatcher};
use std::collections::BTreeSet;
use tracing::debug;

/// Excludes directory entries by exact name or shell glob on the base name.
///
/// Patterns starting with `!` are accepted but never match anything;
/// negation is not implemented.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    names: BTreeSet<String>,
    patterns: Vec<GlobMatcher>,
}

impl IgnoreMatcher {
    pub fn new<'a>(
        ignored_names: impl IntoIterator<Item = &'a String>,
        patterns: impl IntoIterator<Item = &'a String>,
    ) -> Result<Self> {
        let names = ignored_names.into_iter().cloned().collect();

        let mut matchers = Vec::new();
        for pattern in patterns {
            if pattern.starts_with('!') {
                debug!("Negation pattern {} has no effect", pattern);
                continue;
            }
            let glob = Glob::new(pattern).map_err(|source| SyncError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            matchers.push(glob.compile_matcher());
        }

        Ok(Self {
            names,
            patterns: matchers,
        })
    }

    /// Matches nothing
    pub fn empty() -> Self {
        Self {
            names: BTreeSet::new(),
            patterns: Vec::new(),
        }
    }

    pub fn should_ignore(&self, name: &str) -> bool {
        self.names.contains(name) || self.patterns.iter().any(|glob| glob.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn matcher(names: &[&str], patterns: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::new(&strings(names), &strings(patterns)).unwrap()
    }

    #[test]
    fn exact_names_match_literally() {
        let m = matcher(&["node_modules", ".git"], &[]);
        assert!(m.should_ignore("node_modules"));
        assert!(m.should_ignore(".git"));
        assert!(!m.should_ignore("node_modules2"));
        assert!(!m.should_ignore(".github"));
    }

    #[test]
    fn glob_wildcards_and_classes() {
        let m = matcher(&[], &["*.log", "file?.tmp", "[ab]*.bak"]);
        assert!(m.should_ignore("server.log"));
        assert!(m.should_ignore("file1.tmp"));
        assert!(!m.should_ignore("file10.tmp"));
        assert!(m.should_ignore("alpha.bak"));
        assert!(!m.should_ignore("charlie.bak"));
        assert!(!m.should_ignore("log.txt"));
    }

    #[test]
    fn negation_patterns_never_ignore() {
        let m = matcher(&[], &["!important.log", "!*"]);
        assert!(!m.should_ignore("important.log"));
        assert!(!m.should_ignore("anything"));
        assert!(!m.should_ignore("!important.log"));
    }

    #[test]
    fn negation_does_not_override_earlier_match() {
        let m = matcher(&[], &["*.log", "!keep.log"]);
        assert!(m.should_ignore("keep.log"));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = IgnoreMatcher::new(&strings(&[]), &strings(&["[unclosed"])).unwrap_err();
        assert!(matches!(err, SyncError::Pattern { .. }));
    }

    #[test]
    fn empty_matcher_ignores_nothing() {
        assert!(!IgnoreMatcher::empty().should_ignore(".git"));
    }
}
