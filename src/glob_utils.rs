/// Glob pattern matching for include/exclude file filters
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled include/exclude matcher used by the file walker and watcher
#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PatternFilter {
    /// Build a filter from pattern lists; empty lists mean "match everything"
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include_patterns)?,
            exclude: build_globset(exclude_patterns)?,
        })
    }

    /// Check whether a repo-relative path should be indexed
    pub fn matches(&self, rel_path: &str) -> bool {
        if let Some(exclude) = &self.exclude
            && exclude.is_match(rel_path)
        {
            return false;
        }
        match &self.include {
            Some(include) => include.is_match(rel_path),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().context("Failed to build glob set")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let filter = PatternFilter::new(&[], &[]).unwrap();
        assert!(filter.matches("src/main.rs"));
        assert!(filter.matches("README.md"));
    }

    #[test]
    fn test_include_only() {
        let filter = PatternFilter::new(&strings(&["**/*.rs"]), &[]).unwrap();
        assert!(filter.matches("src/main.rs"));
        assert!(!filter.matches("docs/guide.md"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter =
            PatternFilter::new(&strings(&["**/*.rs"]), &strings(&["target/**"])).unwrap();
        assert!(filter.matches("src/lib.rs"));
        assert!(!filter.matches("target/debug/build.rs"));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(PatternFilter::new(&strings(&["[unclosed"]), &[]).is_err());
    }
}
