//! Exclusion filter - paths that never reach an auto-save commit

use crate::{Error, Result};
use glob::{MatchOptions, Pattern};

/// `*` crosses `/`, matching how git pathspecs treat `*.log`
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled set of exclusion globs
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Pattern>,
}

impl ExclusionFilter {
    /// Compile `patterns` in order. Blank entries are skipped.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                // "build/" means the directory, same as "build"
                let p = p.trim_end_matches('/');
                Pattern::new(p).map_err(|source| Error::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether `path` (repository relative, `/`-separated) is excluded.
    ///
    /// A pattern excludes a path it matches outright, or any path beneath a
    /// directory it matches.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            pattern.matches_with(path, MATCH_OPTIONS)
                || path
                    .match_indices('/')
                    .any(|(i, _)| pattern.matches_with(&path[..i], MATCH_OPTIONS))
        })
    }

    /// The subset of `tracked` that must be untracked, in input order
    pub fn select<'a, I>(&self, tracked: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.is_empty() {
            return Vec::new();
        }
        tracked
            .into_iter()
            .filter(|path| self.is_excluded(path))
            .map(str::to_string)
            .collect()
    }
}
