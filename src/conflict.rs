use std::{fmt::Display, str::FromStr, sync::Arc};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    model::{ModuleId, ModuleRevisionId},
    version::{DefaultRevisionComparator, RevisionComparator},
};

/// One revision of a module competing for a place in the resolved graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCandidate {
    pub id: ModuleRevisionId,
    /// Requested by at least one dependency marked `force`.
    pub forced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictResolution {
    pub kept: Vec<ModuleRevisionId>,
    pub evicted: Vec<ModuleRevisionId>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("conflict on {module}: {}", join(.revisions))]
    Conflict {
        module: ModuleId,
        revisions: Vec<ModuleRevisionId>,
    },
}

fn join(revisions: &[ModuleRevisionId]) -> String {
    revisions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decides which revisions of one module stay in the graph.
///
/// Called with at least two candidates, in the order they were discovered.
pub trait ConflictManager: Send + Sync {
    fn name(&self) -> &str;

    fn resolve_conflicts(
        &self,
        module: &ModuleId,
        candidates: &[ConflictCandidate],
    ) -> Result<ConflictResolution, ConflictError>;
}

/// Keeps the highest revision, preferring forced revisions over any other.
#[derive(Debug, Clone)]
pub struct LatestConflictManager {
    comparator: Arc<dyn RevisionComparator>,
}

impl LatestConflictManager {
    pub fn new(comparator: Arc<dyn RevisionComparator>) -> Self {
        LatestConflictManager { comparator }
    }
}

impl Default for LatestConflictManager {
    fn default() -> Self {
        Self::new(Arc::new(DefaultRevisionComparator))
    }
}

impl ConflictManager for LatestConflictManager {
    fn name(&self) -> &str {
        "latest-revision"
    }

    fn resolve_conflicts(
        &self,
        module: &ModuleId,
        candidates: &[ConflictCandidate],
    ) -> Result<ConflictResolution, ConflictError> {
        let forced = candidates.iter().any(|candidate| candidate.forced);
        let winner = candidates
            .iter()
            .filter(|candidate| candidate.forced || !forced)
            .max_by(|left, right| {
                self.comparator
                    .compare(left.id.revision(), right.id.revision())
            });
        let Some(winner) = winner else {
            return Ok(ConflictResolution::default());
        };
        let evicted: Vec<ModuleRevisionId> = candidates
            .iter()
            .filter(|candidate| candidate.id != winner.id)
            .map(|candidate| candidate.id.clone())
            .collect();
        if !evicted.is_empty() {
            warn!(
                "discarded {} revision(s) while resolving conflicts for {module}, keeping {}",
                evicted.len(),
                winner.id.revision()
            );
        }
        Ok(ConflictResolution {
            kept: vec![winner.id.clone()],
            evicted,
        })
    }
}

/// Refuses any conflict.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictConflictManager;

impl ConflictManager for StrictConflictManager {
    fn name(&self) -> &str {
        "strict"
    }

    fn resolve_conflicts(
        &self,
        module: &ModuleId,
        candidates: &[ConflictCandidate],
    ) -> Result<ConflictResolution, ConflictError> {
        match candidates {
            [] | [_] => Ok(ConflictResolution {
                kept: candidates.iter().map(|c| c.id.clone()).collect(),
                evicted: Vec::new(),
            }),
            _ => Err(ConflictError::Conflict {
                module: module.clone(),
                revisions: candidates.iter().map(|c| c.id.clone()).collect(),
            }),
        }
    }
}

/// Keeps every revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllConflictManager;

impl ConflictManager for AllConflictManager {
    fn name(&self) -> &str {
        "all"
    }

    fn resolve_conflicts(
        &self,
        _module: &ModuleId,
        candidates: &[ConflictCandidate],
    ) -> Result<ConflictResolution, ConflictError> {
        Ok(ConflictResolution {
            kept: candidates.iter().map(|c| c.id.clone()).collect(),
            evicted: Vec::new(),
        })
    }
}

/// Conflict manager selectable from configuration or the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    #[default]
    Latest,
    Strict,
    All,
}

impl ConflictStrategy {
    pub fn manager(&self) -> Arc<dyn ConflictManager> {
        match self {
            ConflictStrategy::Latest => Arc::new(LatestConflictManager::default()),
            ConflictStrategy::Strict => Arc::new(StrictConflictManager),
            ConflictStrategy::All => Arc::new(AllConflictManager),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" => Ok(ConflictStrategy::Latest),
            "strict" => Ok(ConflictStrategy::Strict),
            "all" => Ok(ConflictStrategy::All),
            other => Err(format!(
                "unknown conflict strategy `{other}`, expected `latest`, `strict` or `all`"
            )),
        }
    }
}

impl Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategy::Latest => write!(f, "latest"),
            ConflictStrategy::Strict => write!(f, "strict"),
            ConflictStrategy::All => write!(f, "all"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn candidate(revision: &str, forced: bool) -> ConflictCandidate {
        ConflictCandidate {
            id: ModuleRevisionId::new("org", "foo", revision),
            forced,
        }
    }

    fn module() -> ModuleId {
        ModuleId::new("org", "foo")
    }

    #[test]
    fn remove_duplicates() {
        let candidates = [
            candidate("1.0.0", false),
            candidate("3.0.0", false),
            candidate("2.0.0", false),
        ];
        let resolution = LatestConflictManager::default()
            .resolve_conflicts(&module(), &candidates)
            .unwrap();
        assert_eq!(
            resolution,
            ConflictResolution {
                kept: vec![candidate("3.0.0", false).id],
                evicted: vec![candidate("1.0.0", false).id, candidate("2.0.0", false).id],
            }
        );
    }

    #[test]
    fn forced_revision_wins() {
        let candidates = [candidate("1.0", true), candidate("2.0", false)];
        let resolution = LatestConflictManager::default()
            .resolve_conflicts(&module(), &candidates)
            .unwrap();
        assert_eq!(resolution.kept, vec![candidate("1.0", true).id]);
        assert_eq!(resolution.evicted, vec![candidate("2.0", false).id]);
    }

    #[test]
    fn strict_refuses_conflicts() {
        let candidates = [candidate("1.0", false), candidate("2.0", false)];
        let err = StrictConflictManager
            .resolve_conflicts(&module(), &candidates)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "conflict on org#foo: org#foo;1.0, org#foo;2.0"
        );
    }

    #[test]
    fn all_keeps_everything() {
        let candidates = [candidate("1.0", false), candidate("2.0", false)];
        let resolution = AllConflictManager
            .resolve_conflicts(&module(), &candidates)
            .unwrap();
        assert_eq!(resolution.kept.len(), 2);
        assert!(resolution.evicted.is_empty());
    }

    #[test]
    fn parse_strategy() {
        assert_eq!(
            "Strict".parse::<ConflictStrategy>(),
            Ok(ConflictStrategy::Strict)
        );
        assert!("newest".parse::<ConflictStrategy>().is_err());
        assert_eq!(ConflictStrategy::default().manager().name(), "latest-revision");
    }
}
