mod cache;
mod chain;
mod filesystem;
mod memory;

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    model::{DependencyDescriptor, ModuleDescriptor, ModuleRevisionId},
    parser::now_millis,
    version::{DefaultRevisionComparator, RevisionComparator, RevisionMatcher},
};

pub use cache::CachingResolver;
pub use chain::ChainResolver;
pub use filesystem::{FileSystemResolver, DESCRIPTOR_FILE_NAME};
pub use memory::InMemoryResolver;

/// Finds the descriptor of the module revision a dependency asks for.
///
/// Implementations are called from several threads at once.
pub trait ModuleResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, dependency: &DependencyDescriptor)
        -> Result<ResolvedModuleRevision, ResolverError>;
}

impl<R: ModuleResolver + ?Sized> ModuleResolver for Arc<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn resolve(
        &self,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        (**self).resolve(dependency)
    }
}

/// A module revision found by a resolver. The descriptor is frozen.
#[derive(Debug, Clone)]
pub struct ResolvedModuleRevision {
    descriptor: Arc<ModuleDescriptor>,
    resolver: String,
    resolved_at: u64,
    from_cache: bool,
}

impl ResolvedModuleRevision {
    pub fn new(descriptor: Arc<ModuleDescriptor>, resolver: impl Into<String>) -> Self {
        ResolvedModuleRevision {
            descriptor,
            resolver: resolver.into(),
            resolved_at: now_millis(),
            from_cache: false,
        }
    }

    pub fn id(&self) -> &ModuleRevisionId {
        self.descriptor.resolved_revision_id()
    }

    pub fn revision(&self) -> &str {
        self.id().revision()
    }

    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    /// Name of the resolver that found the module.
    pub fn resolver_name(&self) -> &str {
        &self.resolver
    }

    pub fn publication(&self) -> u64 {
        self.descriptor.publication()
    }

    /// When the module was found, in milliseconds since the epoch.
    pub fn resolved_at(&self) -> u64 {
        self.resolved_at
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub(crate) fn cached(&self) -> Self {
        ResolvedModuleRevision {
            from_cache: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    NotFound,
    Transient,
    Invalid,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("module not found: {0}")]
    NotFound(ModuleRevisionId),
    #[error("unable to reach {module}: {message}")]
    Transient {
        module: ModuleRevisionId,
        message: String,
    },
    #[error("invalid module descriptor for {module}: {message}")]
    Invalid {
        module: ModuleRevisionId,
        message: String,
    },
}

impl ResolverError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResolverError::NotFound(_) => FailureKind::NotFound,
            ResolverError::Transient { .. } => FailureKind::Transient,
            ResolverError::Invalid { .. } => FailureKind::Invalid,
        }
    }

    pub fn module(&self) -> &ModuleRevisionId {
        match self {
            ResolverError::NotFound(module)
            | ResolverError::Transient { module, .. }
            | ResolverError::Invalid { module, .. } => module,
        }
    }
}

/// Revisions accepted by `matcher`, highest first.
pub(crate) fn candidates_latest_first(
    matcher: &RevisionMatcher,
    revisions: impl IntoIterator<Item = String>,
) -> Vec<String> {
    let comparator = DefaultRevisionComparator;
    let mut candidates: Vec<String> = revisions
        .into_iter()
        .filter(|revision| matcher.accepts_revision(revision))
        .collect();
    candidates.sort_by(|left, right| comparator.compare(right, left));
    candidates
}

/// Freezes a descriptor found for `requested`.
///
/// The resolved id keeps the requested extra attributes with the revision actually found.
pub(crate) fn freeze_descriptor(
    mut descriptor: ModuleDescriptor,
    requested: &ModuleRevisionId,
) -> Result<Arc<ModuleDescriptor>, ResolverError> {
    if descriptor.module_id() != requested.module_id() {
        return Err(ResolverError::Invalid {
            module: requested.clone(),
            message: format!("descriptor declares {}", descriptor.revision_id()),
        });
    }
    if !descriptor.is_resolved() {
        let resolved = requested.with_revision(descriptor.revision_id().revision());
        if let Err(err) = descriptor.set_resolved_revision_id(resolved) {
            warn!("{err}");
        }
        descriptor.mark_resolved();
    }
    Ok(Arc::new(descriptor))
}
