use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;

use crate::{
    model::{DependencyDescriptor, ModuleDescriptor, ModuleId},
    version::{DefaultRevisionComparator, RevisionComparator, RevisionMatcher},
};

use super::{freeze_descriptor, ModuleResolver, ResolvedModuleRevision, ResolverError};

/// Serves descriptors registered up front. Mostly useful to tests and embedders
/// that build descriptors programmatically.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    name: String,
    modules: HashMap<ModuleId, Vec<ModuleDescriptor>>,
    unavailable: HashSet<ModuleId>,
    calls: AtomicUsize,
}

impl InMemoryResolver {
    pub fn new(name: impl Into<String>) -> Self {
        InMemoryResolver {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_module(&mut self, descriptor: ModuleDescriptor) {
        let revisions = self
            .modules
            .entry(descriptor.module_id().clone())
            .or_default();
        revisions.retain(|known| known.revision_id() != descriptor.revision_id());
        revisions.push(descriptor);
    }

    pub fn with_module(mut self, descriptor: ModuleDescriptor) -> Self {
        self.add_module(descriptor);
        self
    }

    /// Requests for `module` fail as if its repository could not be reached.
    pub fn set_unavailable(&mut self, module: ModuleId) {
        self.unavailable.insert(module);
    }

    /// Number of `resolve` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModuleResolver for InMemoryResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let requested = dependency.dependency_revision_id();
        if self.unavailable.contains(requested.module_id()) {
            return Err(ResolverError::Transient {
                module: requested.clone(),
                message: format!("{} is unavailable", self.name),
            });
        }
        let matcher = RevisionMatcher::parse(requested.revision());
        let comparator = DefaultRevisionComparator;
        let found = self
            .modules
            .get(requested.module_id())
            .into_iter()
            .flatten()
            .filter(|descriptor| {
                matcher.accepts(descriptor.revision_id().revision(), descriptor.status())
            })
            .max_by(|left, right| {
                comparator.compare(left.revision_id().revision(), right.revision_id().revision())
            });
        match found {
            Some(descriptor) => {
                debug!(
                    "{} found {} for {}",
                    self.name,
                    descriptor.revision_id(),
                    requested
                );
                let descriptor = freeze_descriptor(descriptor.clone(), requested)?;
                Ok(ResolvedModuleRevision::new(descriptor, &self.name))
            }
            None => Err(ResolverError::NotFound(requested.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{model::ModuleRevisionId, resolver::FailureKind};

    use pretty_assertions::assert_eq;

    fn module(revision: &str, status: &str) -> ModuleDescriptor {
        let mut md = ModuleDescriptor::new(ModuleRevisionId::new("org", "lib", revision));
        md.set_status(status).unwrap();
        md
    }

    fn request(revision: &str) -> DependencyDescriptor {
        DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("org", "lib", revision),
        )
    }

    fn resolver() -> InMemoryResolver {
        InMemoryResolver::new("memory")
            .with_module(module("1.0", "release"))
            .with_module(module("1.1", "milestone"))
            .with_module(module("2.0-rc1", "integration"))
    }

    #[test]
    fn exact_revision() {
        let resolved = resolver().resolve(&request("1.1")).unwrap();
        assert_eq!(resolved.revision(), "1.1");
        assert_eq!(resolved.resolver_name(), "memory");
        assert!(resolved.descriptor().is_resolved());
        assert!(!resolved.is_from_cache());
    }

    #[test]
    fn dynamic_revisions() {
        let resolver = resolver();
        assert_eq!(
            resolver
                .resolve(&request("latest.integration"))
                .unwrap()
                .revision(),
            "2.0-rc1"
        );
        assert_eq!(
            resolver
                .resolve(&request("latest.milestone"))
                .unwrap()
                .revision(),
            "1.1"
        );
        assert_eq!(resolver.resolve(&request("1.+")).unwrap().revision(), "1.1");
        assert_eq!(resolver.calls(), 3);
    }

    #[test]
    fn missing_module() {
        let err = resolver().resolve(&request("3.0")).unwrap_err();
        assert_eq!(
            err,
            ResolverError::NotFound(ModuleRevisionId::new("org", "lib", "3.0"))
        );
    }

    #[test]
    fn unavailable_module() {
        let mut resolver = resolver();
        resolver.set_unavailable(ModuleId::new("org", "lib"));
        let err = resolver.resolve(&request("1.0")).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
    }
}
