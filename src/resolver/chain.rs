use std::{cmp::Ordering, sync::Arc};

use log::{debug, warn};

use crate::{
    model::DependencyDescriptor,
    version::{is_dynamic, DefaultRevisionComparator, RevisionComparator},
};

use super::{ModuleResolver, ResolvedModuleRevision, ResolverError};

/// Asks several resolvers in turn.
///
/// An exact revision is taken from the first resolver that has it. A dynamic revision
/// is asked to every resolver and the highest answer wins, the earliest resolver on ties.
/// Transient failures are retried before moving on; an invalid descriptor stops the chain.
pub struct ChainResolver {
    name: String,
    resolvers: Vec<Arc<dyn ModuleResolver>>,
    retries: usize,
}

impl ChainResolver {
    pub fn new(name: impl Into<String>) -> Self {
        ChainResolver {
            name: name.into(),
            resolvers: Vec::new(),
            retries: 0,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Extra attempts after a transient failure, per resolver.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn resolvers(&self) -> &[Arc<dyn ModuleResolver>] {
        &self.resolvers
    }

    fn resolve_with(
        &self,
        resolver: &dyn ModuleResolver,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        let mut attempt = 0;
        loop {
            match resolver.resolve(dependency) {
                Err(err @ ResolverError::Transient { .. }) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "{} failed, retrying ({attempt}/{}): {err}",
                        resolver.name(),
                        self.retries
                    );
                }
                result => return result,
            }
        }
    }
}

impl ModuleResolver for ChainResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        let requested = dependency.dependency_revision_id();
        let dynamic = is_dynamic(requested.revision());
        let comparator = DefaultRevisionComparator;
        let mut best: Option<ResolvedModuleRevision> = None;
        let mut transient = None;

        for resolver in &self.resolvers {
            match self.resolve_with(resolver.as_ref(), dependency) {
                Ok(resolved) if !dynamic => return Ok(resolved),
                Ok(resolved) => {
                    let better = best.as_ref().map_or(true, |best| {
                        comparator.compare(resolved.revision(), best.revision())
                            == Ordering::Greater
                    });
                    if better {
                        best = Some(resolved);
                    }
                }
                Err(ResolverError::NotFound(_)) => {
                    debug!("{} did not find {requested}", resolver.name());
                }
                Err(err @ ResolverError::Transient { .. }) => {
                    warn!("{} gave up on {requested}: {err}", resolver.name());
                    transient = Some(err);
                }
                Err(err @ ResolverError::Invalid { .. }) => return Err(err),
            }
        }

        match (best, transient) {
            (Some(best), _) => Ok(best),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ResolverError::NotFound(requested.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::{
        model::{ModuleDescriptor, ModuleRevisionId},
        resolver::{FailureKind, InMemoryResolver},
    };

    use pretty_assertions::assert_eq;

    /// Fails transiently a given number of times, then defers to an in-memory resolver.
    struct Flaky {
        failures: AtomicUsize,
        inner: InMemoryResolver,
    }

    impl ModuleResolver for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn resolve(
            &self,
            dependency: &DependencyDescriptor,
        ) -> Result<ResolvedModuleRevision, ResolverError> {
            let remaining = self.failures.load(AtomicOrdering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, AtomicOrdering::SeqCst);
                return Err(ResolverError::Transient {
                    module: dependency.dependency_revision_id().clone(),
                    message: "connection reset".to_string(),
                });
            }
            self.inner.resolve(dependency)
        }
    }

    fn memory(name: &str, revisions: &[&str]) -> InMemoryResolver {
        revisions
            .iter()
            .fold(InMemoryResolver::new(name), |resolver, revision| {
                resolver.with_module(ModuleDescriptor::new(ModuleRevisionId::new(
                    "org", "lib", *revision,
                )))
            })
    }

    fn request(revision: &str) -> DependencyDescriptor {
        DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("org", "lib", revision),
        )
    }

    #[test]
    fn first_resolver_wins_for_exact_revisions() {
        let chain = ChainResolver::new("chain")
            .with_resolver(Arc::new(memory("first", &["1.0"])))
            .with_resolver(Arc::new(memory("second", &["1.0", "2.0"])));
        assert_eq!(
            chain.resolve(&request("1.0")).unwrap().resolver_name(),
            "first"
        );
        assert_eq!(
            chain.resolve(&request("2.0")).unwrap().resolver_name(),
            "second"
        );
    }

    #[test]
    fn highest_revision_wins_for_dynamic_revisions() {
        let chain = ChainResolver::new("chain")
            .with_resolver(Arc::new(memory("first", &["1.0", "1.5"])))
            .with_resolver(Arc::new(memory("second", &["1.2", "1.7"])));
        let resolved = chain.resolve(&request("1.+")).unwrap();
        assert_eq!(resolved.revision(), "1.7");
        assert_eq!(resolved.resolver_name(), "second");
    }

    #[test]
    fn transient_failures_are_retried() {
        let flaky = Flaky {
            failures: AtomicUsize::new(2),
            inner: memory("flaky", &["1.0"]),
        };
        let chain = ChainResolver::new("chain")
            .with_resolver(Arc::new(flaky))
            .with_retries(2);
        assert_eq!(chain.resolve(&request("1.0")).unwrap().revision(), "1.0");
    }

    #[test]
    fn exhausted_retries_report_transient_failure() {
        let flaky = Flaky {
            failures: AtomicUsize::new(5),
            inner: memory("flaky", &["1.0"]),
        };
        let chain = ChainResolver::new("chain")
            .with_resolver(Arc::new(flaky))
            .with_resolver(Arc::new(memory("empty", &[])))
            .with_retries(1);
        assert_eq!(
            chain.resolve(&request("1.0")).unwrap_err().kind(),
            FailureKind::Transient
        );
    }

    #[test]
    fn nothing_found() {
        let chain = ChainResolver::new("chain").with_resolver(Arc::new(memory("empty", &[])));
        assert_eq!(
            chain.resolve(&request("1.0")).unwrap_err(),
            ResolverError::NotFound(ModuleRevisionId::new("org", "lib", "1.0"))
        );
    }
}
