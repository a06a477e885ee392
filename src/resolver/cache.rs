use dashmap::DashMap;
use log::debug;

use crate::{
    model::{DependencyDescriptor, ModuleRevisionId},
    version::is_dynamic,
};

use super::{ModuleResolver, ResolvedModuleRevision, ResolverError};

/// Remembers the module revisions found by an inner resolver.
///
/// Only exact revisions are served from the cache: a dynamic request always reaches
/// the inner resolver, and its answer is then cached under the revision it resolved to.
pub struct CachingResolver<R> {
    inner: R,
    cache: DashMap<ModuleRevisionId, ResolvedModuleRevision>,
}

impl<R> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn invalidate(&self, module: &ModuleRevisionId) -> bool {
        self.cache.remove(module).is_some()
    }

    pub fn clear(&self) {
        self.cache.clear()
    }
}

impl<R> ModuleResolver for CachingResolver<R>
where
    R: ModuleResolver,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn resolve(
        &self,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        let requested = dependency.dependency_revision_id();
        if !is_dynamic(requested.revision()) {
            if let Some(cached) = self.cache.get(requested) {
                debug!("Module {requested} found in the cache");
                return Ok(cached.cached());
            }
        }
        let resolved = self.inner.resolve(dependency)?;
        self.cache.insert(resolved.id().clone(), resolved.clone());
        Ok(resolved)
    }
}
