use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    cli::command_handlers::{do_check, do_resolve},
    model::ModuleDescriptor,
    resolve::{ResolveEngine, ResolveOptions, ResolveReport},
    resolver::{CachingResolver, ChainResolver},
};

mod builder;

pub use builder::ModResolveBuilder;

pub struct ModResolve {
    engine: ResolveEngine,
    repository: Arc<CachingResolver<ChainResolver>>,
    repository_dir: PathBuf,
}

impl ModResolve {
    pub fn builder() -> ModResolveBuilder {
        ModResolveBuilder::default()
    }

    pub fn engine(&self) -> &ResolveEngine {
        &self.engine
    }

    /// Root of the file-system repository searched first.
    pub fn repository_dir(&self) -> &Path {
        &self.repository_dir
    }

    /// Parses a module descriptor file, reporting every problem found at once
    pub fn check(&self, module_path: impl AsRef<Path>) -> anyhow::Result<ModuleDescriptor> {
        do_check(module_path.as_ref())
    }

    /// Resolves the module descriptor file and optionally writes the report as TOML
    pub async fn resolve_file(
        &self,
        module_path: impl AsRef<Path>,
        options: &ResolveOptions,
        report_path: Option<&Path>,
    ) -> anyhow::Result<ResolveReport> {
        do_resolve(&self.engine, module_path.as_ref(), options, report_path).await
    }

    pub async fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        options: &ResolveOptions,
    ) -> ResolveReport {
        self.engine.resolve(descriptor, options).await
    }

    /// Forgets every module revision found so far.
    pub fn clear_cache(&self) {
        self.repository.clear()
    }
}
