use std::{path::PathBuf, sync::Arc};

use log::debug;

use crate::{
    config::ModResolveConfig,
    conflict::ConflictStrategy,
    event::{EventBus, LoggingListener, ResolveListener},
    resolve::ResolveEngine,
    resolver::{CachingResolver, ChainResolver, FileSystemResolver, ModuleResolver},
    ModResolve,
};

const LOCAL_RESOLVER_NAME: &str = "local";
const CHAIN_RESOLVER_NAME: &str = "default";

/// Values set here take precedence over the `MODRESOLVE_*` environment.
#[derive(Default)]
pub struct ModResolveBuilder {
    repository_dir: Option<PathBuf>,
    workers: Option<usize>,
    conflict: Option<ConflictStrategy>,
    retries: Option<usize>,
    resolvers: Vec<Arc<dyn ModuleResolver>>,
    listeners: Vec<Arc<dyn ResolveListener>>,
}

impl ModResolveBuilder {
    /// Root of the file-system repository.
    ///
    /// Defaults to `$HOME/.modresolve/repository`.
    pub fn repository_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_dir = Some(path.into());
        self
    }

    /// Maximum number of resolver calls in flight.
    ///
    /// Defaults to 4.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// How competing revisions of the same module are settled.
    ///
    /// Defaults to keeping the latest revision.
    pub fn conflict(mut self, conflict: ConflictStrategy) -> Self {
        self.conflict = Some(conflict);
        self
    }

    /// How many times each resolver retries a transient failure.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Resolver consulted after the file-system repository, in the order added.
    pub fn resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ResolveListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn try_build(self) -> anyhow::Result<ModResolve> {
        let Self {
            repository_dir,
            workers,
            conflict,
            retries,
            resolvers,
            listeners,
        } = self;
        let config = ModResolveConfig::load()?;

        let repository_dir = repository_dir.unwrap_or(config.repository_dir);
        let workers = workers.unwrap_or(config.workers);
        let conflict = conflict.unwrap_or(config.conflict);
        let retries = retries.unwrap_or(config.retries);
        debug!(
            "Repository {}, {workers} worker(s), {conflict} conflict manager, {retries} retries",
            repository_dir.display()
        );

        let chain = resolvers.into_iter().fold(
            ChainResolver::new(CHAIN_RESOLVER_NAME)
                .with_retries(retries)
                .with_resolver(Arc::new(FileSystemResolver::new(
                    LOCAL_RESOLVER_NAME,
                    repository_dir.clone(),
                ))),
            ChainResolver::with_resolver,
        );
        let repository = Arc::new(CachingResolver::new(chain));

        let mut events = EventBus::new();
        events.add_listener(Arc::new(LoggingListener));
        for listener in listeners {
            events.add_listener(listener);
        }

        let engine = ResolveEngine::new(repository.clone())
            .with_conflict_manager(conflict.manager())
            .with_workers(workers)
            .with_event_bus(events);

        Ok(ModResolve {
            engine,
            repository,
            repository_dir,
        })
    }
}
