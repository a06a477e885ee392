mod graph;
mod report;
mod walk;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{error, info, warn};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    conflict::{ConflictError, ConflictManager, LatestConflictManager},
    event::{EventBus, ResolveEvent},
    model::{dependency::WILDCARD, DependencyDescriptor, ModuleDescriptor, ModuleRevisionId},
    resolver::{FailureKind, ModuleResolver, ResolvedModuleRevision, ResolverError},
};

pub use report::{
    CallerReport, CircularReference, ConfigurationReport, NodeReport, NodeStatus, ResolveReport,
};

use walk::ConfigurationWalk;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("resolution of {0} was cancelled")]
    Cancelled(ModuleRevisionId),
    #[error("unable to resolve {module} ({kind:?}): {message}")]
    Fatal {
        module: ModuleRevisionId,
        kind: FailureKind,
        message: String,
    },
    #[error("resolution of {module} failed:\n{}", .problems.join("\n"))]
    Problems {
        module: ModuleRevisionId,
        problems: Vec<String>,
    },
}

/// Cancels a running resolution. In-flight resolver calls complete; nothing new starts.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Root configurations to resolve, `*` for every public one.
    pub configurations: Vec<String>,
    /// Follow dependencies of dependencies.
    pub transitive: bool,
    /// Resolver failures that abort the whole run instead of failing one node.
    pub fatal_failures: Vec<FailureKind>,
    pub cancellation: Cancellation,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            configurations: vec![WILDCARD.to_string()],
            transitive: true,
            fatal_failures: Vec::new(),
            cancellation: Cancellation::default(),
        }
    }
}

impl ResolveOptions {
    pub fn with_configurations<I, S>(mut self, configurations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configurations = configurations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }

    pub fn with_fatal_failure(mut self, kind: FailureKind) -> Self {
        if !self.fatal_failures.contains(&kind) {
            self.fatal_failures.push(kind);
        }
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

pub(crate) type Outcome = Result<Arc<ResolvedModuleRevision>, ResolverError>;

/// Builds the conflict-free dependency graph of a module, one root configuration at a time.
pub struct ResolveEngine {
    resolver: Arc<dyn ModuleResolver>,
    conflict_manager: Arc<dyn ConflictManager>,
    workers: usize,
    events: Arc<EventBus>,
}

impl ResolveEngine {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        ResolveEngine {
            resolver,
            conflict_manager: Arc::new(LatestConflictManager::default()),
            workers: DEFAULT_WORKERS,
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn with_conflict_manager(mut self, conflict_manager: Arc<dyn ConflictManager>) -> Self {
        self.conflict_manager = conflict_manager;
        self
    }

    /// Bound on concurrent resolver calls, at least one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleResolver> {
        &self.resolver
    }

    pub fn conflict_manager(&self) -> &Arc<dyn ConflictManager> {
        &self.conflict_manager
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Resolves `descriptor` for the requested root configurations.
    ///
    /// Always returns a report; a run stopped by a fatal failure, a strict conflict
    /// or a cancellation records the error in [`ResolveReport::fatal`].
    pub async fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        options: &ResolveOptions,
    ) -> ResolveReport {
        let root = Arc::new(descriptor.clone());
        let module = root.resolved_revision_id().clone();
        let configurations = self.root_configurations(&root, options);
        self.events.publish(&ResolveEvent::StartResolve {
            module: module.clone(),
            configurations: configurations.clone(),
        });
        info!(
            "Resolving {module} for configuration(s) {}",
            configurations.join(", ")
        );

        let mut report = ResolveReport::new(module.clone());
        let mut outcomes = HashMap::new();
        for configuration in &configurations {
            let walk = ConfigurationWalk::new(self, options, root.clone(), configuration);
            let (conf_report, fatal) = walk.run(&mut outcomes).await;
            info!(
                "{module} [{configuration}]: {} resolved, {} evicted, {} failed",
                conf_report.resolved().len(),
                conf_report.evicted().len(),
                conf_report.failed().len()
            );
            report.configurations.push(conf_report);
            if let Some(fatal) = fatal {
                error!("Resolution of {module} stopped: {fatal}");
                report.fatal = Some(fatal);
                break;
            }
        }

        let success = !report.has_errors();
        self.events.publish(&ResolveEvent::EndResolve {
            module,
            configurations,
            resolved: report.ids_with_status(NodeStatus::Resolved).len(),
            evicted: report.ids_with_status(NodeStatus::Evicted).len(),
            failed: report.ids_with_status(NodeStatus::Failed).len(),
            success,
        });
        report
    }

    fn root_configurations(
        &self,
        root: &ModuleDescriptor,
        options: &ResolveOptions,
    ) -> Vec<String> {
        let mut configurations: Vec<String> = Vec::new();
        for requested in &options.configurations {
            let names = if requested == WILDCARD {
                root.public_configuration_names()
            } else {
                vec![requested.clone()]
            };
            for name in names {
                if !configurations.contains(&name) {
                    configurations.push(name);
                }
            }
        }
        if configurations.is_empty() {
            warn!("{} has no configuration to resolve", root.resolved_revision_id());
        }
        configurations
    }

    /// Resolves `dependencies` concurrently, at most `workers` at a time.
    ///
    /// Results come back in request order. A request skipped because of cancellation
    /// has no outcome.
    pub(crate) async fn resolve_all(
        &self,
        dependencies: Vec<Arc<DependencyDescriptor>>,
        cancellation: &Cancellation,
    ) -> Vec<(ModuleRevisionId, Option<Outcome>)> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for (index, dependency) in dependencies.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let resolver = self.resolver.clone();
            let events = self.events.clone();
            let cancellation = cancellation.clone();
            tasks.spawn(async move {
                let requested = dependency.dependency_revision_id().clone();
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() || cancellation.is_cancelled() {
                    return (index, requested, None);
                }
                let module = requested.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    resolve_dependency(resolver.as_ref(), &events, &dependency)
                })
                .await
                .unwrap_or_else(|err| {
                    Err(ResolverError::Transient {
                        module,
                        message: format!("resolver task failed: {err}"),
                    })
                });
                drop(permit);
                (index, requested, Some(outcome))
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!("Resolution task failed: {err}"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, requested, outcome)| (requested, outcome))
            .collect()
    }
}

/// One resolver call framed by its start and end events, on the calling thread.
fn resolve_dependency(
    resolver: &dyn ModuleResolver,
    events: &EventBus,
    dependency: &Arc<DependencyDescriptor>,
) -> Outcome {
    events.publish(&ResolveEvent::StartResolveDependency {
        resolver: resolver.name().to_string(),
        dependency: dependency.clone(),
    });
    let outcome = resolver.resolve(dependency).map(Arc::new);
    events.publish(&ResolveEvent::EndResolveDependency {
        resolver: resolver.name().to_string(),
        dependency: dependency.clone(),
        module: outcome.as_ref().ok().cloned(),
    });
    outcome
}
