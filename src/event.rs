use std::{
    collections::BTreeMap,
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::{debug, warn};

use crate::{
    model::{DependencyDescriptor, ModuleRevisionId},
    resolver::ResolvedModuleRevision,
};

/// Lifecycle events published while resolving.
#[derive(Debug, Clone)]
pub enum ResolveEvent {
    StartResolve {
        module: ModuleRevisionId,
        configurations: Vec<String>,
    },
    EndResolve {
        module: ModuleRevisionId,
        configurations: Vec<String>,
        resolved: usize,
        evicted: usize,
        failed: usize,
        success: bool,
    },
    StartResolveDependency {
        resolver: String,
        dependency: Arc<DependencyDescriptor>,
    },
    /// `module` is `None` when the dependency could not be resolved.
    EndResolveDependency {
        resolver: String,
        dependency: Arc<DependencyDescriptor>,
        module: Option<Arc<ResolvedModuleRevision>>,
    },
}

impl ResolveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResolveEvent::StartResolve { .. } => "pre-resolve",
            ResolveEvent::EndResolve { .. } => "post-resolve",
            ResolveEvent::StartResolveDependency { .. } => "pre-resolve-dependency",
            ResolveEvent::EndResolveDependency { .. } => "post-resolve-dependency",
        }
    }

    /// Flat string view of the event, for listeners that forward events elsewhere.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        match self {
            ResolveEvent::StartResolve {
                module,
                configurations,
            } => {
                insert_module(&mut attributes, module);
                attributes.insert("conf".to_string(), configurations.join(","));
            }
            ResolveEvent::EndResolve {
                module,
                configurations,
                resolved,
                evicted,
                failed,
                success,
            } => {
                insert_module(&mut attributes, module);
                attributes.insert("conf".to_string(), configurations.join(","));
                attributes.insert("resolved-count".to_string(), resolved.to_string());
                attributes.insert("evicted-count".to_string(), evicted.to_string());
                attributes.insert("failed-count".to_string(), failed.to_string());
                attributes.insert("success".to_string(), success.to_string());
            }
            ResolveEvent::StartResolveDependency {
                resolver,
                dependency,
            } => {
                insert_dependency(&mut attributes, resolver, dependency);
            }
            ResolveEvent::EndResolveDependency {
                resolver,
                dependency,
                module,
            } => {
                insert_dependency(&mut attributes, resolver, dependency);
                match module {
                    Some(module) => {
                        attributes.insert("revision".to_string(), module.revision().to_string());
                        attributes.insert("resolved".to_string(), "true".to_string());
                    }
                    None => {
                        attributes.insert("resolved".to_string(), "false".to_string());
                    }
                }
            }
        }
        attributes
    }
}

fn insert_module(attributes: &mut BTreeMap<String, String>, module: &ModuleRevisionId) {
    attributes.insert("organisation".to_string(), module.organisation().to_string());
    attributes.insert("module".to_string(), module.name().to_string());
    attributes.insert("revision".to_string(), module.revision().to_string());
}

fn insert_dependency(
    attributes: &mut BTreeMap<String, String>,
    resolver: &str,
    dependency: &DependencyDescriptor,
) {
    insert_module(attributes, dependency.dependency_revision_id());
    attributes.insert("resolver".to_string(), resolver.to_string());
    attributes.insert(
        "requester".to_string(),
        dependency.parent_revision_id().to_string(),
    );
}

pub trait ResolveListener: Send + Sync {
    fn on_event(&self, event: &ResolveEvent) -> anyhow::Result<()>;
}

impl<F> ResolveListener for F
where
    F: Fn(&ResolveEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ResolveEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Delivers events synchronously to every listener, in registration order.
///
/// Listeners are registered before the bus is shared with a running resolution.
/// A listener that fails or panics is logged and skipped.
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Vec<Arc<dyn ResolveListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ResolveListener>) {
        self.listeners.push(listener);
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn ResolveListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|registered| {
            Arc::as_ptr(registered) as *const () != Arc::as_ptr(listener) as *const ()
        });
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn publish(&self, event: &ResolveEvent) {
        for listener in &self.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("listener failed on {} event: {err:#}", event.name()),
                Err(_) => warn!("listener panicked on {} event", event.name()),
            }
        }
    }
}

impl Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl ResolveListener for LoggingListener {
    fn on_event(&self, event: &ResolveEvent) -> anyhow::Result<()> {
        debug!("{}: {:?}", event.name(), event.attributes());
        Ok(())
    }
}
