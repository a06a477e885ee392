use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use log::{debug, warn};

use crate::{
    model::{ModuleDescriptor, ModuleRevisionId},
    resolver::{FailureKind, ResolverError},
};

use super::{
    graph::{Caller, Graph, Node, Visit},
    CallerReport, CircularReference, ConfigurationReport, NodeReport, NodeStatus, Outcome,
    ResolveEngine, ResolveError, ResolveOptions,
};

/// A dependency that could not be resolved, with every edge that asked for it.
struct Failure {
    requested: ModuleRevisionId,
    kind: FailureKind,
    message: String,
    callers: Vec<(ModuleRevisionId, String)>,
}

/// Walk of one root configuration.
///
/// Edges are followed in waves: the resolver calls of a wave run concurrently, then
/// their outcomes are applied to the graph one by one in the order the edges were found.
pub(crate) struct ConfigurationWalk<'a> {
    engine: &'a ResolveEngine,
    options: &'a ResolveOptions,
    configuration: String,
    graph: Graph,
    failures: Vec<Failure>,
    circular: Vec<CircularReference>,
    problems: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> ConfigurationWalk<'a> {
    pub fn new(
        engine: &'a ResolveEngine,
        options: &'a ResolveOptions,
        root: Arc<ModuleDescriptor>,
        configuration: &str,
    ) -> Self {
        let mut problems = Vec::new();
        let mut configurations = BTreeSet::new();
        match root.require_configuration(configuration) {
            Ok(_) => {
                configurations.insert(configuration.to_string());
                configurations.extend(root.extended_configurations(configuration).iter().cloned());
            }
            Err(err) => problems.push(err.to_string()),
        }
        ConfigurationWalk {
            engine,
            options,
            configuration: configuration.to_string(),
            graph: Graph::new(Node::root(root, configurations)),
            failures: Vec::new(),
            circular: Vec::new(),
            problems,
            warnings: Vec::new(),
        }
    }

    /// Walks the configuration, reusing and filling `outcomes` for resolver calls.
    pub async fn run(
        mut self,
        outcomes: &mut HashMap<ModuleRevisionId, Outcome>,
    ) -> (ConfigurationReport, Option<ResolveError>) {
        let result = self.walk(outcomes).await;
        (self.into_report(), result.err())
    }

    async fn walk(
        &mut self,
        outcomes: &mut HashMap<ModuleRevisionId, Outcome>,
    ) -> Result<(), ResolveError> {
        let mut queue = self.expand_live_nodes();
        while !queue.is_empty() {
            self.check_cancelled()?;
            let wave = self.prepare(queue);

            let mut requested = HashSet::new();
            let pending: Vec<_> = wave
                .iter()
                .map(|visit| &visit.dependency)
                .filter(|dependency| {
                    let id = dependency.dependency_revision_id();
                    !outcomes.contains_key(id) && requested.insert(id.clone())
                })
                .cloned()
                .collect();
            if !pending.is_empty() {
                debug!(
                    "[{}] resolving {} dependencies",
                    self.configuration,
                    pending.len()
                );
                let resolved = self
                    .engine
                    .resolve_all(pending, &self.options.cancellation)
                    .await;
                for (id, outcome) in resolved {
                    if let Some(outcome) = outcome {
                        outcomes.insert(id, outcome);
                    }
                }
            }
            self.check_cancelled()?;

            for visit in wave {
                let outcome = outcomes
                    .get(visit.dependency.dependency_revision_id())
                    .cloned();
                self.apply(visit, outcome)?;
            }
            self.graph
                .reconcile(self.engine.conflict_manager().as_ref())?;
            queue = self.expand_live_nodes();
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ResolveError> {
        if self.options.cancellation.is_cancelled() {
            Err(ResolveError::Cancelled(self.graph.root().clone()))
        } else {
            Ok(())
        }
    }

    /// Drops circular edges and postpones edges whose caller left the live graph.
    fn prepare(&mut self, queue: Vec<Visit>) -> Vec<Visit> {
        let mut wave = Vec::with_capacity(queue.len());
        for visit in queue {
            if !self.graph.is_live(&visit.parent) {
                self.graph.defer(visit);
            } else if !self.record_if_circular(&visit) {
                wave.push(visit);
            }
        }
        wave
    }

    /// Records the visit as circular when its dependency is already one of the
    /// live ancestors of its caller.
    fn record_if_circular(&mut self, visit: &Visit) -> bool {
        let dependency = visit.dependency.dependency_revision_id();
        let Some(path) = self
            .graph
            .cycle_through(&visit.parent, dependency.module_id())
        else {
            return false;
        };
        let mut cycle: Vec<String> = path.iter().map(ToString::to_string).collect();
        cycle.push(dependency.module_id().to_string());
        let message = format!("circular dependency found: {}", cycle.join(" -> "));
        if !self.warnings.contains(&message) {
            warn!("{message}");
            self.warnings.push(message);
        }
        let reference = CircularReference {
            caller: visit.parent.clone(),
            configuration: visit.parent_configuration.clone(),
            dependency: dependency.clone(),
        };
        if !self.circular.contains(&reference) {
            self.circular.push(reference);
        }
        true
    }

    fn apply(&mut self, visit: Visit, outcome: Option<Outcome>) -> Result<(), ResolveError> {
        if !self.graph.is_live(&visit.parent) {
            self.graph.defer(visit);
            return Ok(());
        }
        // edges applied earlier in the wave may have closed a cycle
        if self.record_if_circular(&visit) {
            return Ok(());
        }
        let outcome = outcome.unwrap_or_else(|| {
            Err(ResolverError::Transient {
                module: visit.dependency.dependency_revision_id().clone(),
                message: "resolution did not complete".to_string(),
            })
        });
        let module = match outcome {
            Ok(module) => module,
            Err(err) => return self.fail(&visit, err),
        };

        let id = module.id().clone();
        let configurations = self.dependency_configurations(&visit, module.descriptor());
        if !self.graph.contains(&id) {
            self.graph.insert(Node::resolved(module));
        }
        let caller = Caller {
            caller: visit.parent,
            configuration: visit.parent_configuration,
            dependency: visit.dependency,
        };
        if self.graph.add_caller(&id, caller, configurations) {
            self.graph
                .settle(id.module_id(), self.engine.conflict_manager().as_ref())?;
        }
        Ok(())
    }

    fn fail(&mut self, visit: &Visit, err: ResolverError) -> Result<(), ResolveError> {
        let requested = visit.dependency.dependency_revision_id();
        let caller = (visit.parent.clone(), visit.parent_configuration.clone());
        match self
            .failures
            .iter_mut()
            .find(|failure| &failure.requested == requested)
        {
            Some(failure) => {
                if !failure.callers.contains(&caller) {
                    failure.callers.push(caller);
                }
            }
            None => {
                warn!("[{}] {err}", self.configuration);
                self.failures.push(Failure {
                    requested: requested.clone(),
                    kind: err.kind(),
                    message: err.to_string(),
                    callers: vec![caller],
                });
            }
        }
        if self.options.fatal_failures.contains(&err.kind()) {
            return Err(ResolveError::Fatal {
                module: requested.clone(),
                kind: err.kind(),
                message: err.to_string(),
            });
        }
        Ok(())
    }

    /// Configurations of the resolved dependency the visit asks for, extends included.
    fn dependency_configurations(
        &mut self,
        visit: &Visit,
        descriptor: &ModuleDescriptor,
    ) -> BTreeSet<String> {
        let (configurations, missing) = descriptor.expand_configurations(&visit.configurations);
        for err in missing {
            let problem = format!(
                "{err}. It was required from {} {}",
                visit.parent, visit.parent_configuration
            );
            if !self.problems.contains(&problem) {
                warn!("[{}] {problem}", self.configuration);
                self.problems.push(problem);
            }
        }
        configurations
    }

    /// Follows the configurations of live nodes not followed yet, and releases
    /// visits postponed on nodes that are live again.
    fn expand_live_nodes(&mut self) -> Vec<Visit> {
        let mut queue = Vec::new();
        for id in self.graph.order().to_vec() {
            if !self.graph.is_live(&id) {
                continue;
            }
            let transitive = self.options.transitive;
            let Some(node) = self.graph.node_mut(&id) else {
                continue;
            };
            queue.append(&mut node.deferred);
            if !node.is_root() && !(transitive && node.transitive) {
                continue;
            }
            let configurations: Vec<String> = node
                .configurations
                .difference(&node.expanded)
                .cloned()
                .collect();
            for configuration in configurations {
                for dependency in node.descriptor.dependencies() {
                    let targets = dependency.dependency_configurations(&configuration);
                    if targets.is_empty() {
                        continue;
                    }
                    queue.push(Visit {
                        parent: id.clone(),
                        parent_configuration: configuration.clone(),
                        dependency: dependency.clone(),
                        configurations: targets,
                    });
                }
                node.expanded.insert(configuration);
            }
        }
        queue
    }

    fn into_report(mut self) -> ConfigurationReport {
        let mut nodes: BTreeMap<ModuleRevisionId, NodeReport> = BTreeMap::new();
        let root = self.graph.root().clone();
        for id in self.graph.order().to_vec() {
            if id == root {
                continue;
            }
            let live = self.graph.is_live(&id);
            let Some(node) = self.graph.node(&id) else {
                continue;
            };
            let (status, evicted_by) = match (&node.evicted_by, live) {
                (Some(by), _) => (NodeStatus::Evicted, by.clone()),
                (None, false) => (NodeStatus::Evicted, Vec::new()),
                (None, true) => (NodeStatus::Resolved, Vec::new()),
            };
            nodes.insert(
                id.clone(),
                NodeReport {
                    id: id.clone(),
                    status,
                    resolver: node
                        .module
                        .as_ref()
                        .map(|module| module.resolver_name().to_string()),
                    from_cache: node
                        .module
                        .as_ref()
                        .is_some_and(|module| module.is_from_cache()),
                    failure: None,
                    message: None,
                    configurations: node.configurations.iter().cloned().collect(),
                    evicted_by,
                    callers: node
                        .callers
                        .iter()
                        .map(|caller| CallerReport {
                            caller: caller.caller.clone(),
                            configuration: caller.configuration.clone(),
                        })
                        .collect(),
                },
            );
        }

        for failure in &self.failures {
            let live_callers: Vec<CallerReport> = failure
                .callers
                .iter()
                .filter(|(caller, _)| self.graph.is_live(caller))
                .map(|(caller, configuration)| CallerReport {
                    caller: caller.clone(),
                    configuration: configuration.clone(),
                })
                .collect();
            if live_callers.is_empty() || nodes.contains_key(&failure.requested) {
                continue;
            }
            nodes.insert(
                failure.requested.clone(),
                NodeReport {
                    id: failure.requested.clone(),
                    status: NodeStatus::Failed,
                    resolver: None,
                    from_cache: false,
                    failure: Some(failure.kind),
                    message: Some(failure.message.clone()),
                    configurations: Vec::new(),
                    evicted_by: Vec::new(),
                    callers: live_callers,
                },
            );
        }

        for reference in &self.circular {
            let caller = CallerReport {
                caller: reference.caller.clone(),
                configuration: reference.configuration.clone(),
            };
            nodes
                .entry(reference.dependency.clone())
                .or_insert_with(|| NodeReport {
                    id: reference.dependency.clone(),
                    status: NodeStatus::Circular,
                    resolver: None,
                    from_cache: false,
                    failure: None,
                    message: None,
                    configurations: Vec::new(),
                    evicted_by: Vec::new(),
                    callers: vec![caller],
                });
        }

        ConfigurationReport {
            name: self.configuration,
            problems: self.problems,
            warnings: self.warnings,
            nodes: nodes.into_values().collect(),
            circular: self.circular,
        }
    }
}
