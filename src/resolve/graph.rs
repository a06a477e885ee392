use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    conflict::{ConflictCandidate, ConflictError, ConflictManager},
    model::{DependencyDescriptor, ModuleDescriptor, ModuleId, ModuleRevisionId},
    resolver::ResolvedModuleRevision,
};

/// Rounds of conflict reconciliation after which an unstable graph is left as is.
const MAX_RECONCILE_ROUNDS: usize = 16;

/// A dependency edge waiting to be followed.
#[derive(Debug, Clone)]
pub(crate) struct Visit {
    pub parent: ModuleRevisionId,
    pub parent_configuration: String,
    pub dependency: Arc<DependencyDescriptor>,
    /// Dependency side configurations, `*` not yet expanded.
    pub configurations: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Caller {
    pub caller: ModuleRevisionId,
    pub configuration: String,
    pub dependency: Arc<DependencyDescriptor>,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub id: ModuleRevisionId,
    /// `None` for the root module, which is given rather than resolved.
    pub module: Option<Arc<ResolvedModuleRevision>>,
    pub descriptor: Arc<ModuleDescriptor>,
    pub configurations: BTreeSet<String>,
    pub expanded: BTreeSet<String>,
    pub callers: Vec<Caller>,
    pub forced: bool,
    pub transitive: bool,
    /// Set when a conflict manager evicted this node, to the revisions kept instead.
    pub evicted_by: Option<Vec<ModuleRevisionId>>,
    /// Visits from this node postponed while it was not part of the live graph.
    pub deferred: Vec<Visit>,
}

impl Node {
    pub fn root(descriptor: Arc<ModuleDescriptor>, configurations: BTreeSet<String>) -> Self {
        let id = descriptor.resolved_revision_id().clone();
        Node {
            id,
            module: None,
            descriptor,
            configurations,
            expanded: BTreeSet::new(),
            callers: Vec::new(),
            forced: false,
            transitive: true,
            evicted_by: None,
            deferred: Vec::new(),
        }
    }

    pub fn resolved(module: Arc<ResolvedModuleRevision>) -> Self {
        Node {
            id: module.id().clone(),
            descriptor: module.descriptor().clone(),
            module: Some(module),
            configurations: BTreeSet::new(),
            expanded: BTreeSet::new(),
            callers: Vec::new(),
            forced: false,
            transitive: false,
            evicted_by: None,
            deferred: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.module.is_none()
    }
}

/// Nodes of one configuration walk, keyed by resolved revision id.
///
/// A node is live when it can be reached from the root through nodes that no conflict
/// manager evicted. Nodes that are not live are transitively evicted.
#[derive(Debug)]
pub(crate) struct Graph {
    root: ModuleRevisionId,
    nodes: HashMap<ModuleRevisionId, Node>,
    order: Vec<ModuleRevisionId>,
    modules: Vec<ModuleId>,
    by_module: HashMap<ModuleId, Vec<ModuleRevisionId>>,
    live: HashSet<ModuleRevisionId>,
    dirty: bool,
}

impl Graph {
    pub fn new(root: Node) -> Self {
        let mut graph = Graph {
            root: root.id.clone(),
            nodes: HashMap::new(),
            order: Vec::new(),
            modules: Vec::new(),
            by_module: HashMap::new(),
            live: HashSet::new(),
            dirty: true,
        };
        graph.insert(root);
        graph
    }

    pub fn root(&self) -> &ModuleRevisionId {
        &self.root
    }

    pub fn contains(&self, id: &ModuleRevisionId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &ModuleRevisionId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &ModuleRevisionId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Node ids in discovery order.
    pub fn order(&self) -> &[ModuleRevisionId] {
        &self.order
    }

    pub fn insert(&mut self, node: Node) {
        let module = node.id.module_id().clone();
        match self.by_module.get_mut(&module) {
            Some(revisions) => revisions.push(node.id.clone()),
            None => {
                self.modules.push(module.clone());
                self.by_module.insert(module, vec![node.id.clone()]);
            }
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        self.dirty = true;
    }

    /// Records that `caller` reaches `id`, requesting `configurations` of it.
    /// Returns whether the caller is new to the node.
    pub fn add_caller(
        &mut self,
        id: &ModuleRevisionId,
        caller: Caller,
        configurations: BTreeSet<String>,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.configurations.extend(configurations);
        node.forced |= caller.dependency.is_force();
        node.transitive |= caller.dependency.is_transitive();
        let known = node.callers.iter().any(|known| {
            known.caller == caller.caller
                && known.configuration == caller.configuration
                && Arc::ptr_eq(&known.dependency, &caller.dependency)
        });
        if known {
            return false;
        }
        node.callers.push(caller);
        self.dirty = true;
        true
    }

    pub fn defer(&mut self, visit: Visit) {
        if let Some(parent) = self.nodes.get_mut(&visit.parent) {
            debug!(
                "postponing {} from {}: caller is evicted",
                visit.dependency.dependency_revision_id(),
                visit.parent
            );
            parent.deferred.push(visit);
        }
    }

    pub fn is_live(&mut self, id: &ModuleRevisionId) -> bool {
        self.refresh();
        self.live.contains(id)
    }

    /// Whether a live node calls `id`, regardless of `id` being evicted itself.
    fn is_reachable(&self, id: &ModuleRevisionId) -> bool {
        self.nodes.get(id).is_some_and(|node| {
            node.callers
                .iter()
                .any(|caller| self.live.contains(&caller.caller))
        })
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        let mut children: HashMap<&ModuleRevisionId, Vec<&ModuleRevisionId>> = HashMap::new();
        for node in self.nodes.values() {
            for caller in &node.callers {
                children.entry(&caller.caller).or_default().push(&node.id);
            }
        }
        let mut live = HashSet::from([self.root.clone()]);
        let mut queue = VecDeque::from([&self.root]);
        while let Some(id) = queue.pop_front() {
            for child in children.get(id).into_iter().flatten() {
                let evicted = self
                    .nodes
                    .get(*child)
                    .map_or(true, |node| node.evicted_by.is_some());
                if !evicted && live.insert((*child).clone()) {
                    queue.push_back(*child);
                }
            }
        }
        self.live = live;
        self.dirty = false;
    }

    /// The modules of a cycle that an edge from `parent` to `module` would close,
    /// from the root down to `parent`.
    pub fn cycle_through(
        &mut self,
        parent: &ModuleRevisionId,
        module: &ModuleId,
    ) -> Option<Vec<ModuleId>> {
        self.refresh();
        let cycle = self.ancestry(parent, |id| id.module_id() == module)?;
        let mut path = self
            .ancestry(cycle[0], |id| *id == self.root)
            .unwrap_or_else(|| vec![cycle[0]]);
        path.extend(cycle.into_iter().skip(1));
        Some(path.into_iter().map(|id| id.module_id().clone()).collect())
    }

    /// Shortest chain of live callers from the closest ancestor of `from` matching
    /// `found` down to `from` itself.
    fn ancestry<'g>(
        &'g self,
        from: &'g ModuleRevisionId,
        found: impl Fn(&ModuleRevisionId) -> bool,
    ) -> Option<Vec<&'g ModuleRevisionId>> {
        let mut below: HashMap<&ModuleRevisionId, &ModuleRevisionId> = HashMap::new();
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if found(id) {
                let mut chain = vec![id];
                let mut current = id;
                while let Some(&next) = below.get(current) {
                    chain.push(next);
                    current = next;
                }
                return Some(chain);
            }
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            for caller in &node.callers {
                if self.live.contains(&caller.caller) && seen.insert(&caller.caller) {
                    below.insert(&caller.caller, id);
                    queue.push_back(&caller.caller);
                }
            }
        }
        None
    }

    /// Runs the conflict manager over the reachable revisions of `module`.
    /// Returns whether any eviction changed.
    pub fn settle(
        &mut self,
        module: &ModuleId,
        manager: &dyn ConflictManager,
    ) -> Result<bool, ConflictError> {
        let Some(revisions) = self.by_module.get(module).cloned() else {
            return Ok(false);
        };
        if revisions.len() < 2 {
            return Ok(false);
        }
        self.refresh();
        let candidates: Vec<ConflictCandidate> = revisions
            .iter()
            .filter(|id| self.is_reachable(id))
            .filter_map(|id| self.nodes.get(id))
            .map(|node| ConflictCandidate {
                id: node.id.clone(),
                forced: node.forced,
            })
            .collect();
        let (kept, evicted) = match candidates.as_slice() {
            [] => return Ok(false),
            [only] => (vec![only.id.clone()], Vec::new()),
            _ => {
                let resolution = manager.resolve_conflicts(module, &candidates)?;
                (resolution.kept, resolution.evicted)
            }
        };

        let mut changed = false;
        for id in &revisions {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if kept.contains(id) {
                if node.evicted_by.take().is_some() {
                    info!("{id} is back in the graph");
                    changed = true;
                }
            } else if evicted.contains(id) {
                let by = Some(kept.clone());
                if node.evicted_by != by {
                    debug!("{} evicted {id}", manager.name());
                    node.evicted_by = by;
                    changed = true;
                }
            }
        }
        if changed {
            self.dirty = true;
        }
        Ok(changed)
    }

    /// Settles every module until evictions stop changing.
    pub fn reconcile(&mut self, manager: &dyn ConflictManager) -> Result<(), ConflictError> {
        for _ in 0..MAX_RECONCILE_ROUNDS {
            let mut changed = false;
            for module in self.modules.clone() {
                changed |= self.settle(&module, manager)?;
            }
            if !changed {
                return Ok(());
            }
        }
        warn!(
            "conflicts in the graph of {} did not settle after {MAX_RECONCILE_ROUNDS} rounds",
            self.root
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::LatestConflictManager;

    use pretty_assertions::assert_eq;

    fn id(name: &str, revision: &str) -> ModuleRevisionId {
        ModuleRevisionId::new("org", name, revision)
    }

    fn resolved(name: &str, revision: &str) -> Arc<ResolvedModuleRevision> {
        let mut descriptor = ModuleDescriptor::new(id(name, revision));
        descriptor.mark_resolved();
        Arc::new(ResolvedModuleRevision::new(Arc::new(descriptor), "memory"))
    }

    fn link(graph: &mut Graph, from: &ModuleRevisionId, to: &ModuleRevisionId) -> bool {
        if !graph.contains(to) {
            graph.insert(Node::resolved(resolved(to.name(), to.revision())));
        }
        let caller = Caller {
            caller: from.clone(),
            configuration: "default".to_string(),
            dependency: Arc::new(DependencyDescriptor::new(from.clone(), to.clone())),
        };
        graph.add_caller(to, caller, BTreeSet::from(["default".to_string()]))
    }

    fn graph() -> Graph {
        let descriptor = Arc::new(ModuleDescriptor::new(id("app", "1.0")));
        Graph::new(Node::root(descriptor, BTreeSet::from(["default".to_string()])))
    }

    #[test]
    fn eviction_prunes_exclusive_subtree() {
        let manager = LatestConflictManager::default();
        let root = id("app", "1.0");
        let mut graph = graph();
        link(&mut graph, &root, &id("a", "1.0"));
        link(&mut graph, &id("a", "1.0"), &id("lib", "1.0"));
        link(&mut graph, &id("lib", "1.0"), &id("only-old", "1.0"));
        link(&mut graph, &id("lib", "1.0"), &id("shared", "1.0"));
        link(&mut graph, &root, &id("shared", "1.0"));
        link(&mut graph, &root, &id("lib", "2.0"));

        assert!(graph
            .settle(&ModuleId::new("org", "lib"), &manager)
            .unwrap());
        assert!(!graph.is_live(&id("lib", "1.0")));
        assert!(!graph.is_live(&id("only-old", "1.0")));
        assert!(graph.is_live(&id("shared", "1.0")));
        assert!(graph.is_live(&id("lib", "2.0")));
        assert_eq!(
            graph.node(&id("lib", "1.0")).unwrap().evicted_by,
            Some(vec![id("lib", "2.0")])
        );
    }

    #[test]
    fn evicted_node_comes_back_when_winner_is_unreachable() {
        let manager = LatestConflictManager::default();
        let root = id("app", "1.0");
        let mut graph = graph();
        link(&mut graph, &root, &id("lib", "1.0"));
        link(&mut graph, &root, &id("b", "1.0"));
        link(&mut graph, &id("b", "1.0"), &id("lib", "2.0"));
        graph.reconcile(&manager).unwrap();
        assert!(!graph.is_live(&id("lib", "1.0")));

        link(&mut graph, &root, &id("b", "2.0"));
        graph.reconcile(&manager).unwrap();
        assert!(!graph.is_live(&id("b", "1.0")));
        assert!(!graph.is_live(&id("lib", "2.0")));
        assert!(graph.is_live(&id("lib", "1.0")));
        assert_eq!(graph.node(&id("lib", "1.0")).unwrap().evicted_by, None);
    }

    #[test]
    fn deferred_visits_wait_on_their_parent() {
        let mut graph = graph();
        let root = id("app", "1.0");
        link(&mut graph, &root, &id("a", "1.0"));
        graph.defer(Visit {
            parent: id("a", "1.0"),
            parent_configuration: "default".to_string(),
            dependency: Arc::new(DependencyDescriptor::new(id("a", "1.0"), id("c", "1.0"))),
            configurations: vec!["default".to_string()],
        });
        assert_eq!(graph.node(&id("a", "1.0")).unwrap().deferred.len(), 1);
    }

    #[test]
    fn cycle_is_found_through_any_live_caller() {
        let root = id("app", "1.0");
        let mut graph = graph();
        link(&mut graph, &root, &id("a", "1.0"));
        link(&mut graph, &root, &id("b", "1.0"));
        link(&mut graph, &id("a", "1.0"), &id("b", "1.0"));

        assert_eq!(
            graph.cycle_through(&id("b", "1.0"), &ModuleId::new("org", "a")),
            Some(vec![
                ModuleId::new("org", "app"),
                ModuleId::new("org", "a"),
                ModuleId::new("org", "b"),
            ])
        );
        assert_eq!(
            graph.cycle_through(&id("a", "1.0"), &ModuleId::new("org", "b")),
            None
        );
        assert_eq!(
            graph.cycle_through(&root, &ModuleId::new("org", "app")),
            Some(vec![ModuleId::new("org", "app")])
        );
    }
}
