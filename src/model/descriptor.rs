use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, OnceLock},
};

use log::warn;

use crate::model::{
    dependency::WILDCARD, Configuration, DependencyDescriptor, ModelError, ModuleId,
    ModuleRevisionId,
};

pub const DEFAULT_STATUS: &str = "integration";

/// In-memory representation of one module revision.
///
/// Built by a descriptor reader, then frozen with [`ModuleDescriptor::mark_resolved`].
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    revision_id: ModuleRevisionId,
    resolved_revision_id: Option<ModuleRevisionId>,
    configurations: Vec<Configuration>,
    dependencies: Vec<Arc<DependencyDescriptor>>,
    status: String,
    last_modified: u64,
    publication: Option<u64>,
    resolved: bool,
    extends: OnceLock<HashMap<String, Vec<String>>>,
}

impl ModuleDescriptor {
    pub fn new(revision_id: ModuleRevisionId) -> Self {
        ModuleDescriptor {
            revision_id,
            resolved_revision_id: None,
            configurations: Vec::new(),
            dependencies: Vec::new(),
            status: DEFAULT_STATUS.to_string(),
            last_modified: 0,
            publication: None,
            resolved: false,
            extends: OnceLock::new(),
        }
    }

    pub fn revision_id(&self) -> &ModuleRevisionId {
        &self.revision_id
    }

    pub fn set_revision_id(&mut self, revision_id: ModuleRevisionId) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.revision_id = revision_id;
        Ok(())
    }

    /// The concrete revision this descriptor stands for, the declared one unless overridden.
    pub fn resolved_revision_id(&self) -> &ModuleRevisionId {
        self.resolved_revision_id
            .as_ref()
            .unwrap_or(&self.revision_id)
    }

    pub fn set_resolved_revision_id(
        &mut self,
        revision_id: ModuleRevisionId,
    ) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.resolved_revision_id = Some(revision_id);
        Ok(())
    }

    pub fn module_id(&self) -> &ModuleId {
        self.revision_id.module_id()
    }

    pub fn add_configuration(&mut self, configuration: Configuration) -> Result<(), ModelError> {
        self.check_mutable()?;
        if self.configuration(&configuration.name).is_some() {
            return Err(ModelError::DuplicateConfiguration {
                module: self.revision_id.clone(),
                configuration: configuration.name,
            });
        }
        self.configurations.push(configuration);
        self.extends = OnceLock::new();
        Ok(())
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    pub fn configuration(&self, name: &str) -> Option<&Configuration> {
        self.configurations.iter().find(|conf| conf.name == name)
    }

    pub fn require_configuration(&self, name: &str) -> Result<&Configuration, ModelError> {
        self.configuration(name)
            .ok_or_else(|| ModelError::ConfigurationNotFound {
                module: self.resolved_revision_id().clone(),
                configuration: name.to_string(),
            })
    }

    pub fn public_configuration_names(&self) -> Vec<String> {
        self.configurations
            .iter()
            .filter(|conf| conf.is_public())
            .map(|conf| conf.name.clone())
            .collect()
    }

    /// Every configuration `name` extends, directly or transitively, in discovery order.
    ///
    /// Cycles in the extends graph are tolerated: the closure stops at the repeated
    /// configuration and a warning is logged.
    pub fn extended_configurations(&self, name: &str) -> &[String] {
        self.extends
            .get_or_init(|| self.compute_extends())
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn compute_extends(&self) -> HashMap<String, Vec<String>> {
        self.configurations
            .iter()
            .map(|conf| {
                let mut closure = Vec::new();
                let mut stack = vec![conf.name.as_str()];
                self.collect_extends(conf, &mut stack, &mut closure);
                (conf.name.clone(), closure)
            })
            .collect()
    }

    fn collect_extends<'a>(
        &'a self,
        conf: &'a Configuration,
        stack: &mut Vec<&'a str>,
        closure: &mut Vec<String>,
    ) {
        for extended in &conf.extends {
            if stack.contains(&extended.as_str()) {
                warn!(
                    "circular extends in {}: {} -> {}",
                    self.revision_id,
                    stack.join(" -> "),
                    extended
                );
                continue;
            }
            let Some(extended_conf) = self.configuration(extended) else {
                warn!(
                    "configuration '{}' of {} extends unknown configuration '{}'",
                    conf.name, self.revision_id, extended
                );
                continue;
            };
            if !closure.contains(extended) {
                closure.push(extended.clone());
            }
            stack.push(extended.as_str());
            self.collect_extends(extended_conf, stack, closure);
            stack.pop();
        }
    }

    /// Expands requested configuration names against this module: `*` becomes every
    /// public configuration and each configuration brings its extended ones along.
    /// Names that are not declared are reported back as errors.
    pub fn expand_configurations(
        &self,
        requested: &[String],
    ) -> (BTreeSet<String>, Vec<ModelError>) {
        let mut expanded = BTreeSet::new();
        let mut missing = Vec::new();
        let names = requested.iter().flat_map(|name| {
            if name == WILDCARD {
                self.public_configuration_names()
            } else {
                vec![name.clone()]
            }
        });
        for name in names {
            match self.require_configuration(&name) {
                Ok(_) => {
                    expanded.extend(self.extended_configurations(&name).iter().cloned());
                    expanded.insert(name);
                }
                Err(err) => missing.push(err),
            }
        }
        (expanded, missing)
    }

    pub fn add_dependency(&mut self, dependency: DependencyDescriptor) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.dependencies.push(Arc::new(dependency));
        Ok(())
    }

    pub fn dependencies(&self) -> &[Arc<DependencyDescriptor>] {
        &self.dependencies
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.status = status.into();
        Ok(())
    }

    /// Milliseconds since the epoch.
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, last_modified: u64) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.last_modified = last_modified;
        Ok(())
    }

    /// Publication date in milliseconds since the epoch, the last modification date if unset.
    pub fn publication(&self) -> u64 {
        self.publication.unwrap_or(self.last_modified)
    }

    pub fn set_publication(&mut self, publication: u64) -> Result<(), ModelError> {
        self.check_mutable()?;
        self.publication = Some(publication);
        Ok(())
    }

    /// One-way transition: a resolved descriptor rejects every further modification.
    pub fn mark_resolved(&mut self) {
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    fn check_mutable(&self) -> Result<(), ModelError> {
        if self.resolved {
            Err(ModelError::Frozen(self.revision_id.clone()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::Visibility;
    use pretty_assertions::assert_eq;

    fn descriptor() -> ModuleDescriptor {
        let mut md = ModuleDescriptor::new(ModuleRevisionId::new("org", "app", "1.0"));
        md.add_configuration(Configuration::new("compile")).unwrap();
        md.add_configuration(Configuration::new("runtime").extending(["compile"]))
            .unwrap();
        md.add_configuration(Configuration::new("test").extending(["runtime"]))
            .unwrap();
        md.add_configuration(
            Configuration::new("internal")
                .with_visibility(Visibility::Private)
                .extending(["compile"]),
        )
        .unwrap();
        md
    }

    #[test]
    fn extends_closure_is_transitive() {
        let md = descriptor();
        assert_eq!(
            md.extended_configurations("test").to_vec(),
            vec!["runtime", "compile"]
        );
        assert!(md.extended_configurations("compile").is_empty());
        assert!(md.extended_configurations("unknown").is_empty());
    }

    #[test]
    fn extends_cycle_is_tolerated() {
        let mut md = ModuleDescriptor::new(ModuleRevisionId::new("org", "app", "1.0"));
        md.add_configuration(Configuration::new("a").extending(["b"]))
            .unwrap();
        md.add_configuration(Configuration::new("b").extending(["a"]))
            .unwrap();
        assert_eq!(md.extended_configurations("a").to_vec(), vec!["b"]);
        assert_eq!(md.extended_configurations("b").to_vec(), vec!["a"]);
    }

    #[test]
    fn adding_configuration_resets_closure() {
        let mut md = ModuleDescriptor::new(ModuleRevisionId::new("org", "app", "1.0"));
        md.add_configuration(Configuration::new("runtime").extending(["compile"]))
            .unwrap();
        assert!(md.extended_configurations("runtime").is_empty());
        md.add_configuration(Configuration::new("compile")).unwrap();
        assert_eq!(md.extended_configurations("runtime").to_vec(), vec!["compile"]);
    }

    #[test]
    fn duplicate_configuration_is_rejected() {
        let mut md = descriptor();
        let err = md.add_configuration(Configuration::new("compile")).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateConfiguration { .. }));
    }

    #[test]
    fn required_configuration_must_exist() {
        let md = descriptor();
        assert!(md.require_configuration("runtime").is_ok());
        assert_eq!(
            md.require_configuration("docs").unwrap_err().to_string(),
            "configuration not found in org#app;1.0: 'docs'"
        );
    }

    #[test]
    fn wildcard_expands_to_public_configurations() {
        let md = descriptor();
        let (expanded, missing) = md.expand_configurations(&["*".to_string()]);
        assert!(missing.is_empty());
        assert_eq!(
            expanded.into_iter().collect::<Vec<_>>(),
            vec!["compile", "runtime", "test"]
        );
    }

    #[test]
    fn expansion_reports_missing_configurations() {
        let md = descriptor();
        let (expanded, missing) =
            md.expand_configurations(&["internal".to_string(), "docs".to_string()]);
        assert_eq!(
            expanded.into_iter().collect::<Vec<_>>(),
            vec!["compile", "internal"]
        );
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn resolved_descriptor_is_frozen() {
        let mut md = descriptor();
        md.mark_resolved();
        assert!(md.is_resolved());
        assert!(matches!(
            md.set_status("release"),
            Err(ModelError::Frozen(_))
        ));
        assert!(md.add_configuration(Configuration::new("docs")).is_err());
    }

    #[test]
    fn publication_defaults_to_last_modified() {
        let mut md = descriptor();
        md.set_last_modified(1_000).unwrap();
        assert_eq!(md.publication(), 1_000);
        md.set_publication(500).unwrap();
        assert_eq!(md.publication(), 500);
    }
}
