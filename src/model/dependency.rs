use crate::model::{ModuleId, ModuleRevisionId};

/// Mapping key matching any parent configuration without an entry of its own.
/// On the dependency side it stands for every public configuration of the resolved module.
pub const WILDCARD: &str = "*";

/// Dependency side token standing for the parent configuration name.
pub const SELF_REFERENCE: &str = "@";

/// One declared dependency edge with its configuration mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    parent: ModuleRevisionId,
    dependency: ModuleRevisionId,
    force: bool,
    transitive: bool,
    mapping: Vec<(String, Vec<String>)>,
}

impl DependencyDescriptor {
    pub fn new(parent: ModuleRevisionId, dependency: ModuleRevisionId) -> Self {
        DependencyDescriptor {
            parent,
            dependency,
            force: false,
            transitive: true,
            mapping: Vec::new(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }

    pub fn parent_revision_id(&self) -> &ModuleRevisionId {
        &self.parent
    }

    pub fn dependency_revision_id(&self) -> &ModuleRevisionId {
        &self.dependency
    }

    pub fn dependency_id(&self) -> &ModuleId {
        self.dependency.module_id()
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    pub fn is_transitive(&self) -> bool {
        self.transitive
    }

    /// Adds `module_configuration -> dependency_configuration`, ignoring duplicates.
    pub fn add_dependency_configuration(
        &mut self,
        module_configuration: &str,
        dependency_configuration: &str,
    ) {
        let index = match self
            .mapping
            .iter()
            .position(|(conf, _)| conf == module_configuration)
        {
            Some(index) => index,
            None => {
                self.mapping
                    .push((module_configuration.to_string(), Vec::new()));
                self.mapping.len() - 1
            }
        };
        let targets = &mut self.mapping[index].1;
        if !targets.iter().any(|conf| conf == dependency_configuration) {
            targets.push(dependency_configuration.to_string());
        }
    }

    pub fn module_configurations(&self) -> impl Iterator<Item = &str> {
        self.mapping.iter().map(|(conf, _)| conf.as_str())
    }

    pub fn mapping(&self) -> &[(String, Vec<String>)] {
        &self.mapping
    }

    /// Configurations of the dependency pulled in by `module_configuration`.
    ///
    /// Uses the entry for the configuration itself, falling back to the wildcard entry.
    /// `@` is replaced by `module_configuration`; `*` is kept and only expanded once the
    /// dependency is resolved.
    pub fn dependency_configurations(&self, module_configuration: &str) -> Vec<String> {
        let targets = self
            .targets(module_configuration)
            .or_else(|| self.targets(WILDCARD))
            .unwrap_or_default();
        let mut result: Vec<String> = Vec::with_capacity(targets.len());
        for target in targets {
            let target = if target == SELF_REFERENCE {
                module_configuration
            } else {
                target.as_str()
            };
            if !result.iter().any(|conf| conf == target) {
                result.push(target.to_string());
            }
        }
        result
    }

    fn targets(&self, module_configuration: &str) -> Option<&[String]> {
        self.mapping
            .iter()
            .find(|(conf, _)| conf == module_configuration)
            .map(|(_, targets)| targets.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn descriptor() -> DependencyDescriptor {
        DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("org", "lib", "2.0"),
        )
    }

    #[test]
    fn exact_entry_wins_over_wildcard() {
        let mut dd = descriptor();
        dd.add_dependency_configuration("compile", "default");
        dd.add_dependency_configuration(WILDCARD, "runtime");

        assert_eq!(dd.dependency_configurations("compile"), vec!["default"]);
        assert_eq!(dd.dependency_configurations("test"), vec!["runtime"]);
    }

    #[test]
    fn no_entry_means_no_configurations() {
        let mut dd = descriptor();
        dd.add_dependency_configuration("compile", "default");

        assert!(dd.dependency_configurations("test").is_empty());
    }

    #[test]
    fn self_reference_is_replaced() {
        let mut dd = descriptor();
        dd.add_dependency_configuration(WILDCARD, SELF_REFERENCE);

        assert_eq!(dd.dependency_configurations("test"), vec!["test"]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut dd = descriptor();
        dd.add_dependency_configuration("compile", "default");
        dd.add_dependency_configuration("compile", "default");
        dd.add_dependency_configuration("compile", "sources");

        assert_eq!(
            dd.mapping(),
            &[(
                "compile".to_string(),
                vec!["default".to_string(), "sources".to_string()]
            )]
        );
    }
}
