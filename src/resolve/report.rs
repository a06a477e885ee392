use std::{collections::BTreeSet, fmt::Display};

use serde::{Serialize, Serializer};

use crate::{
    model::ModuleRevisionId,
    resolver::FailureKind,
    resolve::ResolveError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Resolved,
    Evicted,
    Failed,
    Circular,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerReport {
    pub caller: ModuleRevisionId,
    pub configuration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub id: ModuleRevisionId,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub configurations: Vec<String>,
    /// Revisions kept in place of this one. Empty for a node evicted along with its callers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evicted_by: Vec<ModuleRevisionId>,
    pub callers: Vec<CallerReport>,
}

/// A dependency edge that leads back to a module on its own path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircularReference {
    pub caller: ModuleRevisionId,
    pub configuration: String,
    pub dependency: ModuleRevisionId,
}

/// Outcome of walking one requested configuration of the root module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigurationReport {
    pub name: String,
    pub problems: Vec<String>,
    pub warnings: Vec<String>,
    /// Every module met during the walk except the root, sorted by id.
    pub nodes: Vec<NodeReport>,
    pub circular: Vec<CircularReference>,
}

impl ConfigurationReport {
    pub fn node(&self, id: &ModuleRevisionId) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    pub fn with_status(&self, status: NodeStatus) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(move |node| node.status == status)
    }

    pub fn resolved(&self) -> Vec<&ModuleRevisionId> {
        self.with_status(NodeStatus::Resolved)
            .map(|node| &node.id)
            .collect()
    }

    pub fn evicted(&self) -> Vec<&ModuleRevisionId> {
        self.with_status(NodeStatus::Evicted)
            .map(|node| &node.id)
            .collect()
    }

    pub fn failed(&self) -> Vec<&ModuleRevisionId> {
        self.with_status(NodeStatus::Failed)
            .map(|node| &node.id)
            .collect()
    }
}

const VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub module: ModuleRevisionId,
    /// Error that stopped the run before every configuration was walked.
    #[serde(
        serialize_with = "serialize_display",
        skip_serializing_if = "Option::is_none"
    )]
    pub fatal: Option<ResolveError>,
    pub configurations: Vec<ConfigurationReport>,
}

#[derive(Debug, Clone, Serialize)]
struct VersionedResolveReport<'a> {
    pub version: i64,
    #[serde(flatten)]
    pub content: &'a ResolveReport,
}

impl ResolveReport {
    pub fn new(module: ModuleRevisionId) -> Self {
        ResolveReport {
            module,
            fatal: None,
            configurations: Vec::new(),
        }
    }

    pub fn configuration(&self, name: &str) -> Option<&ConfigurationReport> {
        self.configurations.iter().find(|conf| conf.name == name)
    }

    pub fn configuration_names(&self) -> Vec<String> {
        self.configurations
            .iter()
            .map(|conf| conf.name.clone())
            .collect()
    }

    /// Distinct module revisions with `status` across all configurations.
    pub fn ids_with_status(&self, status: NodeStatus) -> BTreeSet<&ModuleRevisionId> {
        self.configurations
            .iter()
            .flat_map(|conf| conf.with_status(status))
            .map(|node| &node.id)
            .collect()
    }

    /// Every problem of the run: missing configurations and unresolved dependencies.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for conf in &self.configurations {
            for problem in conf
                .problems
                .iter()
                .cloned()
                .chain(conf.with_status(NodeStatus::Failed).map(|node| {
                    node.message
                        .clone()
                        .unwrap_or_else(|| format!("unresolved dependency: {}", node.id))
                }))
            {
                if !problems.contains(&problem) {
                    problems.push(problem);
                }
            }
        }
        problems
    }

    pub fn has_errors(&self) -> bool {
        self.fatal.is_some() || !self.problems().is_empty()
    }

    pub fn outcome(&self) -> Result<(), ResolveError> {
        if let Some(fatal) = &self.fatal {
            return Err(fatal.clone());
        }
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ResolveError::Problems {
                module: self.module.clone(),
                problems,
            })
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&VersionedResolveReport {
            version: VERSION,
            content: self,
        })
    }
}

fn serialize_display<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    match value {
        Some(value) => serializer.collect_str(value),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn report() -> ResolveReport {
        let app = ModuleRevisionId::new("org", "app", "1.0");
        let mut report = ResolveReport::new(app.clone());
        report.configurations.push(ConfigurationReport {
            name: "default".to_string(),
            problems: Vec::new(),
            warnings: Vec::new(),
            nodes: vec![
                NodeReport {
                    id: ModuleRevisionId::new("org", "lib", "1.0"),
                    status: NodeStatus::Evicted,
                    resolver: Some("local".to_string()),
                    from_cache: false,
                    failure: None,
                    message: None,
                    configurations: vec!["default".to_string()],
                    evicted_by: vec![ModuleRevisionId::new("org", "lib", "2.0")],
                    callers: vec![CallerReport {
                        caller: app.clone(),
                        configuration: "default".to_string(),
                    }],
                },
                NodeReport {
                    id: ModuleRevisionId::new("org", "lib", "2.0"),
                    status: NodeStatus::Resolved,
                    resolver: Some("local".to_string()),
                    from_cache: true,
                    failure: None,
                    message: None,
                    configurations: vec!["default".to_string()],
                    evicted_by: Vec::new(),
                    callers: vec![CallerReport {
                        caller: app.clone(),
                        configuration: "default".to_string(),
                    }],
                },
                NodeReport {
                    id: ModuleRevisionId::new("org", "missing", "1.0"),
                    status: NodeStatus::Failed,
                    resolver: None,
                    from_cache: false,
                    failure: Some(FailureKind::NotFound),
                    message: Some("module not found: org#missing;1.0".to_string()),
                    configurations: Vec::new(),
                    evicted_by: Vec::new(),
                    callers: vec![CallerReport {
                        caller: app,
                        configuration: "default".to_string(),
                    }],
                },
            ],
            circular: Vec::new(),
        });
        report
    }

    #[test]
    fn failed_nodes_are_problems() {
        let report = report();
        assert_eq!(report.problems(), vec!["module not found: org#missing;1.0"]);
        assert!(report.has_errors());
        assert!(matches!(
            report.outcome(),
            Err(ResolveError::Problems { .. })
        ));
        let default = report.configuration("default").unwrap();
        assert_eq!(
            default.resolved(),
            vec![&ModuleRevisionId::new("org", "lib", "2.0")]
        );
        assert_eq!(
            default.evicted(),
            vec![&ModuleRevisionId::new("org", "lib", "1.0")]
        );
    }

    #[test]
    fn save_report() {
        let text = report().to_toml_string().unwrap();
        let parsed = toml::from_str::<toml::Table>(&text).unwrap();
        assert_eq!(parsed["version"].as_integer(), Some(1));
        assert_eq!(parsed["module"].as_str(), Some("org#app;1.0"));
        assert!(!parsed.contains_key("fatal"));

        let nodes = parsed["configurations"][0]["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0]["status"].as_str(), Some("evicted"));
        assert_eq!(nodes[0]["evicted_by"][0].as_str(), Some("org#lib;2.0"));
        assert_eq!(nodes[1]["from_cache"].as_bool(), Some(true));
        assert_eq!(nodes[2]["failure"].as_str(), Some("notfound"));
        assert_eq!(
            nodes[2]["callers"][0]["caller"].as_str(),
            Some("org#app;1.0")
        );
    }
}
