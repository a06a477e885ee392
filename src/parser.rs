use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;

use crate::model::{DependencyDescriptor, ModuleRevisionId, ParseError};

/// Mapping used for dependencies without an explicit `conf` when nothing else is configured.
pub const DEFAULT_CONF_MAPPING: &str = "*->*";

/// Where a descriptor comes from; used for error messages and dates only.
pub trait Resource {
    fn name(&self) -> String;

    /// Milliseconds since the epoch, non-positive when unknown.
    fn last_modified(&self) -> i64;
}

pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileResource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for FileResource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn last_modified(&self) -> i64 {
        std::fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_millis() as i64)
    }
}

/// A descriptor held in memory, without a modification date.
pub struct StringResource {
    name: String,
}

impl StringResource {
    pub fn new(name: impl Into<String>) -> Self {
        StringResource { name: name.into() }
    }
}

impl Resource for StringResource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn last_modified(&self) -> i64 {
        0
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Last modification date of `resource`, or now when the resource cannot tell.
pub fn last_modified_or_now(resource: &dyn Resource) -> u64 {
    let last = resource.last_modified();
    if last > 0 {
        last as u64
    } else {
        debug!("impossible to get date for {}: using 'now'", resource.name());
        now_millis()
    }
}

/// Problems collected while reading one resource.
///
/// Reading goes on after a problem is recorded; the whole list becomes a single
/// [`ParseError::Aggregate`] when the result is finally requested.
#[derive(Debug, Default)]
pub struct ParseErrors {
    resource: Option<String>,
    errors: Vec<String>,
}

impl ParseErrors {
    pub fn new(resource: Option<String>) -> Self {
        ParseErrors {
            resource,
            errors: Vec::new(),
        }
    }

    pub fn for_resource(resource: &dyn Resource) -> Self {
        Self::new(Some(resource.name()))
    }

    pub fn add(&mut self, message: impl Display) {
        let message = match &self.resource {
            Some(resource) => format!("{message} in {resource}"),
            None => message.to_string(),
        };
        self.errors.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.errors
    }

    pub fn check(&self) -> Result<(), ParseError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ParseError::Aggregate(self.errors.clone()))
        }
    }

    /// Releases `value` if nothing went wrong.
    pub fn finish<T>(self, value: T) -> Result<T, ParseError> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ParseError::Aggregate(self.errors))
        }
    }
}

/// Parser for configuration mappings such as `compile->default;test->default,sources`.
///
/// A one-sided clause maps each configuration to itself, unless a default conf mapping
/// is set: the dependency side is then guessed from the default mapping.
#[derive(Debug, Default)]
pub struct ConfMappingParser {
    default_conf_mapping: Option<String>,
    default_mapping_descriptor: OnceLock<DependencyDescriptor>,
}

impl ConfMappingParser {
    pub fn new(default_conf_mapping: Option<String>) -> Self {
        ConfMappingParser {
            default_conf_mapping,
            default_mapping_descriptor: OnceLock::new(),
        }
    }

    pub fn default_conf_mapping(&self) -> Option<&str> {
        self.default_conf_mapping.as_deref()
    }

    pub fn parse(&self, confs: &str, dd: &mut DependencyDescriptor, errors: &mut ParseErrors) {
        self.parse_with(confs, dd, self.default_conf_mapping.is_some(), errors)
    }

    fn parse_with(
        &self,
        confs: &str,
        dd: &mut DependencyDescriptor,
        guess_from_default: bool,
        errors: &mut ParseErrors,
    ) {
        for clause in confs.split(';').filter(|clause| !clause.trim().is_empty()) {
            let mut sides: Vec<&str> = clause.split("->").collect();
            // `A->` is the one-sided clause `A`
            while sides.len() > 1 && sides.last().is_some_and(|side| side.trim().is_empty()) {
                sides.pop();
            }
            match sides.as_slice() {
                [module_confs, ..] if names(module_confs).next().is_none() => errors.add(format!(
                    "invalid conf {} for {}: no configuration before `->`",
                    clause.trim(),
                    dd.dependency_revision_id()
                )),
                [module_confs] => {
                    for module_conf in names(module_confs) {
                        if guess_from_default {
                            let guessed = self
                                .default_mapping_descriptor(errors)
                                .guess(module_conf);
                            for dependency_conf in guessed {
                                dd.add_dependency_configuration(module_conf, &dependency_conf);
                            }
                        } else {
                            dd.add_dependency_configuration(module_conf, module_conf);
                        }
                    }
                }
                [module_confs, dependency_confs] => {
                    for module_conf in names(module_confs) {
                        for dependency_conf in names(dependency_confs) {
                            dd.add_dependency_configuration(module_conf, dependency_conf);
                        }
                    }
                }
                _ => errors.add(format!(
                    "invalid conf {} for {}",
                    clause.trim(),
                    dd.dependency_revision_id()
                )),
            }
        }
    }

    fn default_mapping_descriptor(&self, errors: &mut ParseErrors) -> &DependencyDescriptor {
        self.default_mapping_descriptor.get_or_init(|| {
            let mapping = self
                .default_conf_mapping
                .as_deref()
                .unwrap_or(DEFAULT_CONF_MAPPING);
            debug!("building default conf mapping descriptor from `{mapping}`");
            let mut dd = DependencyDescriptor::new(
                ModuleRevisionId::new("", "", ""),
                ModuleRevisionId::new("", "", ""),
            );
            self.parse_with(mapping, &mut dd, false, errors);
            dd
        })
    }
}

impl DependencyDescriptor {
    /// Dependency configurations the default mapping suggests for `module_conf`.
    /// A wildcard reached through the wildcard entry stands for `module_conf` itself.
    fn guess(&self, module_conf: &str) -> Vec<String> {
        let explicit = self
            .mapping()
            .iter()
            .any(|(conf, _)| conf == module_conf);
        self.dependency_configurations(module_conf)
            .into_iter()
            .map(|conf| {
                if !explicit && conf == crate::model::dependency::WILDCARD {
                    module_conf.to_string()
                } else {
                    conf
                }
            })
            .collect()
    }
}

fn names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    use pretty_assertions::assert_eq;

    fn dependency() -> DependencyDescriptor {
        DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("org", "lib", "2.0"),
        )
    }

    fn pairs(dd: &DependencyDescriptor) -> BTreeSet<(String, String)> {
        dd.mapping()
            .iter()
            .flat_map(|(module_conf, targets)| {
                targets
                    .iter()
                    .map(move |target| (module_conf.clone(), target.clone()))
            })
            .collect()
    }

    fn set(pairs: &[(&str, &str)]) -> BTreeSet<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    fn parse(mapping: &str, default_conf_mapping: Option<&str>) -> (DependencyDescriptor, ParseErrors) {
        let parser = ConfMappingParser::new(default_conf_mapping.map(str::to_string));
        let mut errors = ParseErrors::new(None);
        let mut dd = dependency();
        parser.parse(mapping, &mut dd, &mut errors);
        (dd, errors)
    }

    #[test]
    fn cartesian_product() {
        let (dd, errors) = parse("A,B->C,D", None);
        assert!(errors.is_empty());
        assert_eq!(
            pairs(&dd),
            set(&[("A", "C"), ("A", "D"), ("B", "C"), ("B", "D")])
        );
    }

    #[test]
    fn one_sided_maps_to_itself() {
        let (dd, _) = parse("A", None);
        assert_eq!(pairs(&dd), set(&[("A", "A")]));
    }

    #[test]
    fn one_sided_with_wildcard_default_mapping() {
        let (dd, _) = parse("A", Some("*->*"));
        assert_eq!(pairs(&dd), set(&[("A", "A")]));
    }

    #[test]
    fn one_sided_guesses_from_default_mapping() {
        let (dd, _) = parse("compile, test", Some("compile->default;*->runtime"));
        assert_eq!(
            pairs(&dd),
            set(&[("compile", "default"), ("test", "runtime")])
        );
    }

    #[test]
    fn explicit_mapping_ignores_default_mapping() {
        let (dd, _) = parse("A->B", Some("*->default"));
        assert_eq!(pairs(&dd), set(&[("A", "B")]));
    }

    #[test]
    fn clauses_are_merged_in_any_order() {
        let (first, _) = parse("A;B->C", None);
        let (second, _) = parse("B->C;A", None);
        assert_eq!(pairs(&first), set(&[("A", "A"), ("B", "C")]));
        assert_eq!(pairs(&first), pairs(&second));
    }

    #[test]
    fn whitespace_is_trimmed() {
        let (dd, _) = parse(" compile , runtime -> default ; ", None);
        assert_eq!(
            pairs(&dd),
            set(&[("compile", "default"), ("runtime", "default")])
        );
    }

    #[test]
    fn malformed_clause_is_accumulated() {
        let (dd, errors) = parse("A->B->C;D->E", None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.messages()[0], "invalid conf A->B->C for org#lib;2.0");
        assert_eq!(pairs(&dd), set(&[("D", "E")]));
    }

    #[test]
    fn empty_dependency_side_maps_to_itself() {
        let (dd, errors) = parse("A->;B->C", None);
        assert!(errors.is_empty());
        assert_eq!(pairs(&dd), set(&[("A", "A"), ("B", "C")]));
    }

    #[test]
    fn empty_module_side_is_reported() {
        let (dd, errors) = parse("->C;D->E", None);
        assert_eq!(
            errors.messages(),
            ["invalid conf ->C for org#lib;2.0: no configuration before `->`"]
        );
        assert_eq!(pairs(&dd), set(&[("D", "E")]));
    }

    #[test]
    fn errors_name_the_resource() {
        let mut errors = ParseErrors::for_resource(&StringResource::new("module.toml"));
        errors.add("invalid conf x->y->z for org#lib;2.0");
        let err = errors.finish(()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid conf x->y->z for org#lib;2.0 in module.toml"
        );
    }

    #[test]
    fn parsing_is_idempotent() {
        let parser = ConfMappingParser::new(Some("*->default".to_string()));
        let mut errors = ParseErrors::new(None);
        let mut first = dependency();
        let mut second = dependency();
        parser.parse("compile;test->runtime,sources", &mut first, &mut errors);
        parser.parse("compile;test->runtime,sources", &mut second, &mut errors);
        assert_eq!(first, second);
        assert!(errors.is_empty());
    }

    #[test]
    fn default_mapping_descriptor_is_built_once() {
        let parser = ConfMappingParser::new(Some("*->default".to_string()));
        let mut errors = ParseErrors::new(None);
        let first = parser.default_mapping_descriptor(&mut errors) as *const _;
        let second = parser.default_mapping_descriptor(&mut errors) as *const _;
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_date_falls_back_to_now() {
        let before = now_millis();
        let last_modified = last_modified_or_now(&StringResource::new("memory"));
        assert!(last_modified >= before);
    }
}
