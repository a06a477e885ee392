use std::{collections::BTreeMap, path::Path, str::FromStr};

use log::{debug, error};
use toml::{Table, Value};

use crate::{
    model::{
        Configuration, DependencyDescriptor, ModuleDescriptor, ModuleRevisionId, ParseError,
        Visibility,
    },
    parser::{
        last_modified_or_now, ConfMappingParser, FileResource, ParseErrors, Resource,
        StringResource, DEFAULT_CONF_MAPPING,
    },
};

/// Configuration every module gets when it declares none.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Reads a module descriptor from TOML.
///
/// ```toml
/// organisation = "org"
/// module = "app"
/// revision = "1.0"
/// default_conf_mapping = "*->default"
///
/// [configurations.compile]
/// [configurations.runtime]
/// extends = ["compile"]
///
/// [[dependencies]]
/// organisation = "org"
/// module = "lib"
/// revision = "2.0"
/// conf = "compile->default"
/// ```
///
/// Problems do not stop reading; they are collected and reported together by
/// [`DescriptorParser::into_descriptor`].
pub struct DescriptorParser {
    errors: ParseErrors,
    descriptor: ModuleDescriptor,
    default_conf: Option<String>,
    mapping: ConfMappingParser,
}

impl DescriptorParser {
    pub fn new(resource: &dyn Resource) -> Self {
        let mut descriptor = ModuleDescriptor::new(ModuleRevisionId::new("", "", ""));
        let mut errors = ParseErrors::for_resource(resource);
        if let Err(err) = descriptor.set_last_modified(last_modified_or_now(resource)) {
            errors.add(err);
        }
        DescriptorParser {
            errors,
            descriptor,
            default_conf: None,
            mapping: ConfMappingParser::default(),
        }
    }

    pub fn errors(&self) -> &ParseErrors {
        &self.errors
    }

    pub fn parse_str(&mut self, data: &str) {
        let mut table = match toml::from_str::<Table>(data) {
            Ok(table) => table,
            Err(err) => {
                self.errors.add(format!("TOML parsing error: {err}"));
                return;
            }
        };

        let organisation = self.required_string(&mut table, "organisation", "module");
        let module = self.required_string(&mut table, "module", "module");
        let revision = self.required_string(&mut table, "revision", "module");
        let revision_id = ModuleRevisionId::new(
            organisation.unwrap_or_default(),
            module.unwrap_or_default(),
            revision.unwrap_or_default(),
        );
        record(&mut self.errors, self.descriptor.set_revision_id(revision_id));

        if let Some(status) = self.optional_string(&mut table, "status", "module") {
            record(&mut self.errors, self.descriptor.set_status(status));
        }
        match table.remove("publication") {
            None => {}
            Some(Value::Integer(publication)) if publication > 0 => {
                record(
                    &mut self.errors,
                    self.descriptor.set_publication(publication as u64),
                );
            }
            Some(other) => self.errors.add(format!(
                "`publication` must be a positive number of milliseconds, found {other}"
            )),
        }

        self.default_conf = self.optional_string(&mut table, "default_conf", "module");
        let default_conf_mapping =
            self.optional_string(&mut table, "default_conf_mapping", "module");
        self.mapping = ConfMappingParser::new(default_conf_mapping);

        match table.remove("configurations") {
            None => {}
            Some(Value::Table(configurations)) => {
                for (name, value) in configurations {
                    self.parse_configuration(name, value);
                }
            }
            Some(other) => self.errors.add(format!(
                "`configurations` must be a table, found {}",
                other.type_str()
            )),
        }
        if self.descriptor.configurations().is_empty() {
            debug!(
                "{} declares no configuration, adding '{DEFAULT_CONFIGURATION}'",
                self.descriptor.revision_id()
            );
            record(
                &mut self.errors,
                self.descriptor
                    .add_configuration(Configuration::new(DEFAULT_CONFIGURATION)),
            );
        }
        self.check_extends();

        match table.remove("dependencies") {
            None => {}
            Some(Value::Array(dependencies)) => {
                for (index, value) in dependencies.into_iter().enumerate() {
                    self.parse_dependency(index, value);
                }
            }
            Some(other) => self.errors.add(format!(
                "`dependencies` must be an array of tables, found {}",
                other.type_str()
            )),
        }

        for key in table.keys() {
            self.errors.add(format!("unknown key `{key}`"));
        }
    }

    /// The descriptor, or every problem found while reading it.
    pub fn into_descriptor(self) -> Result<ModuleDescriptor, ParseError> {
        self.errors.finish(self.descriptor)
    }

    /// The conf used by dependencies that do not declare one.
    fn default_conf(&self) -> String {
        self.mapping
            .default_conf_mapping()
            .or(self.default_conf.as_deref())
            .unwrap_or(DEFAULT_CONF_MAPPING)
            .to_string()
    }

    fn parse_configuration(&mut self, name: String, value: Value) {
        let context = format!("configuration '{name}'");
        let Value::Table(mut table) = value else {
            self.errors.add(format!("{context} must be a table"));
            return;
        };
        let mut configuration = Configuration::new(name);
        configuration.description = self.optional_string(&mut table, "description", &context);
        if let Some(visibility) = self.optional_string(&mut table, "visibility", &context) {
            match Visibility::from_str(&visibility) {
                Ok(visibility) => configuration.visibility = visibility,
                Err(err) => self.errors.add(format!("{err} for {context}")),
            }
        }
        configuration.extends = self.string_list(&mut table, "extends", &context);
        for key in table.keys() {
            self.errors.add(format!("unknown key `{key}` for {context}"));
        }
        record(&mut self.errors, self.descriptor.add_configuration(configuration));
    }

    fn check_extends(&mut self) {
        let unknown: Vec<String> = self
            .descriptor
            .configurations()
            .iter()
            .flat_map(|conf| {
                conf.extends
                    .iter()
                    .filter(|extended| self.descriptor.configuration(extended).is_none())
                    .map(move |extended| {
                        format!(
                            "unknown configuration '{extended}' extended by '{}'",
                            conf.name
                        )
                    })
            })
            .collect();
        for message in unknown {
            self.errors.add(message);
        }
    }

    fn parse_dependency(&mut self, index: usize, value: Value) {
        let context = format!("dependency #{}", index + 1);
        let Value::Table(mut table) = value else {
            self.errors.add(format!("{context} must be a table"));
            return;
        };
        let organisation = self
            .optional_string(&mut table, "organisation", &context)
            .unwrap_or_else(|| self.descriptor.revision_id().organisation().to_string());
        let module = self.required_string(&mut table, "module", &context);
        let revision = self.required_string(&mut table, "revision", &context);
        let force = self.optional_bool(&mut table, "force", &context).unwrap_or(false);
        let transitive = self
            .optional_bool(&mut table, "transitive", &context)
            .unwrap_or(true);
        let conf = self.optional_string(&mut table, "conf", &context);
        let extra = self.string_table(&mut table, "extra", &context);
        for key in table.keys() {
            self.errors.add(format!("unknown key `{key}` for {context}"));
        }

        let (Some(module), Some(revision)) = (module, revision) else {
            return;
        };
        let dependency_id = ModuleRevisionId::new(organisation, module, revision).with_extra(extra);
        let mut dd = DependencyDescriptor::new(self.descriptor.revision_id().clone(), dependency_id)
            .with_force(force)
            .with_transitive(transitive);
        let conf = conf.unwrap_or_else(|| self.default_conf());
        self.mapping.parse(&conf, &mut dd, &mut self.errors);
        record(&mut self.errors, self.descriptor.add_dependency(dd));
    }

    fn required_string(&mut self, table: &mut Table, key: &str, context: &str) -> Option<String> {
        if !table.contains_key(key) {
            self.errors.add(format!("missing key `{key}` for {context}"));
            return None;
        }
        self.optional_string(table, key, context)
    }

    fn optional_string(&mut self, table: &mut Table, key: &str, context: &str) -> Option<String> {
        match table.remove(key) {
            None => None,
            Some(Value::String(value)) => Some(value),
            Some(other) => {
                self.errors.add(format!(
                    "`{key}` for {context} must be a string, found {}",
                    other.type_str()
                ));
                None
            }
        }
    }

    fn optional_bool(&mut self, table: &mut Table, key: &str, context: &str) -> Option<bool> {
        match table.remove(key) {
            None => None,
            Some(Value::Boolean(value)) => Some(value),
            Some(other) => {
                self.errors.add(format!(
                    "`{key}` for {context} must be a boolean, found {}",
                    other.type_str()
                ));
                None
            }
        }
    }

    fn string_list(&mut self, table: &mut Table, key: &str, context: &str) -> Vec<String> {
        match table.remove(key).map(|value| value.try_into::<Vec<String>>()) {
            None => Vec::new(),
            Some(Ok(values)) => values,
            Some(Err(err)) => {
                self.errors
                    .add(format!("`{key}` for {context} must be a list of strings: {err}"));
                Vec::new()
            }
        }
    }

    fn string_table(
        &mut self,
        table: &mut Table,
        key: &str,
        context: &str,
    ) -> BTreeMap<String, String> {
        match table
            .remove(key)
            .map(|value| value.try_into::<BTreeMap<String, String>>())
        {
            None => BTreeMap::new(),
            Some(Ok(values)) => values,
            Some(Err(err)) => {
                self.errors
                    .add(format!("`{key}` for {context} must be a table of strings: {err}"));
                BTreeMap::new()
            }
        }
    }
}

fn record<E: std::fmt::Display>(errors: &mut ParseErrors, result: Result<(), E>) {
    if let Err(err) = result {
        errors.add(err);
    }
}

/// Reads a descriptor held in memory; `name` only appears in error messages.
pub fn parse_descriptor(name: &str, data: &str) -> Result<ModuleDescriptor, ParseError> {
    let mut parser = DescriptorParser::new(&StringResource::new(name));
    parser.parse_str(data);
    parser.into_descriptor()
}

pub fn parse_descriptor_file(path: &Path) -> Result<ModuleDescriptor, ParseError> {
    debug!("Attempting to read module descriptor from {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    let mut parser = DescriptorParser::new(&FileResource::new(path));
    parser.parse_str(&contents);
    let descriptor = parser.into_descriptor();
    if let Err(err) = &descriptor {
        error!(
            "Could not build a valid module descriptor from {} due to:\n{err}",
            path.display()
        )
    }
    descriptor
}
