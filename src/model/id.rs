use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use regex_lite::Regex;
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};

use crate::model::ParseError;

/// Identity of a module, independent of any revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    organisation: String,
    name: String,
}

impl ModuleId {
    pub fn new(organisation: impl Into<String>, name: impl Into<String>) -> Self {
        ModuleId {
            organisation: organisation.into(),
            name: name.into(),
        }
    }

    pub fn organisation(&self) -> &str {
        &self.organisation
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ModuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.organisation, self.name)
    }
}

impl Serialize for ModuleId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A module identity pinned to a revision string.
///
/// The revision may be exact (`1.2.0`) or dynamic (`latest.integration`, `1.+`);
/// resolvers turn dynamic revisions into exact ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRevisionId {
    module: ModuleId,
    revision: String,
    extra: BTreeMap<String, String>,
}

impl ModuleRevisionId {
    pub fn new(
        organisation: impl Into<String>,
        name: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        ModuleRevisionId {
            module: ModuleId::new(organisation, name),
            revision: revision.into(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    /// Same module and extra attributes, different revision.
    pub fn with_revision(&self, revision: impl Into<String>) -> Self {
        ModuleRevisionId {
            module: self.module.clone(),
            revision: revision.into(),
            extra: self.extra.clone(),
        }
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module
    }

    pub fn organisation(&self) -> &str {
        self.module.organisation()
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }
}

impl Display for ModuleRevisionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{}", self.module, self.revision)
    }
}

impl FromStr for ModuleRevisionId {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let re = Regex::new(r"^(?P<organisation>[^#;]+)#(?P<module>[^#;]+);(?P<revision>[^#;]+)$")
            .unwrap();
        let captures = re
            .captures(value.trim())
            .ok_or_else(|| ParseError::InvalidRevisionId(value.to_string()))?;
        Ok(ModuleRevisionId::new(
            &captures["organisation"],
            &captures["module"],
            &captures["revision"],
        ))
    }
}

impl Serialize for ModuleRevisionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleRevisionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ModuleRevisionIdVisitor;

        impl<'de> Visitor<'de> for ModuleRevisionIdVisitor {
            type Value = ModuleRevisionId;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a string like `organisation#module;revision`")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                ModuleRevisionId::from_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(ModuleRevisionIdVisitor)
    }
}
