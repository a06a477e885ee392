use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;
use config::{Config, ConfigError, Environment};
use home::home_dir;
use serde::Deserialize;

use crate::{conflict::ConflictStrategy, resolve::DEFAULT_WORKERS};

pub const DEFAULT_RETRIES: usize = 1;

/// Settings read from `MODRESOLVE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModResolveConfig {
    pub repository_dir: PathBuf,
    pub workers: usize,
    pub conflict: ConflictStrategy,
    pub retries: usize,
}

impl ModResolveConfig {
    pub fn load() -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(None).context("invalid MODRESOLVE_* environment")?;
        Self::from_raw(raw_config)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let repository_dir = match raw_config.repository.dir {
            Some(dir) => dir,
            None => default_repository_dir()?,
        };
        Ok(Self {
            repository_dir,
            workers: raw_config.resolve.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            conflict: raw_config.resolve.conflict.unwrap_or_default(),
            retries: raw_config.resolve.retries.unwrap_or(DEFAULT_RETRIES),
        })
    }
}

pub fn default_repository_dir() -> anyhow::Result<PathBuf> {
    let mut repository_dir = home_dir()
        .context("Could not find home dir. Please define $HOME env variable.")?;
    repository_dir.push(".modresolve/repository");
    Ok(repository_dir)
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    repository: RepositoryConfig,
    #[serde(default)]
    resolve: ResolveConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RepositoryConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct ResolveConfig {
    workers: Option<usize>,
    conflict: Option<ConflictStrategy>,
    retries: Option<usize>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("MODRESOLVE")
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
