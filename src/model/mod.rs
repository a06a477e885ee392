use thiserror::Error;

pub mod configuration;
pub mod dependency;
pub mod descriptor;
pub mod id;
pub mod reader;

pub use configuration::{Configuration, Visibility};
pub use dependency::DependencyDescriptor;
pub use descriptor::ModuleDescriptor;
pub use id::{ModuleId, ModuleRevisionId};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading module descriptor: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid module revision id `{0}`, expected `organisation#module;revision`")]
    InvalidRevisionId(String),
    #[error("Invalid configuration visibility `{0}`, expected `public` or `private`")]
    InvalidVisibility(String),
    #[error("{}", .0.join("\n"))]
    Aggregate(Vec<String>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("configuration not found in {module}: '{configuration}'")]
    ConfigurationNotFound {
        module: ModuleRevisionId,
        configuration: String,
    },
    #[error("configuration '{configuration}' is declared twice in {module}")]
    DuplicateConfiguration {
        module: ModuleRevisionId,
        configuration: String,
    },
    #[error("module descriptor {0} is resolved and can no longer be modified")]
    Frozen(ModuleRevisionId),
}
