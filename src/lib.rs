pub mod cli;
pub mod config;
pub mod conflict;
pub mod event;
pub mod model;
pub mod parser;
pub mod resolve;
pub mod resolver;
pub mod version;

mod api;

pub use api::{ModResolve, ModResolveBuilder};
