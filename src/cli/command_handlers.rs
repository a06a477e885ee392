use std::path::Path;

use anyhow::Context;
use log::{info, warn};

use crate::{
    model::{reader::parse_descriptor_file, ModuleDescriptor},
    resolve::{ResolveEngine, ResolveOptions, ResolveReport},
};

/// Handler to resolve command
/// Reads the module descriptor, resolves it and writes the report when a path is given
pub async fn do_resolve(
    engine: &ResolveEngine,
    module_path: &Path,
    options: &ResolveOptions,
    report_path: Option<&Path>,
) -> anyhow::Result<ResolveReport> {
    let descriptor = load_module_descriptor(module_path)?;
    let report = engine.resolve(&descriptor, options).await;

    for conf in &report.configurations {
        for warning in &conf.warnings {
            warn!("[{}] {warning}", conf.name);
        }
    }

    if let Some(report_path) = report_path {
        let contents = report.to_toml_string()?;
        std::fs::write(report_path, contents)
            .with_context(|| format!("Could not write report to {}", report_path.display()))?;
        info!("Wrote report to {}", report_path.display());
    }

    Ok(report)
}

/// Handler to check command
pub fn do_check(module_path: &Path) -> anyhow::Result<ModuleDescriptor> {
    let descriptor = load_module_descriptor(module_path)?;
    info!(
        "{} is valid: {} configuration(s), {} dependencies",
        descriptor.revision_id(),
        descriptor.configurations().len(),
        descriptor.dependencies().len()
    );
    Ok(descriptor)
}

fn load_module_descriptor(module_path: &Path) -> anyhow::Result<ModuleDescriptor> {
    parse_descriptor_file(module_path)
        .with_context(|| format!("Invalid module descriptor {}", module_path.display()))
}
