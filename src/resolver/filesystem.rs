use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::{debug, trace};

use crate::{
    model::{reader::parse_descriptor_file, DependencyDescriptor, ModuleRevisionId, ParseError},
    version::RevisionMatcher,
};

use super::{
    candidates_latest_first, freeze_descriptor, ModuleResolver, ResolvedModuleRevision,
    ResolverError,
};

pub const DESCRIPTOR_FILE_NAME: &str = "module.toml";

/// Reads descriptors from a directory laid out as
/// `<root>/<organisation>/<module>/<revision>/module.toml`.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    name: String,
    root: PathBuf,
}

impl FileSystemResolver {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        FileSystemResolver {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn module_dir(&self, module: &ModuleRevisionId) -> PathBuf {
        self.root.join(module.organisation()).join(module.name())
    }

    fn descriptor_path(&self, module: &ModuleRevisionId, revision: &str) -> PathBuf {
        self.module_dir(module)
            .join(revision)
            .join(DESCRIPTOR_FILE_NAME)
    }

    fn read(
        &self,
        requested: &ModuleRevisionId,
        revision: &str,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        if !is_path_component(revision) {
            debug!("{} ignoring revision `{revision}` of {requested}", self.name);
            return Err(ResolverError::NotFound(requested.clone()));
        }
        let path = self.descriptor_path(requested, revision);
        trace!("{} reading {}", self.name, path.display());
        let descriptor = parse_descriptor_file(&path).map_err(|err| match err {
            ParseError::IO(err) if err.kind() == ErrorKind::NotFound => {
                ResolverError::NotFound(requested.clone())
            }
            ParseError::IO(err) => ResolverError::Transient {
                module: requested.clone(),
                message: format!("{}: {err}", path.display()),
            },
            err => ResolverError::Invalid {
                module: requested.clone(),
                message: err.to_string(),
            },
        })?;
        let descriptor = freeze_descriptor(descriptor, requested)?;
        Ok(ResolvedModuleRevision::new(descriptor, &self.name))
    }

    fn list_revisions(&self, requested: &ModuleRevisionId) -> Result<Vec<String>, ResolverError> {
        let dir = self.module_dir(requested);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(ResolverError::Transient {
                    module: requested.clone(),
                    message: format!("{}: {err}", dir.display()),
                })
            }
        };
        let mut revisions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ResolverError::Transient {
                module: requested.clone(),
                message: format!("{}: {err}", dir.display()),
            })?;
            if entry.path().join(DESCRIPTOR_FILE_NAME).is_file() {
                if let Some(revision) = entry.file_name().to_str() {
                    revisions.push(revision.to_string());
                }
            }
        }
        Ok(revisions)
    }
}

impl ModuleResolver for FileSystemResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        dependency: &DependencyDescriptor,
    ) -> Result<ResolvedModuleRevision, ResolverError> {
        let requested = dependency.dependency_revision_id();
        if !is_path_component(requested.organisation()) || !is_path_component(requested.name()) {
            debug!("{} cannot hold {requested}", self.name);
            return Err(ResolverError::NotFound(requested.clone()));
        }
        let matcher = RevisionMatcher::parse(requested.revision());
        if !matcher.is_dynamic() {
            return self.read(requested, requested.revision());
        }

        let candidates = candidates_latest_first(&matcher, self.list_revisions(requested)?);
        debug!(
            "{} found {} candidate(s) for {}",
            self.name,
            candidates.len(),
            requested
        );
        for revision in candidates {
            let resolved = self.read(requested, &revision)?;
            let descriptor = resolved.descriptor();
            if matcher.accepts(descriptor.revision_id().revision(), descriptor.status()) {
                return Ok(resolved);
            }
            trace!(
                "{} rejected {} with status {}",
                self.name,
                resolved.id(),
                descriptor.status()
            );
        }
        Err(ResolverError::NotFound(requested.clone()))
    }
}

/// Whether `name` stays one directory below its parent once joined to a path.
fn is_path_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).components().count() == 1
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::resolver::FailureKind;

    use pretty_assertions::assert_eq;

    fn publish(root: &Path, revision: &str, status: &str) {
        let dir = root.join("org").join("lib").join(revision);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(DESCRIPTOR_FILE_NAME),
            format!(
                r#"
                organisation = "org"
                module = "lib"
                revision = "{revision}"
                status = "{status}"
                "#
            ),
        )
        .unwrap();
    }

    fn request(revision: &str) -> DependencyDescriptor {
        DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("org", "lib", revision),
        )
    }

    #[test]
    fn resolve_from_directory() {
        let root = tempfile::tempdir().unwrap();
        publish(root.path(), "1.0", "release");
        publish(root.path(), "1.2", "integration");
        publish(root.path(), "2.0", "integration");
        let resolver = FileSystemResolver::new("local", root.path());

        assert_eq!(resolver.resolve(&request("1.0")).unwrap().revision(), "1.0");
        assert_eq!(resolver.resolve(&request("1.+")).unwrap().revision(), "1.2");
        assert_eq!(
            resolver
                .resolve(&request("latest.integration"))
                .unwrap()
                .revision(),
            "2.0"
        );
        assert_eq!(
            resolver
                .resolve(&request("latest.release"))
                .unwrap()
                .revision(),
            "1.0"
        );
    }

    #[test]
    fn missing_module_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let resolver = FileSystemResolver::new("local", root.path());
        assert_eq!(
            resolver.resolve(&request("1.0")).unwrap_err().kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            resolver.resolve(&request("latest.release")).unwrap_err().kind(),
            FailureKind::NotFound
        );
    }

    #[test]
    fn broken_descriptor_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("org").join("lib").join("1.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DESCRIPTOR_FILE_NAME), "module = 1").unwrap();
        let resolver = FileSystemResolver::new("local", root.path());
        assert_eq!(
            resolver.resolve(&request("1.0")).unwrap_err().kind(),
            FailureKind::Invalid
        );
    }

    #[test]
    fn names_leaving_the_repository_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let repository = root.path().join("repository");
        publish(&repository, "1.0", "release");
        publish(root.path(), "9.0", "release");
        let resolver = FileSystemResolver::new("local", &repository);

        for revision in ["../../../org/lib/9.0", "..", "1.0/../1.0", ""] {
            assert_eq!(
                resolver.resolve(&request(revision)).unwrap_err().kind(),
                FailureKind::NotFound,
                "revision `{revision}`"
            );
        }
        let outside = DependencyDescriptor::new(
            ModuleRevisionId::new("org", "app", "1.0"),
            ModuleRevisionId::new("..", "org", "1.0"),
        );
        assert_eq!(
            resolver.resolve(&outside).unwrap_err().kind(),
            FailureKind::NotFound
        );
        assert_eq!(resolver.resolve(&request("1.0")).unwrap().revision(), "1.0");
    }
}
