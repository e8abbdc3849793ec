use super::{path_resolver, FrameworkDescriptor, ModuleLoadError};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetModule {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkModule {
    pub path: PathBuf,
    pub dir: PathBuf,
    pub descriptor: FrameworkDescriptor,
}

impl FrameworkModule {
    pub fn name(&self) -> &str {
        &self.descriptor.framework
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModules {
    pub target: TargetModule,
    pub framework: FrameworkModule,
}

pub fn framework_module_path(target: &Path, framework_module: &str) -> PathBuf {
    match target.parent() {
        Some(dir) => dir.join(framework_module),
        None => PathBuf::from(framework_module),
    }
}

/// Resolves `location`, then locates and reads the framework descriptor
/// named `framework_module` in the target's directory.
pub fn load_modules(
    location: &str,
    framework_module: &str,
) -> Result<LoadedModules, ModuleLoadError> {
    let resolved = path_resolver::resolve(location)?;
    let target_path = canonical_target(&resolved)?;

    let expected = framework_module_path(&target_path, framework_module);
    if !expected.is_file() {
        return Err(ModuleLoadError::FrameworkMissing {
            target: target_path.display().to_string(),
            expected: expected.display().to_string(),
        });
    }
    let descriptor = FrameworkDescriptor::from_path(&expected)?;
    let dir = expected
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    Ok(LoadedModules {
        target: TargetModule { path: target_path },
        framework: FrameworkModule {
            path: expected,
            dir,
            descriptor,
        },
    })
}

fn canonical_target(path: &Path) -> Result<PathBuf, ModuleLoadError> {
    let canonical = match fs::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ModuleLoadError::TargetMissing {
                path: path.display().to_string(),
            })
        }
        Err(source) => {
            return Err(ModuleLoadError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if !canonical.is_file() {
        return Err(ModuleLoadError::TargetNotFile {
            path: canonical.display().to_string(),
        });
    }
    Ok(canonical)
}
