pub mod descriptor;
pub mod loader;
pub mod path_resolver;

pub use descriptor::FrameworkDescriptor;
pub use loader::{
    framework_module_path, load_modules, FrameworkModule, LoadedModules, TargetModule,
};
pub use path_resolver::{resolve, PathResolutionError};

#[derive(Debug, thiserror::Error)]
pub enum ModuleLoadError {
    #[error(transparent)]
    Location(#[from] PathResolutionError),
    #[error("target module not found: {path}")]
    TargetMissing { path: String },
    #[error("target module is not a file: {path}")]
    TargetNotFile { path: String },
    #[error("framework module for {target} not found at {expected}")]
    FrameworkMissing { target: String, expected: String },
    #[error("failed to read module {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid framework descriptor {path}: {source}")]
    Descriptor {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid framework descriptor {path}: {reason}")]
    InvalidDescriptor { path: String, reason: String },
    #[error("framework `{framework}` declares no isolation host")]
    HostUndeclared { framework: String },
    #[error("isolation host for `{framework}` not found: {host}")]
    HostMissing { framework: String, host: String },
    #[error("failed to start isolation host {host}: {source}")]
    HostSpawn {
        host: String,
        #[source]
        source: std::io::Error,
    },
}
