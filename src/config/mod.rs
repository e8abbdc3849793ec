pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_driver_config, parse_driver_config};
pub use settings::{
    DriverConfig, IsolationStrategy, DEFAULT_FINAL_REPORT_TAG, DEFAULT_FRAMEWORK_MODULE,
    DEFAULT_HOST_SHUTDOWN_GRACE_MS,
};
