use super::{ConfigError, DriverConfig};
use std::path::Path;

pub fn load_driver_config(path: &Path) -> Result<DriverConfig, ConfigError> {
    let config = DriverConfig::from_path(path)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_driver_config(raw: &str) -> Result<DriverConfig, ConfigError> {
    let config: DriverConfig =
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
