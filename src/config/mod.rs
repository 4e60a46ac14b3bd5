mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{
    EstimatorSettings, IngestSettings, LogSettings, MqttSettings, Settings, StoreSettings,
};

/// Environment variables look like `CATLOCATOR_MQTT__BIND_ADDRESS`.
pub const ENV_PREFIX: &str = "CATLOCATOR";

/// Loads the configuration from `config/default` (any supported format, if
/// present) and `CATLOCATOR_*` environment variables, merged onto defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Like `load_config`, but reads `path` instead of `config/default`. An
/// explicit path must exist.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(Settings::from_partial(partial))
}
