mod settings;

use config::{Config, Environment, File};
use tracing::debug;

use crate::utils::error::SettingsError;

pub use settings::{
    BrokerSettings, ConsumeFromWhere, ConsumerSettings, PartialSettings, ProducerSettings,
    Settings,
};

pub(crate) use settings::split_addresses;

/// Prefix of environment overrides, e.g. `ORDERMQ__CONSUMER__GROUP`.
pub const ENV_PREFIX: &str = "ORDERMQ";

/// Loads the configuration from `config/default` and environment variables.
pub fn load_config() -> Result<Settings, SettingsError> {
    load_config_from("config/default")
}

/// Loads the configuration from the given file (any format supported by
/// `config`, the file is optional) and `ORDERMQ__*` environment variables,
/// merges it onto the defaults and validates the result.
pub fn load_config_from(path: &str) -> Result<Settings, SettingsError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("consumer.topics_and_tags")
                .with_list_parse_key("broker.reconsume_delays_ms"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = partial.merge(Settings::default());
    settings.validate()?;
    debug!(?settings, "configuration loaded");
    Ok(settings)
}
