use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub log_dir: String,
    pub store_path: String,
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("listen_addr", "0.0.0.0:8080")?
        .set_default("log_dir", "log")?
        .set_default("store_path", "data/lendpool.sled")?
        // Add configuration from a file
        .add_source(File::with_name("config/config.yaml").required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}
