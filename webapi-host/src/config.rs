//! Layered configuration.
//!
//! Sources, later ones overriding earlier ones:
//!
//! - `appsettings.{toml,json,yaml,...}` (optional)
//! - `appsettings.{environment}.*` (optional)
//! - environment variables prefixed `WEBAPI`, sections separated by `__`,
//!   e.g. `WEBAPI__JWT__ENABLED=true`
//!
//! Keys are lower case; `jwt.enabled` is the key the host reads as
//! `JWT:Enabled`.

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use webapi_core::hosting::HostEnvironment;

pub const ENVIRONMENT_VAR: &str = "WEBAPI_ENVIRONMENT";
pub const ENV_PREFIX: &str = "WEBAPI";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration could not be loaded: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid options in section {section}: {errors}")]
    Validation {
        section: String,
        errors: validator::ValidationErrors,
    },
    #[error("Configuration value {0} is missing")]
    Missing(String),
    #[error("Configuration value {key}='{value}' is not a valid boolean")]
    InvalidBool { key: String, value: String },
}

/// Read-only view over the merged configuration sources.
#[derive(Debug, Clone)]
pub struct Settings {
    config: Config,
}

impl Settings {
    /// Variables from `.env` are only visible if the caller loaded it first.
    pub fn load(environment: &HostEnvironment) -> Result<Self, ConfigError> {
        let environment_file = format!("appsettings.{}", environment.name);
        let config = Config::builder()
            .add_source(File::with_name("appsettings").required(false))
            .add_source(File::with_name(&environment_file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get_string(key).ok()
    }

    pub fn get_required_bool(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        parse_bool(&value).ok_or_else(|| ConfigError::InvalidBool {
            key: key.to_string(),
            value,
        })
    }

    pub fn has_section(&self, key: &str) -> bool {
        self.config.get_table(key).is_ok()
    }

    /// Binds a required section.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        Ok(self.config.get::<T>(key)?)
    }

    /// Binds a section, falling back to defaults when it is absent.
    pub fn section_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, ConfigError> {
        match self.config.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn server(&self) -> Result<ServerOptions, ConfigError> {
        self.section_or_default("server")
    }
}

/// Accepts `true`/`false` in any case, ignoring surrounding whitespace.
pub fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerOptions {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Target port for HTTPS redirection.
    #[serde(default)]
    pub https_port: Option<u16>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            https_port: None,
        }
    }
}

impl ServerOptions {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }
}

#[cfg(test)]
pub(crate) fn settings_from_toml(toml: &str) -> Settings {
    let config = Config::builder()
        .add_source(File::from_str(toml, config::FileFormat::Toml))
        .build()
        .unwrap();
    Settings::from_config(config)
}
