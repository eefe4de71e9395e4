use figment::providers::{Env, Format, Toml};
use figment::Figment;
use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "Esign.toml";
pub const ENV_PREFIX: &str = "ESIGN_";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_external_uri")]
    pub external_uri: String,
    #[serde(default = "default_token_validity_hours")]
    pub token_validity_hours: i64,
    #[serde(default = "default_files_dir")]
    pub files_dir: std::path::PathBuf,
    #[serde(default, deserialize_with = "from_base64")]
    pub files_key: Vec<u8>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub smtp: Option<SMTPConfig>,
    #[serde(default = "default_mail_from")]
    pub mail_from: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
    #[serde(default)]
    pub nat64_net: Option<ipnet::Ipv6Net>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SMTPConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub auth: Option<SMTPAuth>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SMTPAuth {
    pub username: String,
    pub password: String,
}

fn default_external_uri() -> String {
    "http://localhost:8000".to_string()
}

fn default_token_validity_hours() -> i64 {
    14 * 24
}

fn default_files_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./files/")
}

fn default_mail_from() -> String {
    "eSignature <esign@localhost>".to_string()
}

fn default_templates_dir() -> String {
    "templates_email".to_string()
}

fn from_base64<'a, D: serde::Deserializer<'a>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    use serde::de::Error;
    use serde::Deserialize;
    String::deserialize(deserializer)
        .and_then(|string| base64::decode(&string).map_err(|err| Error::custom(err.to_string())))
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub external_uri: String,
    pub token_validity: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            external_uri: default_external_uri(),
            token_validity: chrono::Duration::hours(default_token_validity_hours()),
        }
    }
}

impl Config {
    /// Defaults, then `Esign.toml`, then `ESIGN_*` environment variables
    /// (`__` separates nested keys, e.g. `ESIGN_SMTP__SERVER`).
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self> {
        let config: Config = Self::figment().extract()?;
        config.engine_settings()?;
        Ok(config)
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        if self.token_validity_hours <= 0 {
            return Err(Error::Config("token_validity_hours must be positive".to_string()));
        }
        Ok(EngineSettings {
            external_uri: self.external_uri.trim_end_matches('/').to_string(),
            token_validity: chrono::Duration::hours(self.token_validity_hours),
        })
    }
}
