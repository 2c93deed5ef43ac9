use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::delivery::{self, DeliveryAgent, Sendmail, SmtpRelay};
use crate::error::{FilterError, Result};
use crate::policy::{self, EnvClass, PolicySettings};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/divertfilter/filter.json";

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub staging_dir: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub default_env: String,
    pub default_recipients: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default)]
    pub keep_snapshots: bool,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "agent", rename_all = "lowercase")]
pub enum DeliveryConfig {
    Sendmail {
        #[serde(default = "default_sendmail_path")]
        path: PathBuf,
    },
    Smtp {
        #[serde(default = "default_smtp_host")]
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
    },
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig::Sendmail {
            path: default_sendmail_path(),
        }
    }
}

impl DeliveryConfig {
    pub fn agent(&self) -> Box<dyn DeliveryAgent> {
        match self {
            DeliveryConfig::Sendmail { path } => Box::new(Sendmail::new(path.clone())),
            DeliveryConfig::Smtp { host, port } => Box::new(SmtpRelay::new(host.clone(), *port)),
        }
    }
}

fn default_subject_prefix() -> String {
    policy::DEFAULT_SUBJECT_PREFIX.to_string()
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from(delivery::DEFAULT_SENDMAIL_PATH)
}

fn default_smtp_host() -> String {
    delivery::DEFAULT_SMTP_HOST.to_string()
}

fn default_smtp_port() -> u16 {
    delivery::DEFAULT_SMTP_PORT
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)
            .map_err(|e| FilterError::Config(format!("invalid settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.staging_dir.as_os_str().is_empty() {
            return Err(FilterError::Config("staging_dir must not be empty".to_string()));
        }
        if EnvClass::classify(&self.default_env).is_none() {
            return Err(FilterError::Config(format!(
                "default_env {:?} is not a known environment",
                self.default_env
            )));
        }
        if policy::normalize_recipients(&self.default_recipients).is_empty() {
            return Err(FilterError::Config(
                "default_recipients must list at least one address".to_string(),
            ));
        }
        Ok(())
    }

    pub fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            default_env: self.default_env.trim().to_string(),
            default_recipients: policy::normalize_recipients(&self.default_recipients),
            subject_prefix: self.subject_prefix.clone(),
        }
    }
}

/// Load settings from `path`. There are no built-in fallbacks: a filter
/// running without its diversion defaults must not touch mail.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| {
        FilterError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    Config::parse(&content)
}
