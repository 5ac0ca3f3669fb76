use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

use crate::operation::DuplicatePolicy;

pub const DEFAULT_PROFILE: &str = "default";

pub const ENV_CONFIG: &str = "ALERTLOGIC_CONFIG";
pub const ENV_PROFILE: &str = "ALERTLOGIC_PROFILE";
pub const ENV_ACCESS_KEY_ID: &str = "ALERTLOGIC_ACCESS_KEY_ID";
pub const ENV_SECRET_KEY: &str = "ALERTLOGIC_SECRET_KEY";
pub const ENV_ACCOUNT_ID: &str = "ALERTLOGIC_ACCOUNT_ID";
pub const ENV_ENDPOINT: &str = "ALERTLOGIC_ENDPOINT";
pub const ENV_RESIDENCY: &str = "ALERTLOGIC_RESIDENCY";
pub const ENV_API_DIR: &str = "ALERTLOGIC_API_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid global endpoint '{0}', expected production or integration")]
    InvalidEndpoint(String),

    #[error("Invalid residency '{0}', expected default, us or emea")]
    InvalidResidency(String),

    #[error("Access key id and secret key are not configured")]
    MissingCredentials,
}

/// Alert Logic global endpoint a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalEndpoint {
    #[default]
    Production,
    Integration,
}

impl GlobalEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Integration => "integration",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            Self::Production => "https://api.cloudinsight.alertlogic.com",
            Self::Integration => "https://api.cloudinsight.product.dev.alertlogic.com",
        }
    }
}

impl FromStr for GlobalEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Self::Production),
            "integration" => Ok(Self::Integration),
            other => Err(ConfigError::InvalidEndpoint(other.to_string())),
        }
    }
}

impl fmt::Display for GlobalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data residency used for residency dependent endpoint lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Residency {
    Default,
    #[default]
    Us,
    Emea,
}

impl Residency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Us => "us",
            Self::Emea => "emea",
        }
    }
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Residency {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "us" => Ok(Self::Us),
            "emea" => Ok(Self::Emea),
            other => Err(ConfigError::InvalidResidency(other.to_string())),
        }
    }
}

/// One profile section of the config file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct ProfileSection {
    access_key_id: Option<String>,
    secret_key: Option<String>,
    account_id: Option<String>,
    global_endpoint: Option<GlobalEndpoint>,
    residency: Option<Residency>,
    api_dir: Option<PathBuf>,
    duplicate_policy: Option<DuplicatePolicy>,
}

/// Settings resolved from the config file and the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub profile: String,
    pub access_key_id: Option<String>,
    pub secret_key: Option<String>,
    pub account_id: Option<String>,
    pub global_endpoint: GlobalEndpoint,
    pub residency: Residency,
    pub api_dir: Option<PathBuf>,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE.to_string(),
            access_key_id: None,
            secret_key: None,
            account_id: None,
            global_endpoint: GlobalEndpoint::default(),
            residency: Residency::default(),
            api_dir: None,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl Config {
    /// `$ALERTLOGIC_CONFIG`, else `~/.alertlogic/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Some(PathBuf::from(path));
        }
        std::env::var_os("HOME").map(|home| Path::new(&home).join(".alertlogic").join("config.yaml"))
    }

    /// Load from the default config file and the process environment
    pub fn load(profile: Option<&str>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let text = match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Reading config file: {:?}", path);
                Some(fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })?)
            }
            _ => None,
        };
        Self::from_sources(text.as_deref(), profile, &env)
    }

    /// Resolve a profile from config file text, then apply environment overrides.
    /// A missing file is only an error when a profile was asked for explicitly.
    pub fn from_sources(
        file_text: Option<&str>,
        profile: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let explicit = profile.map(str::to_string).or_else(|| env.get(ENV_PROFILE).cloned());
        let profile_name = explicit.clone().unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        let sections: HashMap<String, ProfileSection> = match file_text {
            Some(text) if !text.trim().is_empty() => serde_yaml::from_str(text)?,
            _ => HashMap::new(),
        };

        let section = match sections.get(&profile_name) {
            Some(section) => section.clone(),
            None if explicit.is_some() => return Err(ConfigError::ProfileNotFound(profile_name)),
            None => ProfileSection::default(),
        };

        let mut config = Self {
            profile: profile_name,
            access_key_id: section.access_key_id,
            secret_key: section.secret_key,
            account_id: section.account_id,
            global_endpoint: section.global_endpoint.unwrap_or_default(),
            residency: section.residency.unwrap_or_default(),
            api_dir: section.api_dir,
            duplicate_policy: section.duplicate_policy.unwrap_or_default(),
        };

        if let Some(v) = env.get(ENV_ACCESS_KEY_ID) {
            config.access_key_id = Some(v.clone());
        }
        if let Some(v) = env.get(ENV_SECRET_KEY) {
            config.secret_key = Some(v.clone());
        }
        if let Some(v) = env.get(ENV_ACCOUNT_ID) {
            config.account_id = Some(v.clone());
        }
        if let Some(v) = env.get(ENV_ENDPOINT) {
            config.global_endpoint = v.parse()?;
        }
        if let Some(v) = env.get(ENV_RESIDENCY) {
            config.residency = v.parse()?;
        }
        if let Some(v) = env.get(ENV_API_DIR) {
            config.api_dir = Some(PathBuf::from(v));
        }

        debug!(
            "Using profile {} against {} endpoint",
            config.profile, config.global_endpoint
        );
        Ok(config)
    }

    /// Access key id and secret key, both required
    pub fn get_auth(&self) -> Result<(&str, &str), ConfigError> {
        match (&self.access_key_id, &self.secret_key) {
            (Some(id), Some(secret)) => Ok((id.as_str(), secret.as_str())),
            _ => Err(ConfigError::MissingCredentials),
        }
    }
}
