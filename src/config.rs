use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::ToolDetection;
use crate::render::OutputMode;

pub const TOGETHER_KEY: &str = "TOGETHER_API_KEY";
pub const TOOLHOUSE_KEY: &str = "TOOLHOUSE_API_KEY";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub output: Option<String>,
    pub detection: Option<String>,
    pub bundle: Option<String>,
    pub metadata_id: Option<String>,
    pub timezone: Option<i32>,
    pub completion_url: Option<String>,
    pub tools_url: Option<String>,
}

impl ProfileConfig {
    /// Checks the enumerated string fields; numeric ones are typed by TOML.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(output) = &self.output {
            OutputMode::parse(output).ok_or_else(|| {
                format!("Invalid profile output '{output}'. Supported values: text, json.")
            })?;
        }
        if let Some(detection) = &self.detection {
            ToolDetection::parse(detection).ok_or_else(|| {
                format!(
                    "Invalid profile detection '{detection}'. Supported values: strict, eager."
                )
            })?;
        }
        if self.model.as_deref().is_some_and(|model| model.trim().is_empty()) {
            return Err("Invalid profile model: value is empty.".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<HashMap<String, ProfileConfig>>,
}

fn read_config(path: &Path) -> Result<ConfigFile, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config file '{}': {err}", path.display()))?;

    toml::from_str(&raw)
        .map_err(|err| format!("Failed to parse config file '{}': {err}", path.display()))
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, String> {
    let path = config_path()?;
    let config = read_config(&path)?;

    let profiles = config.profiles.ok_or_else(|| {
        format!(
            "Config file '{}' does not contain a [profiles] section.",
            path.display()
        )
    })?;

    profiles.get(name).cloned().ok_or_else(|| {
        format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        )
    })
}

/// Parses the config file and validates one profile, or all of them.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, String> {
    let path = config_path()?;
    let config = read_config(&path)?;
    let profiles = config.profiles.unwrap_or_default();

    match profile {
        Some(name) => {
            let selected = profiles.get(name).ok_or_else(|| {
                format!(
                    "Profile '{}' not found in config file '{}'.",
                    name,
                    path.display()
                )
            })?;
            selected
                .validate()
                .map_err(|err| format!("Profile '{name}': {err}"))?;
        }
        None => {
            let mut names = profiles.keys().collect::<Vec<_>>();
            names.sort();
            for name in names {
                profiles[name]
                    .validate()
                    .map_err(|err| format!("Profile '{name}': {err}"))?;
            }
        }
    }

    Ok(path)
}

pub fn config_path() -> Result<PathBuf, String> {
    if let Some(path) = non_empty_env("TP_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    Ok(config_dir()?.join("config.toml"))
}

fn config_dir() -> Result<PathBuf, String> {
    if let Some(xdg) = non_empty_env("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("toolpipe"));
    }

    let home = env::var("HOME").map_err(|_| {
        "Cannot resolve config path: set TP_CONFIG or HOME/XDG_CONFIG_HOME.".to_string()
    })?;
    Ok(PathBuf::from(home).join(".config").join("toolpipe"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// API key that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// The two credentials the pipeline needs.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub together_api_key: ApiKey,
    pub toolhouse_api_key: ApiKey,
}

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("{key} is not set in the environment or in secrets file '{}'", .path.display())]
    Missing { key: &'static str, path: PathBuf },
    #[error("Failed to read secrets file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse secrets file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Path(String),
}

/// Location of the TOML secrets file: `TP_SECRETS`, else `secrets.toml`
/// next to the config file.
pub fn secrets_path() -> Result<PathBuf, String> {
    if let Some(path) = non_empty_env("TP_SECRETS") {
        return Ok(PathBuf::from(path));
    }
    let config = config_path()?;
    Ok(config
        .parent()
        .map(|dir| dir.join("secrets.toml"))
        .unwrap_or_else(|| PathBuf::from("secrets.toml")))
}

/// Loads both keys. Environment variables win over the secrets file; the
/// file is only read when one of them is missing.
pub fn load_secrets() -> Result<Secrets, SecretsError> {
    let together = non_empty_env(TOGETHER_KEY);
    let toolhouse = non_empty_env(TOOLHOUSE_KEY);
    let path = secrets_path().map_err(SecretsError::Path)?;

    let file = if together.is_some() && toolhouse.is_some() {
        HashMap::new()
    } else {
        read_secrets_file(&path)?
    };

    let pick = |key: &'static str, from_env: Option<String>| {
        from_env
            .or_else(|| {
                file.get(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .map(ApiKey)
            .ok_or_else(|| SecretsError::Missing {
                key,
                path: path.clone(),
            })
    };

    Ok(Secrets {
        together_api_key: pick(TOGETHER_KEY, together)?,
        toolhouse_api_key: pick(TOOLHOUSE_KEY, toolhouse)?,
    })
}

fn read_secrets_file(path: &Path) -> Result<HashMap<String, String>, SecretsError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(SecretsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let table: toml::Table = toml::from_str(&raw).map_err(|source| SecretsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(table
        .into_iter()
        .filter_map(|(key, value)| match value {
            toml::Value::String(text) => Some((key, text)),
            _ => None,
        })
        .collect())
}

/// Which keys are resolvable, without exposing their values.
pub fn api_keys_present() -> (bool, bool) {
    let file = secrets_path()
        .ok()
        .and_then(|path| read_secrets_file(&path).ok())
        .unwrap_or_default();
    let present = |key: &str| {
        non_empty_env(key).is_some() || file.get(key).is_some_and(|value| !value.trim().is_empty())
    };
    (present(TOGETHER_KEY), present(TOOLHOUSE_KEY))
}
