use crate::collectors::Module;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub active_modules: Option<Vec<String>>,
    #[serde(default)]
    pub probes: ProbesConfig,
    #[serde(default)]
    pub public_ip: PublicIpConfig,
    #[serde(default)]
    pub desktop_config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbesConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_census_timeout_ms")]
    pub census_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublicIpConfig {
    #[serde(default = "default_public_ip_services")]
    pub services: Vec<String>,
    #[serde(default = "default_public_ip_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            census_timeout_ms: default_census_timeout_ms(),
        }
    }
}

impl Default for PublicIpConfig {
    fn default() -> Self {
        Self {
            services: default_public_ip_services(),
            timeout_ms: default_public_ip_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        Self::from_yaml(&text, &path_display)
    }

    fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.refresh_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "refresh_interval_secs должно быть >= 1".to_string(),
            ));
        }

        validate_probes(&self.probes)?;
        validate_public_ip(&self.public_ip)?;

        if let Some(dir) = &self.desktop_config_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "desktop_config_dir не должен быть пустым".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Configured module names, or every registered module when unset.
    pub fn modules(&self) -> Vec<String> {
        match &self.active_modules {
            Some(names) => names.clone(),
            None => Module::ALL.iter().map(|m| m.as_str().to_string()).collect(),
        }
    }

    /// Replaces the port of `listen`, keeping the host part.
    pub fn override_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = SocketAddr::from_str(&self.listen).map_err(|_| {
            ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            )
        })?;
        addr.set_port(port);
        self.listen = addr.to_string();
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_probes(cfg: &ProbesConfig) -> Result<(), ConfigError> {
    if cfg.command_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "probes.command_timeout_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.census_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "probes.census_timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_public_ip(cfg: &PublicIpConfig) -> Result<(), ConfigError> {
    if cfg.services.is_empty() {
        return Err(ConfigError::Validation(
            "public_ip.services не должен быть пустым".to_string(),
        ));
    }
    for service in &cfg.services {
        if !(service.starts_with("http://") || service.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "public_ip.services '{service}' должен начинаться с http:// или https://"
            )));
        }
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "public_ip.timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

const fn default_refresh_interval_secs() -> u64 {
    300
}

const fn default_command_timeout_ms() -> u64 {
    2000
}

const fn default_census_timeout_ms() -> u64 {
    10_000
}

fn default_public_ip_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://icanhazip.com".to_string(),
    ]
}

const fn default_public_ip_timeout_ms() -> u64 {
    3000
}
