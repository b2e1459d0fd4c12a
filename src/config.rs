use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub network_probe: NetworkProbeConfig,
    #[serde(default)]
    pub sources: SourcePaths,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkProbeConfig {
    #[serde(default = "default_target_host")]
    pub target_host: String,
    #[serde(default = "default_target_port")]
    pub target_port: u16,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcePaths {
    #[serde(default = "default_proc_stat")]
    pub proc_stat: PathBuf,
    #[serde(default = "default_sys_block")]
    pub sys_block: PathBuf,
    #[serde(default = "default_dev_dir")]
    pub dev_dir: PathBuf,
    #[serde(default = "default_mounts")]
    pub mounts: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            network_probe: NetworkProbeConfig::default(),
            sources: SourcePaths::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for NetworkProbeConfig {
    fn default() -> Self {
        Self {
            target_host: default_target_host(),
            target_port: default_target_port(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl NetworkProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            proc_stat: default_proc_stat(),
            sys_block: default_sys_block(),
            dev_dir: default_dev_dir(),
            mounts: default_mounts(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fail_fast: false,
            excluded_prefixes: default_excluded_prefixes(),
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

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }

        validate_network_probe(&self.network_probe)?;
        validate_sources(&self.sources)?;
        validate_storage(&self.storage)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_network_probe(cfg: &NetworkProbeConfig) -> Result<(), ConfigError> {
    if cfg.target_host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "network_probe.target_host не должен быть пустым".to_string(),
        ));
    }
    if cfg.target_port == 0 {
        return Err(ConfigError::Validation(
            "network_probe.target_port должен быть в диапазоне 1..65535".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "network_probe.timeout_ms должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_sources(sources: &SourcePaths) -> Result<(), ConfigError> {
    let named = [
        ("proc_stat", &sources.proc_stat),
        ("sys_block", &sources.sys_block),
        ("dev_dir", &sources.dev_dir),
        ("mounts", &sources.mounts),
    ];
    for (name, path) in named {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "sources.{name} не должен быть пустым"
            )));
        }
    }
    Ok(())
}

fn validate_storage(cfg: &StorageConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for prefix in &cfg.excluded_prefixes {
        if prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.excluded_prefixes[*] не должен быть пустым".to_string(),
            ));
        }
        if !seen.insert(prefix.as_str()) {
            return Err(ConfigError::Validation(format!(
                "префикс '{prefix}' в storage.excluded_prefixes указан дважды"
            )));
        }
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:9109".to_string()
}

fn default_target_host() -> String {
    "www.google.com".to_string()
}

const fn default_target_port() -> u16 {
    80
}

const fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_proc_stat() -> PathBuf {
    PathBuf::from("/proc/stat")
}

fn default_sys_block() -> PathBuf {
    PathBuf::from("/sys/block")
}

fn default_dev_dir() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_mounts() -> PathBuf {
    PathBuf::from("/proc/mounts")
}

fn default_excluded_prefixes() -> Vec<String> {
    ["loop", "ram", "zram", "dm-", "md", "nbd", "zd"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default()
            .validate()
            .expect("конфигурация по умолчанию должна проходить валидацию");
    }

    #[test]
    fn example_yaml_parses_and_validates() {
        let cfg: Config =
            serde_yaml::from_str(Config::example_yaml()).expect("пример должен разбираться");
        cfg.validate().expect("пример должен проходить валидацию");
        assert_eq!(cfg.network_probe.target_port, 80);
        assert!(!cfg.storage.fail_fast);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("network_probe:\n  target_host: example.org\n")
            .expect("частичный YAML должен разбираться");
        assert_eq!(cfg.network_probe.target_host, "example.org");
        assert_eq!(cfg.network_probe.timeout_ms, 10_000);
        assert_eq!(cfg.sources.mounts, PathBuf::from("/proc/mounts"));
        assert!(cfg.storage.excluded_prefixes.iter().any(|p| p == "loop"));
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cfg = Config::default();
        cfg.network_probe.target_port = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = Config::default();
        cfg.network_probe.timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn duplicate_excluded_prefix_is_rejected() {
        let mut cfg = Config::default();
        cfg.storage.excluded_prefixes = vec!["loop".to_string(), "loop".to_string()];
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn bad_listen_is_rejected() {
        let mut cfg = Config::default();
        cfg.listen = "not-an-address".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let err = Config::load_from_file("/nonexistent/hosttel.yaml")
            .expect_err("отсутствующий файл должен давать ошибку");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
