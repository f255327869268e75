//! Configuration du moteur d'appartenance
//!
//! La configuration est lue dans cet ordre :
//! 1. la configuration par défaut intégrée (`pmomembership.yaml`)
//! 2. un fichier YAML optionnel, fusionné par-dessus
//! 3. les variables d'environnement `PMOMEMBERSHIP_CONFIG__<CLE>`

use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const DEFAULT_CONFIG: &str = include_str!("pmomembership.yaml");
const ENV_PREFIX: &str = "PMOMEMBERSHIP_CONFIG__";

pub(crate) const DEFAULT_DATABASE_PATH: &str = "memberships.db";
pub(crate) const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub(crate) const DEFAULT_MAX_COMMIT_RETRIES: u32 = 3;
pub(crate) const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Paramètres du store et du moteur
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Fichier SQLite des memberships
    pub database_path: PathBuf,
    /// Attente maximale sur un verrou SQLite avant `StoreUnavailable`
    pub busy_timeout_ms: u64,
    /// Nombre de rechargements après un conflit de version
    pub max_commit_retries: u32,
    /// Taille du canal d'évènements
    pub event_capacity: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl MembershipConfig {
    /// Charge la configuration (défaut intégré, fichier optionnel, environnement)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Analyse un document YAML fusionné avec la configuration par défaut
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value = default_value()?;
        merge_yaml(&mut value, &parse(yaml)?);
        from_value(value)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn load_with_env(
        path: Option<&Path>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut value = default_value()?;

        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(data) => {
                    info!(config_file = %path.display(), "Loaded membership config file");
                    merge_yaml(&mut value, &parse(&data)?);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(config_file = %path.display(), "Config file not found, using defaults");
                }
                Err(e) => {
                    return Err(Error::Config(format!(
                        "Failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        apply_env_overrides(&mut value, vars);
        from_value(value)
    }
}

fn parse(yaml: &str) -> Result<Value> {
    serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
}

fn default_value() -> Result<Value> {
    parse(DEFAULT_CONFIG)
}

fn from_value(value: Value) -> Result<MembershipConfig> {
    serde_yaml::from_value(value).map_err(|e| Error::Config(e.to_string()))
}

fn apply_env_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, raw) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        if let Value::Mapping(map) = config {
            map.insert(Value::String(name.to_lowercase()), value);
        }
    }
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => merge_mapping(dmap, emap),
        // Un document vide (null) ne remplace rien
        (_, Value::Null) => {}
        (d, e) => *d = e.clone(),
    }
}

fn merge_mapping(dmap: &mut Mapping, emap: &Mapping) {
    for (k, v) in emap {
        match dmap.get_mut(k) {
            Some(dv) => merge_yaml(dv, v),
            None => {
                dmap.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_constants() {
        let config = MembershipConfig::from_yaml_str("").unwrap();
        assert_eq!(config, MembershipConfig::default());
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let config = MembershipConfig::from_yaml_str("max_commit_retries: 7\n").unwrap();
        assert_eq!(config.max_commit_retries, 7);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membership.yaml");
        std::fs::write(&path, "busy_timeout_ms: 100\ndatabase_path: /tmp/a.db\n").unwrap();

        let vars = vec![
            (format!("{}BUSY_TIMEOUT_MS", ENV_PREFIX), "250".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ];
        let config = MembershipConfig::load_with_env(Some(&path), vars).unwrap();

        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.database_path, PathBuf::from("/tmp/a.db"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            MembershipConfig::load_with_env(Some(&dir.path().join("absent.yaml")), Vec::new())
                .unwrap();
        assert_eq!(config, MembershipConfig::default());
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let err = MembershipConfig::from_yaml_str("max_commit_retries: many\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
