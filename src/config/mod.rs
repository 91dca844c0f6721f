//! Persisted session configuration: one flat JSON record per user.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The single persistent record. Every field is independently optional; a
/// fresh record is all-empty and nothing is validated against Azure at load
/// time; the external command that consumes a field does the validating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group: String,
    pub cluster_name: String,
    pub location: String,
    #[serde(rename = "workloadIdentity")]
    pub identity_name: String,
}

impl Config {
    /// Fails if no cluster has been selected yet. Most pipeline operations
    /// require this before issuing any external call.
    pub fn require_cluster(&self) -> Result<()> {
        if self.cluster_name.is_empty() || self.resource_group.is_empty() {
            anyhow::bail!(
                "no cluster is currently selected, use 'spin-aks cluster use' or 'spin-aks cluster create' first"
            );
        }
        Ok(())
    }

    pub fn require_subscription(&self) -> Result<()> {
        if self.subscription_id.is_empty() {
            anyhow::bail!("subscription ID not set, please log in first with 'spin-aks login'");
        }
        Ok(())
    }
}

/// Reads and writes the config record at a fixed per-user path
/// (`~/.spin-aks/config.json`). Absence is an empty default, not an error.
/// Last writer wins; there is no locking.
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("failed to resolve user home directory")?;
        Self::with_dir(home.join(".spin-aks"))
    }

    pub fn with_dir(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn load(&self) -> Result<Config> {
        let path = self.path();
        if !path.exists() {
            return Ok(Config::default());
        }

        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        write_atomic(&self.path(), &json)
    }

    /// Overwrite the record with the all-empty default.
    pub fn reset(&self) -> Result<()> {
        self.save(&Config::default())
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, contents)
        .with_context(|| format!("failed to write temp config file {}", temp.display()))?;
    fs::rename(&temp, path)
        .with_context(|| format!("failed to rename config file into place at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (ConfigStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::with_dir(dir.path().join("cfg")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_load_absent_file_yields_default() {
        let (store, _dir) = store();
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let (store, _dir) = store();
        let config = Config {
            subscription_id: "sub-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            resource_group: "demo-rg".to_string(),
            cluster_name: "demo".to_string(),
            location: "eastus".to_string(),
            identity_name: "workload-identity".to_string(),
        };

        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn test_empty_record_round_trips() {
        let (store, _dir) = store();
        store.save(&Config::default()).unwrap();
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn test_reset_yields_empty_record() {
        let (store, _dir) = store();
        let config = Config {
            subscription_id: "sub-1".to_string(),
            cluster_name: "demo".to_string(),
            ..Config::default()
        };
        store.save(&config).unwrap();

        store.reset().unwrap();
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn test_json_keys_match_on_disk_schema() {
        let config = Config {
            subscription_id: "s".to_string(),
            identity_name: "i".to_string(),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"subscriptionId\""));
        assert!(json.contains("\"tenantId\""));
        assert!(json.contains("\"resourceGroup\""));
        assert!(json.contains("\"clusterName\""));
        assert!(json.contains("\"workloadIdentity\""));
    }

    #[test]
    fn test_missing_fields_deserialize_to_empty() {
        let config: Config = serde_json::from_str(r#"{"subscriptionId": "sub-1"}"#).unwrap();
        assert_eq!(config.subscription_id, "sub-1");
        assert!(config.cluster_name.is_empty());
        assert!(config.identity_name.is_empty());
    }
}
