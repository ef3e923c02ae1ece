//! Reconciler configuration.
//!
//! Built once at startup (from a JSON file, environment overrides, or
//! defaults) and passed into [`crate::stock_out::StockOutReconciler::new`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StockError, StockResult};

const ENV_DB_PATH: &str = "POS_STOCK_OUT_DB";
const ENV_LOG_DIR: &str = "POS_STOCK_OUT_LOG_DIR";

/// How often the settings catalog is probed for `IsSaleFromInventory`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaProbe {
    /// Check table/column presence on every reconciliation.
    #[default]
    PerCall,
    /// Check once per reconciler instance and reuse the answer.
    Cached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// SQLite file used when the reconciler owns its connections.
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Godown code preferred as the sales debit target (case-insensitive).
    pub default_godown_code: String,
    /// Written to `InventoryStockMovements.CreatedBy`.
    pub actor: String,
    pub schema_probe: SchemaProbe,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("pos.db"),
            busy_timeout_ms: 5000,
            default_godown_code: "MAIN".to_string(),
            actor: "system".to_string(),
            schema_probe: SchemaProbe::PerCall,
            log_dir: None,
        }
    }
}

impl ReconcilerConfig {
    /// Read a JSON config file, then apply environment overrides.
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load(path: &Path) -> StockResult<Self> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| StockError::Io {
                context: format!("read config {}", path.display()),
                source,
            })?;
            info!(path = %path.display(), "Loaded stock-out config");
            serde_json::from_str::<ReconcilerConfig>(&raw)?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            ReconcilerConfig::default()
        };

        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Replace file values with `POS_STOCK_OUT_DB` / `POS_STOCK_OUT_LOG_DIR`
    /// when they are set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(db) = env_non_empty(ENV_DB_PATH) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(dir) = env_non_empty(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> StockResult<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(StockError::Config("db_path must not be empty".into()));
        }
        if self.default_godown_code.trim().is_empty() {
            return Err(StockError::Config(
                "default_godown_code must not be empty".into(),
            ));
        }
        if self.actor.trim().is_empty() {
            return Err(StockError::Config("actor must not be empty".into()));
        }
        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn temp_config(contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stock_out_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("stock-out.json");
        std::fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_LOG_DIR);
        let path = std::env::temp_dir().join("stock_out_cfg_does_not_exist.json");
        let config = ReconcilerConfig::load(&path).expect("load defaults");
        assert_eq!(config.db_path, PathBuf::from("pos.db"));
        assert_eq!(config.default_godown_code, "MAIN");
        assert_eq!(config.actor, "system");
        assert_eq!(config.schema_probe, SchemaProbe::PerCall);
        assert!(config.log_dir.is_none());
    }

    #[test]
    #[serial]
    fn test_partial_file_keeps_defaults_for_missing_fields() {
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_LOG_DIR);
        let path = temp_config(r#"{ "db_path": "/tmp/shop.db", "schema_probe": "cached" }"#);
        let config = ReconcilerConfig::load(&path).expect("load");
        assert_eq!(config.db_path, PathBuf::from("/tmp/shop.db"));
        assert_eq!(config.schema_probe, SchemaProbe::Cached);
        assert_eq!(config.busy_timeout_ms, 5000);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        let path = temp_config(r#"{ "db_path": "/tmp/from-file.db" }"#);
        std::env::set_var(ENV_DB_PATH, "/tmp/from-env.db");
        std::env::set_var(ENV_LOG_DIR, "  ");
        let config = ReconcilerConfig::load(&path).expect("load");
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_LOG_DIR);

        assert_eq!(config.db_path, PathBuf::from("/tmp/from-env.db"));
        assert!(config.log_dir.is_none(), "blank env value is ignored");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_LOG_DIR);
        let path = temp_config(r#"{ "default_godown_code": "" }"#);
        let err = ReconcilerConfig::load(&path).unwrap_err();
        assert!(matches!(err, StockError::Config(_)));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());

        let path = temp_config("{ not json");
        let err = ReconcilerConfig::load(&path).unwrap_err();
        assert!(matches!(err, StockError::Json(_)));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
