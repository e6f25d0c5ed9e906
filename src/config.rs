use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::schema::{DEFAULT_DB_NAME, DEFAULT_VERSION};
use crate::storage::Database;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub database: PathBuf,
    pub name: String,
    pub version: u32,
    pub busy_timeout_ms: u64,
    pub legacy: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: default_database_path_in(Path::new(".")),
            name: DEFAULT_DB_NAME.to_string(),
            version: DEFAULT_VERSION,
            busy_timeout_ms: 5000,
            legacy: None,
        }
    }
}

impl StoreConfig {
    /// Build the persistence service described by this config
    pub fn database(&self) -> Database {
        Database::new(&self.database, &self.name, self.version)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("twinstore.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".twinstore").join(format!("{DEFAULT_DB_NAME}.db"))
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    if config.version == 0 {
        anyhow::bail!("invalid config at {}: version must be at least 1", path.display());
    }
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".twinstore/";

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if existing.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
    }

    let mut content = String::new();
    if gitignore_path.exists() {
        content.push_str(&std::fs::read_to_string(&gitignore_path)?);
        if !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("twinstore.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinstore.toml");
        std::fs::write(&path, "database = \"plant.db\"\nversion = 2\n").unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(config.database, PathBuf::from("plant.db"));
        assert_eq!(config.version, 2);
        assert_eq!(config.name, "mytwin");
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.legacy.is_none());

        let db = config.database();
        assert_eq!(db.version(), 2);
        assert_eq!(db.name(), "mytwin");
    }

    #[test]
    fn test_zero_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinstore.toml");
        std::fs::write(&path, "version = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_write_config_respects_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinstore.toml");
        let config = StoreConfig::default();

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ensure_gitignore_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();

        let contents = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(contents, "target/\n.twinstore/\n");
    }
}
