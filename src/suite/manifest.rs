//! Suite manifest loading
//!
//! A manifest is a YAML or JSON file listing the items of a suite in order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::CommandItem;
use crate::models::{ItemCollection, ItemId, WorkItem};

/// Manifest errors
#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Duplicate item in manifest: {0}")]
    DuplicateItem(String),

    #[error("Item {0} has an empty command")]
    EmptyCommand(String),

    #[error("No tests could be collected from {0}")]
    Empty(PathBuf),
}

fn default_skip_exit_code() -> i32 {
    77
}

/// Manifest file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    /// Exit code that classifies an item as skipped
    #[serde(default = "default_skip_exit_code")]
    pub skip_exit_code: i32,

    /// Environment applied to every item, overridden per item
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    pub items: Vec<ManifestItem>,

    /// Directory relative item paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One manifest entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestItem {
    pub path: String,
    pub function: String,
    #[serde(default)]
    pub variation: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ManifestItem {
    pub fn id(&self) -> ItemId {
        ItemId::new(&self.path, &self.function, &self.variation)
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

impl Manifest {
    /// Load and validate a manifest
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SuiteError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| SuiteError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let mut manifest: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        };

        manifest.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if manifest.items.is_empty() {
            return Err(SuiteError::Empty(path.to_path_buf()));
        }
        manifest.validate()?;

        debug!(
            "Loaded {} items from {}",
            manifest.items.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Identities must be unique and every command non-empty
    pub fn validate(&self) -> Result<(), SuiteError> {
        let mut seen = HashSet::new();
        for item in &self.items {
            let id = item.id();
            if item.command.is_empty() {
                return Err(SuiteError::EmptyCommand(id.address()));
            }
            if !seen.insert(id.clone()) {
                return Err(SuiteError::DuplicateItem(id.address()));
            }
        }
        Ok(())
    }

    fn build(&self, item: &ManifestItem) -> Arc<dyn WorkItem> {
        let mut env = self.env.clone();
        env.extend(item.env.clone());

        let cwd = match &item.cwd {
            Some(cwd) if cwd.is_absolute() => cwd.clone(),
            Some(cwd) => self.base_dir.join(cwd),
            None => self.base_dir.clone(),
        };

        Arc::new(
            CommandItem::new(item.id(), item.command.clone())
                .env(env)
                .cwd(cwd)
                .timeout(item.timeout_secs.map(Duration::from_secs))
                .skip_exit_code(self.skip_exit_code),
        )
    }

    /// Every item, in manifest order
    pub fn items(&self) -> ItemCollection {
        Arc::new(self.items.iter().map(|i| self.build(i)).collect())
    }

    /// The items named by `ids`, in the order given. Identities the manifest
    /// no longer contains are logged and dropped.
    pub fn select(&self, ids: &[ItemId]) -> ItemCollection {
        let selected = ids
            .iter()
            .filter_map(|id| {
                let found = self.items.iter().find(|i| &i.id() == id);
                if found.is_none() {
                    warn!("Item {} is no longer in the manifest, skipping", id);
                }
                found.map(|i| self.build(i))
            })
            .collect();
        Arc::new(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    const YAML: &str = r#"
skip_exit_code: 5
env:
  SHARED: "1"
items:
  - path: tests/a.sh
    function: first
    command: ["sh", "tests/a.sh"]
  - path: tests/a.sh
    function: first
    variation: "x=2"
    command: ["sh", "tests/a.sh", "2"]
    timeout_secs: 30
"#;

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "suite.yaml", YAML);

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.skip_exit_code, 5);
        assert_eq!(manifest.items.len(), 2);
        assert_eq!(manifest.base_dir, dir.path());
        assert_eq!(manifest.items[1].id().address(), "tests/a.sh:first[x=2]");

        let items = manifest.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), &ItemId::new("tests/a.sh", "first", ""));
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "suite.json",
            r#"{"items": [{"path": "p", "function": "f", "command": ["true"]}]}"#,
        );

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.skip_exit_code, 77);
        assert_eq!(manifest.items[0].variation, "");
    }

    #[test]
    fn test_rejects_duplicates_and_empty_commands() {
        let dir = tempfile::tempdir().unwrap();
        let dup = write(
            dir.path(),
            "dup.json",
            r#"{"items": [
                {"path": "p", "function": "f", "command": ["true"]},
                {"path": "p", "function": "f", "command": ["false"]}
            ]}"#,
        );
        assert!(matches!(
            Manifest::load(&dup),
            Err(SuiteError::DuplicateItem(_))
        ));

        let empty_cmd = write(
            dir.path(),
            "empty_cmd.json",
            r#"{"items": [{"path": "p", "function": "f", "command": []}]}"#,
        );
        assert!(matches!(
            Manifest::load(&empty_cmd),
            Err(SuiteError::EmptyCommand(_))
        ));

        let nothing = write(dir.path(), "nothing.json", r#"{"items": []}"#);
        assert!(matches!(Manifest::load(&nothing), Err(SuiteError::Empty(_))));
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "suite.yaml", YAML);
        let manifest = Manifest::load(&path).unwrap();

        let wanted = vec![
            ItemId::new("tests/a.sh", "first", "x=2"),
            ItemId::new("tests/gone.sh", "old", ""),
            ItemId::new("tests/a.sh", "first", ""),
        ];
        let selected = manifest.select(&wanted);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].id(), &wanted[0]);
        assert_eq!(selected[1].id(), &wanted[2]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Manifest::load("/nonexistent/suite.yaml"),
            Err(SuiteError::Io { .. })
        ));
    }
}
