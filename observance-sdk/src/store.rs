use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::rule::RecurrenceRule;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable home of rule definitions. The engine only needs load and save;
/// how and where rules live is up to the implementation.
pub trait CatalogStore {
    fn load(&self) -> Result<Vec<RecurrenceRule>>;
    fn save(&self, rules: &[RecurrenceRule]) -> Result<()>;
}

#[derive(Serialize, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    rules: Vec<RecurrenceRule>,
}

/// Rules kept in a single JSON or TOML file. Reads accept either format;
/// writes use JSON for `.json` paths and TOML otherwise.
pub struct FileCatalogStore {
    path: PathBuf,
}

impl FileCatalogStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the file and publishes its rules into a fresh catalog.
    pub fn open_catalog(&self) -> Result<Catalog> {
        Catalog::with_rules(self.load()?)
    }

    fn is_json(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }
}

/// Parses a rule file body, trying JSON first and then TOML.
pub fn parse_rules(content: &str) -> Result<Vec<RecurrenceRule>> {
    if let Ok(file) = serde_json::from_str::<CatalogFile>(content) {
        return Ok(file.rules);
    }
    let file: CatalogFile = toml::from_str(content)?;
    Ok(file.rules)
}

/// Parses a single rule definition, JSON first and then TOML.
pub fn parse_rule(content: &str) -> Result<RecurrenceRule> {
    match serde_json::from_str::<RecurrenceRule>(content) {
        Ok(rule) => Ok(rule),
        Err(_) => Ok(toml::from_str(content)?),
    }
}

impl CatalogStore for FileCatalogStore {
    fn load(&self) -> Result<Vec<RecurrenceRule>> {
        let content = std::fs::read_to_string(&self.path)?;
        let rules = parse_rules(&content)?;
        debug!(path = %self.path.display(), rules = rules.len(), "loaded catalog file");
        Ok(rules)
    }

    fn save(&self, rules: &[RecurrenceRule]) -> Result<()> {
        let file = CatalogFile {
            rules: rules.to_vec(),
        };
        let body = if self.is_json() {
            serde_json::to_string_pretty(&file)?
        } else {
            toml::to_string_pretty(&file)?
        };

        // Write to temp file first
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(Error::Io)?;
        temp_file.write_all(body.as_bytes())?;
        temp_file.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(path = %self.path.display(), rules = rules.len(), "saved catalog file");
        Ok(())
    }
}
