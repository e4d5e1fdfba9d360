// src/config.rs

use crate::error::ConfigError;
use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, Item, value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    #[serde(default)]
    pub reference: ReferenceSection,
    #[serde(default)]
    pub llm: LlmSection,
}

fn default_store_path() -> String {
    "data/results.db".to_string()
}

fn default_staging_dir() -> String {
    "data/staging".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            staging_dir: default_staging_dir(),
            reference: ReferenceSection::default(),
            llm: LlmSection::default(),
        }
    }
}

/// Where the reference emission-factor table lives and how its columns are named.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSection {
    #[serde(default = "default_reference_path")]
    pub path: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    #[serde(default = "default_factor_column")]
    pub factor_column: String,
    #[serde(default = "default_unit_column")]
    pub unit_column: String,
    #[serde(default = "default_category_column")]
    pub category_column: Option<String>,
}

fn default_reference_path() -> String {
    "base-carbone.csv".to_string()
}

fn default_name_column() -> String {
    "Nom base français".to_string()
}

fn default_factor_column() -> String {
    "Total poste non décomposé".to_string()
}

fn default_unit_column() -> String {
    "Unité français".to_string()
}

fn default_category_column() -> Option<String> {
    Some("Type Ligne".to_string())
}

impl Default for ReferenceSection {
    fn default() -> Self {
        Self {
            path: default_reference_path(),
            name_column: default_name_column(),
            factor_column: default_factor_column(),
            unit_column: default_unit_column(),
            category_column: default_category_column(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Ollama,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_backend")]
    pub backend: LlmBackend,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
    #[serde(default)]
    pub ollama: EndpointSection,
    #[serde(default)]
    pub remote: EndpointSection,
}

fn default_backend() -> LlmBackend {
    LlmBackend::Remote
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_document_chars() -> usize {
    12_000
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            cache: true,
            timeout_secs: default_timeout_secs(),
            max_document_chars: default_max_document_chars(),
            ollama: EndpointSection::default(),
            remote: EndpointSection::default(),
        }
    }
}

const OLLAMA_URL: &str = "http://localhost:11434/v1";
const OLLAMA_MODEL: &str = "qwen3:8b";
const REMOTE_URL: &str = "https://api.openai.com/v1";
const REMOTE_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl LlmSection {
    /// Base URL and model of the selected backend.
    pub fn endpoint(&self) -> (&str, &str) {
        let (section, url, model) = match self.backend {
            LlmBackend::Ollama => (&self.ollama, OLLAMA_URL, OLLAMA_MODEL),
            LlmBackend::Remote => (&self.remote, REMOTE_URL, REMOTE_MODEL),
        };
        (
            section.base_url.as_deref().unwrap_or(url),
            section.model.as_deref().unwrap_or(model),
        )
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Set one dotted key (e.g. `llm.remote.model`) in the config file,
    /// keeping the rest of the document as written.
    pub fn set_value(path: impl AsRef<Path>, key: &str, raw: &str) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let parts: Vec<&str> = key.split('.').map(str::trim).collect();
        let Some((last, tables)) = parts.split_last() else {
            return Err(ConfigError::InvalidKey(key.to_string()));
        };
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }

        let walk = |doc: &mut DocumentMut| -> Result<(), ConfigError> {
            let mut table = doc.as_table_mut();
            for part in tables {
                table = table
                    .entry(part)
                    .or_insert(toml_edit::table())
                    .as_table_mut()
                    .ok_or_else(|| ConfigError::InvalidKey(key.to_string()))?;
            }
            Ok(())
        };
        walk(&mut doc)?;

        // The written file must load again, so a value that only fits as a
        // string (a model named `4`) is stored as one.
        let mut outcome = Ok(());
        for candidate in [typed_value(raw), Some(value(raw))].into_iter().flatten() {
            let mut table = doc.as_table_mut();
            for part in tables {
                table = table[*part].as_table_mut().expect("created above");
            }
            table[*last] = candidate;
            outcome = toml::from_str::<Config>(&doc.to_string()).map(|_| ());
            if outcome.is_ok() {
                break;
            }
        }
        outcome?;

        fs::write(path, doc.to_string())?;
        info!(key, "Config updated");
        Ok(())
    }
}

/// The non-string reading of `raw`, if it has one.
fn typed_value(raw: &str) -> Option<Item> {
    if let Ok(b) = raw.parse::<bool>() {
        Some(value(b))
    } else if let Ok(i) = raw.parse::<i64>() {
        Some(value(i))
    } else {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Remote);
        assert_eq!(cfg.llm.max_document_chars, 12_000);
        assert_eq!(cfg.reference.unit_column, "Unité français");
    }

    #[test]
    fn test_partial_file() {
        let cfg: Config = toml::from_str(
            r#"
            store_path = "x.db"
            [llm]
            backend = "ollama"
            [llm.ollama]
            base_url = "http://gpu:11434/v1"
            model = "llama3"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store_path, "x.db");
        assert_eq!(cfg.llm.backend, LlmBackend::Ollama);
        assert_eq!(cfg.llm.endpoint(), ("http://gpu:11434/v1", "llama3"));
        assert!(cfg.llm.cache);
    }

    #[test]
    fn test_set_value_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "# results live here\nstore_path = \"a.db\"\n").unwrap();

        Config::set_value(&path, "llm.remote.model", "gpt-4o").unwrap();
        Config::set_value(&path, "llm.timeout_secs", "90").unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("# results live here"));

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.store_path, "a.db");
        assert_eq!(cfg.llm.endpoint(), (REMOTE_URL, "gpt-4o"));
        assert_eq!(cfg.llm.timeout_secs, 90);
    }

    #[test]
    fn test_set_value_keeps_string_keys_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");

        Config::set_value(&path, "llm.remote.model", "4").unwrap();
        Config::set_value(&path, "llm.ollama.model", "nan").unwrap();
        Config::set_value(&path, "store_path", "inf").unwrap();
        Config::set_value(&path, "llm.cache", "false").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.llm.endpoint(), (REMOTE_URL, "4"));
        assert_eq!(cfg.llm.ollama.model.as_deref(), Some("nan"));
        assert_eq!(cfg.store_path, "inf");
        assert!(!cfg.llm.cache);
    }

    #[test]
    fn test_set_value_refuses_unloadable_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "store_path = \"a.db\"\n").unwrap();

        assert!(matches!(
            Config::set_value(&path, "llm.timeout_secs", "soon"),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "store_path = \"a.db\"\n");
    }

    #[test]
    fn test_set_value_rejects_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "store_path = \"a.db\"\n").unwrap();
        assert!(matches!(
            Config::set_value(&path, "store_path.inner", "x"),
            Err(ConfigError::InvalidKey(_))
        ));
        assert!(matches!(
            Config::set_value(&path, "llm..model", "x"),
            Err(ConfigError::InvalidKey(_))
        ));
    }
}
