//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `HomieConfig` struct, which holds the configured model backends and
//! storage locations, and a `load_config` function to load it from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use homie::config::{HomieConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: HomieConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config.registry().list());
//! ```

use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tracing::*;

use crate::{
    error::{HomieError, Result},
    history::DEFAULT_MAX_RECORDS,
    registry::{ModelDefinition, ModelRegistry, Provider},
};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "HOMIE_CONFIG";

/// Represents the application's configuration.
///
/// Paths left unset resolve under the per-platform config directory, see
/// [`crate::config_dir`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct HomieConfig {
    /// Every backend the user has set up.
    #[serde(default)]
    pub models: Vec<ModelDefinition>,

    /// Id of the model used when a command does not pick one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,

    // History database url (SQLite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_db_url: Option<String>,

    // Maximum number of stored page conversations
    #[serde(default = "default_max_history_records")]
    pub max_history_records: usize,

    // Directory holding assistant preset files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistants_dir: Option<String>,
}

fn default_max_history_records() -> usize {
    DEFAULT_MAX_RECORDS
}

impl HomieConfig {
    /// A starter configuration with one placeholder OpenAI model.
    pub fn sample() -> Self {
        Self {
            models: vec![ModelDefinition {
                id: "openai-gpt-4o-mini".to_string(),
                name: "GPT-4o mini".to_string(),
                provider: Provider::OpenAi,
                api_key: "CHANGEME".to_string(),
                api_endpoint: None,
                model: "gpt-4o-mini".to_string(),
                temperature: None,
                max_tokens: None,
            }],
            selected_model: Some("openai-gpt-4o-mini".to_string()),
            history_db_url: None,
            max_history_records: DEFAULT_MAX_RECORDS,
            assistants_dir: None,
        }
    }

    /// The configured models, ready for resolution.
    pub fn registry(&self) -> ModelRegistry {
        ModelRegistry::new(self.models.clone(), self.selected_model.clone())
    }

    /// SQLite url for the history store, `<config_dir>/history.db` unless set.
    pub fn history_db_url(&self, config_dir: &Path) -> String {
        self.history_db_url.clone().unwrap_or_else(|| {
            config_dir
                .join("history.db")
                .to_string_lossy()
                .into_owned()
        })
    }

    /// Assistant preset directory, `<config_dir>/assistants` unless set.
    pub fn assistants_dir(&self, config_dir: &Path) -> PathBuf {
        self.assistants_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("assistants"))
    }
}

/// Where the config file lives: `$HOMIE_CONFIG` if set, else `<config_dir>/config.yaml`.
pub fn default_config_path(config_dir: &Path) -> PathBuf {
    match env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir.join("config.yaml"),
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
///
/// - [`HomieError::Io`] when the file cannot be read.
/// - [`HomieError::Yaml`] when it does not parse.
/// - [`HomieError::Config`] when two models share an id.
///
/// # Examples
///
/// ```no_run
/// use homie::config::load_config;
///
/// match load_config("/path/to/config.yaml") {
///     Ok(config) => println!("{} models", config.models.len()),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> Result<HomieConfig> {
    debug!("Loading config: {}", file);
    let content = fs::read_to_string(file)?;
    let config: HomieConfig = serde_yaml::from_str(&content)?;

    for (i, model) in config.models.iter().enumerate() {
        if config.models[..i].iter().any(|m| m.id == model.id) {
            return Err(HomieError::Config(format!(
                "duplicate model id '{}'",
                model.id
            )));
        }
    }

    Ok(config)
}

/// Serialize `config` to `file`, creating parent directories.
pub fn save_config(file: &Path, config: &HomieConfig) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("Writing config file: {}", file.display());
    fs::write(file, serde_yaml::to_string(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_load_config_valid_file() {
        // Create a temporary file with a valid configuration.
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
models:
  - id: local
    name: Local llama
    provider: custom
    api_key: "example_api_key"
    api_endpoint: "http://localhost:5001/v1/"
    model: "llama-3"
    temperature: 0.0
  - id: gpt
    name: GPT
    provider: openai
    api_key: "sk-example"
    model: "gpt-4o-mini"
selected_model: gpt
history_db_url: "homie.db"
max_history_records: 20
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].provider, Provider::Custom);
        assert_eq!(config.models[0].temperature, Some(0.0));
        assert_eq!(config.selected_model.as_deref(), Some("gpt"));
        assert_eq!(config.max_history_records, 20);
        assert_eq!(config.history_db_url(Path::new("/cfg")), "homie.db");

        let resolved = config.registry().resolve(Some("local")).unwrap();
        assert_eq!(resolved.endpoint, "http://localhost:5001/v1");
        assert_eq!(resolved.temperature, 0.0);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "models: []").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.max_history_records, DEFAULT_MAX_RECORDS);
        assert_eq!(
            config.assistants_dir(Path::new("/cfg")),
            PathBuf::from("/cfg/assistants")
        );
        assert!(config.history_db_url(Path::new("/cfg")).ends_with("history.db"));
        assert!(matches!(
            config.registry().resolve(None),
            Err(HomieError::NoModelsConfigured)
        ));
    }

    #[test]
    fn test_load_config_invalid_file() {
        // Try to load a configuration from a non-existent file path.
        let config = load_config("non/existent/path");

        assert!(matches!(config, Err(HomieError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_format() {
        // Create a temporary file with an invalid configuration format.
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(matches!(config, Err(HomieError::Yaml(_))));
    }

    #[test]
    fn test_duplicate_model_ids_are_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
models:
  - {{id: a, name: A, provider: openai, api_key: k, model: m}}
  - {{id: a, name: B, provider: openai, api_key: k, model: m}}
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(matches!(config, Err(HomieError::Config(_))));
    }

    #[test]
    fn test_sample_config_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        save_config(&path, &HomieConfig::sample()).unwrap();
        let loaded = load_config(path.to_str().unwrap()).unwrap();

        assert_eq!(loaded, HomieConfig::sample());
        assert_eq!(loaded.registry().resolve(None).unwrap().model, "gpt-4o-mini");
    }
}
