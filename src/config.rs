use crate::error::{AikaraError, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SUBJECT: &str = "Fuzzy Logic, Interface, and ML Techniques";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AikaraConfig {
    #[serde(default)]
    pub provider: ProviderType,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[default]
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Lecture subject named in the assistant's identity line.
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("embeddings.json")
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embed_model() -> String {
    "bge-m3".to_string()
}

fn default_chat_model() -> String {
    "llama3.2".to_string()
}

fn default_embed_timeout() -> u64 {
    10
}

fn default_generate_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_top_k() -> usize {
    5
}

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            embed_model: default_embed_model(),
            chat_model: default_chat_model(),
            embed_timeout_secs: default_embed_timeout(),
            generate_timeout_secs: default_generate_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub store: Option<PathBuf>,
    pub model: Option<String>,
    pub top_k: Option<usize>,
}

impl AikaraConfig {
    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(store) = &overrides.store {
            self.store.path = store.clone();
        }
        if let Some(model) = &overrides.model {
            self.ollama.chat_model = model.clone();
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
    }

    /// Settable keys, in display order.
    pub const KEYS: &'static [&'static str] = &[
        "store.path",
        "ollama.base_url",
        "ollama.embed_model",
        "ollama.chat_model",
        "ollama.embed_timeout_secs",
        "ollama.generate_timeout_secs",
        "ollama.max_retries",
        "retrieval.top_k",
        "assistant.subject",
    ];

    pub fn get_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "store.path" => self.store.path.display().to_string(),
            "ollama.base_url" => self.ollama.base_url.clone(),
            "ollama.embed_model" => self.ollama.embed_model.clone(),
            "ollama.chat_model" => self.ollama.chat_model.clone(),
            "ollama.embed_timeout_secs" => self.ollama.embed_timeout_secs.to_string(),
            "ollama.generate_timeout_secs" => self.ollama.generate_timeout_secs.to_string(),
            "ollama.max_retries" => self.ollama.max_retries.to_string(),
            "retrieval.top_k" => self.retrieval.top_k.to_string(),
            "assistant.subject" => self.assistant.subject.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "store.path" => self.store.path = PathBuf::from(value),
            "ollama.base_url" => self.ollama.base_url = value.trim_end_matches('/').to_string(),
            "ollama.embed_model" => self.ollama.embed_model = value.to_string(),
            "ollama.chat_model" => self.ollama.chat_model = value.to_string(),
            "ollama.embed_timeout_secs" => self.ollama.embed_timeout_secs = parse_number(key, value)?,
            "ollama.generate_timeout_secs" => {
                self.ollama.generate_timeout_secs = parse_number(key, value)?
            }
            "ollama.max_retries" => self.ollama.max_retries = parse_number(key, value)?,
            "retrieval.top_k" => self.retrieval.top_k = parse_number(key, value)?,
            "assistant.subject" => self.assistant.subject = value.to_string(),
            _ => {
                return Err(AikaraError::Configuration(format!(
                    "Unknown config key '{}'. Valid keys: {}",
                    key,
                    Self::KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        AikaraError::Configuration(format!("'{}' expects a number, got '{}'", key, value))
    })
}

pub struct ConfigManager {
    config: AikaraConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path_internal()?;
        Self::with_path(config_path)
    }

    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = Self::load_or_default(&config_path)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get(&self) -> &AikaraConfig {
        &self.config
    }

    /// Sets `key` and persists it. Only the file layer is written back, so
    /// values that came from `AIKARA_*` variables stay out of `config.toml`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut file_config = Self::load_layers(&self.config_path, false)?;
        file_config.set_value(key, value)?;
        Self::write_file(&self.config_path, &file_config)?;

        self.config.set_value(key, value)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn get_config_path_internal() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "aikara", "aikara").ok_or_else(|| {
            AikaraError::Configuration("Could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().join("config.toml"))
    }

    fn load_or_default(path: &Path) -> Result<AikaraConfig> {
        Self::load_layers(path, true)
    }

    fn load_layers(path: &Path, with_env: bool) -> Result<AikaraConfig> {
        let mut builder =
            Config::builder().add_source(File::from(path.to_path_buf()).required(false));
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix("AIKARA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let s = builder
            .build()
            .map_err(|e| AikaraError::Configuration(format!("Failed to build config: {}", e)))?;

        let config: AikaraConfig = s.try_deserialize().map_err(|e| {
            AikaraError::Configuration(format!("Failed to deserialize config: {}", e))
        })?;

        Ok(config)
    }

    fn write_file(path: &Path, config: &AikaraConfig) -> Result<()> {
        let toml = toml::to_string_pretty(config)
            .map_err(|e| AikaraError::Configuration(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, toml)
            .map_err(|e| AikaraError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
