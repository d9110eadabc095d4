use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Error;
use crate::llm::types::WebSearchOptions;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "gigscout.toml";

/// Top-level configuration loaded from `gigscout.toml`.
///
/// Every section is optional; a missing file yields the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct GigscoutConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key. Defaults to
    /// `OPENAI_API_KEY` or `ANTHROPIC_API_KEY` depending on `name`.
    pub api_key_env: Option<String>,
    /// Override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            model: default_model(),
            api_key_env: None,
            base_url: None,
        }
    }
}

impl ProviderConfig {
    pub fn api_key_var(&self) -> String {
        match &self.api_key_env {
            Some(var) => var.clone(),
            None if self.name == "anthropic" => "ANTHROPIC_API_KEY".into(),
            None => "OPENAI_API_KEY".into(),
        }
    }
}

fn default_provider_name() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-5.2".into()
}

/// Settings for the poster extraction agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Model override; falls back to `provider.model`.
    pub model: Option<String>,
    #[serde(default = "default_extraction_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: default_extraction_max_tokens(),
        }
    }
}

fn default_extraction_max_tokens() -> u32 {
    4096
}

/// Settings for the web-search enrichment agent.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub model: Option<String>,
    #[serde(default = "default_enrichment_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub web_search: WebSearchOptions,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: default_enrichment_max_tokens(),
            web_search: WebSearchOptions::default(),
        }
    }
}

fn default_enrichment_max_tokens() -> u32 {
    2048
}

/// Watch-folder pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_watch_folder")]
    pub watch_folder: PathBuf,
    #[serde(default = "default_csv_path")]
    pub csv_output: PathBuf,
    /// Pause before reading a new file so the writer can finish.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_folder: default_watch_folder(),
            csv_output: default_csv_path(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

fn default_watch_folder() -> PathBuf {
    PathBuf::from("images_watchfolder")
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("concerts-async.csv")
}

fn default_settle_delay_ms() -> u64 {
    500
}

/// Interactive query agent settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_csv_path")]
    pub csv_file: PathBuf,
    pub model: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_query_max_tokens")]
    pub max_tokens: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            csv_file: default_csv_path(),
            model: None,
            max_turns: default_max_turns(),
            max_tokens: default_query_max_tokens(),
        }
    }
}

fn default_max_turns() -> usize {
    10
}

fn default_query_max_tokens() -> u32 {
    4096
}

impl GigscoutConfig {
    /// Parse a TOML string into a `GigscoutConfig`.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load an explicit config file, else `gigscout.toml` if present,
    /// else the defaults. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn extraction_model(&self) -> &str {
        self.extraction
            .model
            .as_deref()
            .unwrap_or(&self.provider.model)
    }

    pub fn enrichment_model(&self) -> &str {
        self.enrichment
            .model
            .as_deref()
            .unwrap_or(&self.provider.model)
    }

    pub fn query_model(&self) -> &str {
        self.query.model.as_deref().unwrap_or(&self.provider.model)
    }

    fn validate(&self) -> Result<(), Error> {
        match self.provider.name.as_str() {
            "anthropic" | "openai" => {}
            other => {
                return Err(Error::Config(format!(
                    "invalid provider.name '{other}': must be anthropic or openai"
                )));
            }
        }
        if self.provider.model.trim().is_empty() {
            return Err(Error::Config("provider.model must not be empty".into()));
        }
        if self.extraction.max_tokens == 0 {
            return Err(Error::Config(
                "extraction.max_tokens must be at least 1".into(),
            ));
        }
        if self.enrichment.max_tokens == 0 {
            return Err(Error::Config(
                "enrichment.max_tokens must be at least 1".into(),
            ));
        }
        if self.enrichment.web_search.max_uses == Some(0) {
            return Err(Error::Config(
                "enrichment.web_search.max_uses must be at least 1".into(),
            ));
        }
        if self.query.max_turns == 0 {
            return Err(Error::Config("query.max_turns must be at least 1".into()));
        }
        if self.query.max_tokens == 0 {
            return Err(Error::Config("query.max_tokens must be at least 1".into()));
        }
        Ok(())
    }
}
