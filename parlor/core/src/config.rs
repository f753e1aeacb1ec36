//! TOML Configuration File Support
//!
//! Loads the session configuration from `$XDG_CONFIG_HOME/parlor/parlor.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [model]
//! name = "zephyr"
//! backend = "ollama"
//! system_prompt = "Answer briefly."
//!
//! [generation]
//! mode = "streaming"
//! max_new_tokens = 512
//! temperature = 0.9
//! top_k = 50
//! top_p = 1.0
//!
//! [ollama]
//! host = "localhost"
//! port = 11434
//!
//! [session]
//! max_turns = 0
//! max_prompt_bytes = 102400
//! event_capacity = 256
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendConfig, GenerationOptions};
use crate::controller::{ControllerConfig, GenerationMode, DEFAULT_SYSTEM_PROMPT};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Which inference backend to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local Ollama server
    #[default]
    Ollama,
    /// Developer backend
    Dev,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "dev" => Ok(Self::Dev),
            other => Err(format!(
                "unknown backend '{other}' (expected 'ollama' or 'dev')"
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Dev => write!(f, "dev"),
        }
    }
}

/// Truthy spellings accepted for boolean environment flags
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "y" | "yes"
    )
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[model]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelToml {
    /// Model identifier
    pub name: Option<String>,
    /// "ollama" or "dev"
    pub backend: Option<String>,
    /// System prompt (empty string disables it)
    pub system_prompt: Option<String>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// "streaming" or "complete"
    pub mode: Option<String>,
    /// Maximum new tokens
    pub max_new_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Top-k cutoff
    pub top_k: Option<u32>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,
}

/// `[ollama]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Server host
    pub host: Option<String>,
    /// Server port
    pub port: Option<u16>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Complete turns kept in the transcript (0 = unlimited)
    pub max_turns: Option<usize>,
    /// Largest accepted prompt in bytes (0 = unlimited)
    pub max_prompt_bytes: Option<usize>,
    /// Buffered turn events per subscriber
    pub event_capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParlorToml {
    /// Model section
    pub model: ModelToml,
    /// Generation section
    pub generation: GenerationToml,
    /// Ollama section
    pub ollama: OllamaToml,
    /// Session section
    pub session: SessionToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for one chat session
#[derive(Clone, Debug, PartialEq)]
pub struct ParlorConfig {
    /// Model identifier
    pub model: String,
    /// Backend to run
    pub backend: BackendKind,
    /// System prompt, if any
    pub system_prompt: Option<String>,
    /// Streaming or complete
    pub mode: GenerationMode,
    /// Sampling parameters
    pub options: GenerationOptions,
    /// Ollama host
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Complete turns kept (0 = unlimited)
    pub max_turns: usize,
    /// Largest accepted prompt in bytes (0 = unlimited)
    pub max_prompt_bytes: usize,
    /// Buffered turn events per subscriber
    pub event_capacity: usize,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ParlorConfig {
    fn default() -> Self {
        let controller = ControllerConfig::default();
        Self {
            model: controller.model,
            backend: BackendKind::Ollama,
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            mode: controller.mode,
            options: controller.options,
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            max_turns: controller.max_turns,
            max_prompt_bytes: controller.max_prompt_bytes,
            event_capacity: controller.event_capacity,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ParlorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Model name without its namespace ("org/model" -> "model")
    #[must_use]
    pub fn model_short_name(&self) -> &str {
        self.model
            .split_once('/')
            .map_or(self.model.as_str(), |(_, name)| name)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model name must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.options.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature {} is outside 0.0..=2.0",
                self.options.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.options.top_p) {
            return Err(ConfigError::ValidationError(format!(
                "top_p {} is outside 0.0..=1.0",
                self.options.top_p
            )));
        }
        if self.backend == BackendKind::Ollama && self.ollama_port == 0 {
            return Err(ConfigError::ValidationError(
                "ollama port must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Controller settings derived from this configuration
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            mode: self.mode,
            options: self.options.clone(),
            max_turns: self.max_turns,
            max_prompt_bytes: self.max_prompt_bytes,
            event_capacity: self.event_capacity,
            ..ControllerConfig::default()
        }
    }

    /// Backend connection settings derived from this configuration
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::Ollama => BackendConfig::ollama(&self.ollama_host, self.ollama_port),
            BackendKind::Dev => BackendConfig::dev(),
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/parlor/parlor.toml` or
/// `~/.config/parlor/parlor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parlor").join("parlor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values are out of range. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<ParlorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ParlorConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ParlorConfig, ConfigError> {
    let mut config = ParlorConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ParlorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

fn optional_prompt(prompt: &str) -> Option<String> {
    let prompt = prompt.trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ParlorConfig, toml: &ParlorToml) -> Result<(), ConfigError> {
    // Model settings
    if let Some(ref name) = toml.model.name {
        config.model.clone_from(name);
    }
    if let Some(ref backend) = toml.model.backend {
        config.backend = backend.parse().map_err(ConfigError::ValidationError)?;
    }
    if let Some(ref prompt) = toml.model.system_prompt {
        config.system_prompt = optional_prompt(prompt);
    }

    // Generation settings
    if let Some(ref mode) = toml.generation.mode {
        config.mode = mode.parse().map_err(ConfigError::ValidationError)?;
    }
    if let Some(tokens) = toml.generation.max_new_tokens {
        config.options.max_new_tokens = tokens;
    }
    if let Some(temperature) = toml.generation.temperature {
        config.options.temperature = temperature;
    }
    if let Some(top_k) = toml.generation.top_k {
        config.options.top_k = top_k;
    }
    if let Some(top_p) = toml.generation.top_p {
        config.options.top_p = top_p;
    }

    // Ollama settings
    if let Some(ref host) = toml.ollama.host {
        config.ollama_host.clone_from(host);
    }
    if let Some(port) = toml.ollama.port {
        config.ollama_port = port;
    }

    // Session settings
    if let Some(max_turns) = toml.session.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(max_bytes) = toml.session.max_prompt_bytes {
        config.max_prompt_bytes = max_bytes;
    }
    if let Some(capacity) = toml.session.event_capacity {
        config.event_capacity = capacity;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ParlorConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(model) = env("PARLOR_MODEL").filter(|m| !m.trim().is_empty()) {
        config.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(backend) = env("PARLOR_BACKEND") {
        match backend.parse() {
            Ok(kind) => {
                config.backend = kind;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring PARLOR_BACKEND"),
        }
    }
    if env("PARLOR_DEV_MODE").is_some_and(|v| is_truthy(&v)) {
        config.backend = BackendKind::Dev;
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = env("PARLOR_SYSTEM_PROMPT") {
        config.system_prompt = optional_prompt(&prompt);
        config.source = ConfigSource::Env;
    }
    if let Some(mode) = env("PARLOR_MODE") {
        match mode.parse() {
            Ok(mode) => {
                config.mode = mode;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring PARLOR_MODE"),
        }
    }
    if let Some(max_turns) = env("PARLOR_MAX_TURNS") {
        if let Ok(n) = max_turns.parse::<usize>() {
            config.max_turns = n;
            config.source = ConfigSource::Env;
        }
    }

    // Same variables the Ollama CLI reads
    if let Some(host) = env("OLLAMA_HOST").filter(|h| !h.trim().is_empty()) {
        config.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT") {
        if let Ok(p) = port.parse::<u16>() {
            config.ollama_port = p;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Model override
    pub model: Option<String>,
    /// Backend override
    pub backend: Option<BackendKind>,
    /// Generation mode override
    pub mode: Option<GenerationMode>,
    /// System prompt override (empty disables it)
    pub system_prompt: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set backend override
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set generation mode override
    #[must_use]
    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.backend.is_none()
            && self.mode.is_none()
            && self.system_prompt.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the result is out of range.
    pub fn apply(&self, config: &mut ParlorConfig) -> Result<(), ConfigError> {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref model) = self.model {
            config.model.clone_from(model);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ref prompt) = self.system_prompt {
            config.system_prompt = optional_prompt(prompt);
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
