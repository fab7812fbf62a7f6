//! TOML configuration file loading
//!
//! Supports `~/.config/lingua/config.toml` as a persistent config source.
//! All fields are optional. The file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LinguaConfigFile {
    /// Speech synthesis settings
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Playback settings
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Device detection overrides
    #[serde(default)]
    pub device: DeviceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "http" or "openai"
    pub provider: Option<String>,

    /// Speech endpoint for the http provider
    pub url: Option<String>,

    /// Model (e.g. "tts-1-hd")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Default speed multiplier
    pub speed: Option<f32>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// "provider" or "engine"
    pub speed_strategy: Option<String>,

    /// Preferred fallback player executable (mpv, ffplay, afplay, pw-play)
    pub player: Option<String>,

    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: Option<u64>,
}

/// Device detection overrides
#[derive(Debug, Default, Deserialize)]
pub struct DeviceFileConfig {
    pub user_agent: Option<String>,
    pub viewport_width: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LinguaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LinguaConfigFile {
    config_file_path().map_or_else(LinguaConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> LinguaConfigFile {
    if !path.exists() {
        return LinguaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LinguaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LinguaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/lingua/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("lingua").join("config.toml"))
}
