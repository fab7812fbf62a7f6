//! Configuration management for the speech player

pub mod file;

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::cache::DEFAULT_TTL;
use crate::device::RuntimeEnvironment;
use crate::player::SpeedStrategy;
use crate::voice::{HttpSynthesizer, OpenAiSynthesizer, PlayerProgram, SpeechSynthesizer, tts};
use crate::{Error, Result};

/// Speech endpoint used when nothing else is configured
pub const DEFAULT_TTS_URL: &str = "http://localhost:3000/api/tts";

/// Where synthesis requests go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthesisProvider {
    /// App speech endpoint taking `{ "text", "speed" }`
    #[default]
    Http,
    /// `OpenAI` speech API called directly
    OpenAi,
}

impl std::str::FromStr for SynthesisProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech player configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Synthesis configuration
    pub tts: TtsConfig,

    /// Playback configuration
    pub playback: PlaybackConfig,

    /// Device detection overrides
    pub device: DeviceConfig,
}

/// Synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: SynthesisProvider,

    /// Speech endpoint for [`SynthesisProvider::Http`]
    pub endpoint: Url,

    /// `OpenAI` API key
    pub api_key: Option<SecretString>,

    pub model: String,
    pub voice: String,

    /// Default speed multiplier for the CLI
    pub speed: f32,

    /// HTTP request timeout, none by default
    pub timeout: Option<Duration>,
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub speed_strategy: SpeedStrategy,

    /// Preferred fallback player
    pub player: Option<PlayerProgram>,

    /// Cache entry lifetime
    pub cache_ttl: Duration,
}

/// Device detection overrides
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub user_agent: Option<String>,
    pub viewport_width: Option<u32>,
}

fn parse_env<T: std::str::FromStr>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {name}: {e}")))
        })
        .transpose()
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Build configuration from a config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an invalid value
    pub fn from_sources(
        fc: file::LinguaConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let provider = env("LINGUA_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or_default();

        let endpoint_str = env("LINGUA_TTS_URL")
            .or(fc.tts.url)
            .unwrap_or_else(|| DEFAULT_TTS_URL.to_string());
        let endpoint = Url::parse(&endpoint_str)
            .map_err(|e| Error::Config(format!("invalid TTS url {endpoint_str}: {e}")))?;

        let api_key = env("OPENAI_API_KEY")
            .or(fc.api_keys.openai)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let speed = parse_env("LINGUA_TTS_SPEED", env("LINGUA_TTS_SPEED"))?
            .or(fc.tts.speed)
            .unwrap_or(1.0);

        let timeout = parse_env::<u64>("LINGUA_TTS_TIMEOUT_SECS", env("LINGUA_TTS_TIMEOUT_SECS"))?
            .or(fc.tts.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let tts = TtsConfig {
            provider,
            endpoint,
            api_key,
            model: env("LINGUA_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| tts::DEFAULT_MODEL.to_string()),
            voice: env("LINGUA_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| tts::DEFAULT_VOICE.to_string()),
            speed,
            timeout,
        };

        let speed_strategy = env("LINGUA_SPEED_STRATEGY")
            .or(fc.playback.speed_strategy)
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let player = match env("LINGUA_PLAYER").or(fc.playback.player) {
            Some(name) => Some(
                PlayerProgram::from_name(&name)
                    .ok_or_else(|| Error::Config(format!("unsupported player: {name}")))?,
            ),
            None => None,
        };

        let cache_ttl = parse_env::<u64>("LINGUA_CACHE_TTL_SECS", env("LINGUA_CACHE_TTL_SECS"))?
            .or(fc.playback.cache_ttl_secs)
            .map_or(DEFAULT_TTL, Duration::from_secs);

        let playback = PlaybackConfig {
            speed_strategy,
            player,
            cache_ttl,
        };

        let device = DeviceConfig {
            user_agent: env("LINGUA_USER_AGENT").or(fc.device.user_agent),
            viewport_width: parse_env("LINGUA_VIEWPORT_WIDTH", env("LINGUA_VIEWPORT_WIDTH"))?
                .or(fc.device.viewport_width),
        };

        Ok(Self {
            tts,
            playback,
            device,
        })
    }

    /// Runtime environment with configured overrides applied
    #[must_use]
    pub fn runtime_environment(&self) -> RuntimeEnvironment {
        let mut environment = RuntimeEnvironment::native();
        if let Some(agent) = &self.device.user_agent {
            environment = environment.with_user_agent(agent.clone());
        }
        if let Some(width) = self.device.viewport_width {
            environment = environment.with_viewport_width(width);
        }
        environment
    }

    /// Build the configured synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the `OpenAI` provider is selected without an API key
    pub fn synthesizer(&self) -> Result<Arc<dyn SpeechSynthesizer>> {
        match self.tts.provider {
            SynthesisProvider::Http => Ok(Arc::new(HttpSynthesizer::new(
                self.tts.endpoint.clone(),
                self.tts.timeout,
            )?)),
            SynthesisProvider::OpenAi => {
                let key = self.tts.api_key.clone().ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY is required for the openai provider".to_string())
                })?;

                let mut synth = OpenAiSynthesizer::new(key)?
                    .with_model(self.tts.model.clone())
                    .with_voice(self.tts.voice.clone());
                if let Some(timeout) = self.tts.timeout {
                    synth = synth.with_timeout(timeout)?;
                }

                Ok(Arc::new(synth))
            }
        }
    }
}
