//! Text-to-speech (TTS) synthesis

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::clamp_speed;
use crate::{Error, Result};

/// Default `OpenAI` speech endpoint
pub const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Default `OpenAI` speech model
pub const DEFAULT_MODEL: &str = "tts-1-hd";

/// Default `OpenAI` voice
pub const DEFAULT_VOICE: &str = "alloy";

/// Turns text into an audio payload
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` at `speed`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Synthesis`] if the request cannot be completed and
    /// [`Error::SynthesisStatus`] on a non-success response
    async fn synthesize(&self, text: &str, speed: f32) -> Result<Bytes>;
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Read an audio body; any status but 200 is an error
async fn audio_body(response: reqwest::Response) -> Result<Bytes> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %body, "synthesis request rejected");
        return Err(Error::SynthesisStatus {
            status: status.as_u16(),
        });
    }

    response
        .bytes()
        .await
        .map_err(|e| Error::Synthesis(format!("failed to read audio body: {e}")))
}

/// Synthesizes through a speech endpoint taking `{ "text", "speed" }`
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSynthesizer {
    /// Synthesizer posting to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(endpoint: Url, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
        })
    }

    /// Endpoint requests are sent to
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, speed: f32) -> Result<Bytes> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            text: &'a str,
            speed: f32,
        }

        tracing::debug!(endpoint = %self.endpoint, chars = text.len(), speed, "requesting speech");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&SpeechRequest { text, speed })
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        audio_body(response).await
    }
}

/// Synthesizes directly against the `OpenAI` speech API
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    voice: String,
    endpoint: Url,
}

impl std::fmt::Debug for OpenAiSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSynthesizer")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl OpenAiSynthesizer {
    /// Create a synthesizer with the default model and voice
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        let endpoint = Url::parse(OPENAI_SPEECH_URL)
            .map_err(|e| Error::Config(format!("invalid OpenAI endpoint: {e}")))?;

        Ok(Self {
            client: build_client(None)?,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            endpoint,
        })
    }

    /// Use a different model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Use a different voice
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Send requests somewhere other than the public API
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Apply a request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_client(Some(timeout))?;
        Ok(self)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, speed: f32) -> Result<Bytes> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: clamp_speed(speed),
        };

        tracing::debug!(model = %self.model, voice = %self.voice, speed = request.speed, "requesting OpenAI speech");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        audio_body(response).await
    }
}
