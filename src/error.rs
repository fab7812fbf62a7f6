//! Error types for the speech playback core

use thiserror::Error;

/// Result type alias for speech playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synthesizing or playing speech
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Nothing to speak
    #[error("text is required")]
    EmptyText,

    /// Another speak call is still loading or playing on this player
    #[error("speech request already in progress")]
    ConcurrentSpeak,

    /// Synthesis request could not be completed (network, body read)
    #[error("synthesis request failed: {0}")]
    Synthesis(String),

    /// Synthesis service answered with a non-success status
    #[error("synthesis request failed with status {status}")]
    SynthesisStatus {
        /// HTTP status code returned by the service
        status: u16,
    },

    /// Audio device or context could not be initialized
    #[error("audio error: {0}")]
    Audio(String),

    /// Payload could not be decoded into playable audio
    #[error("decode failed: {0}")]
    Decode(String),

    /// Playback failed after the audio was prepared
    #[error("playback failed: {0}")]
    Playback(String),

    /// The player or engine was disposed
    #[error("player has been disposed")]
    Disposed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from the synthesis collaborator
    #[must_use]
    pub const fn is_synthesis(&self) -> bool {
        matches!(self, Self::Synthesis(_) | Self::SynthesisStatus { .. })
    }

    /// HTTP status carried by a synthesis failure, if any
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::SynthesisStatus { status } => Some(*status),
            _ => None,
        }
    }
}
