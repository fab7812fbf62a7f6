//! Lingua Voice - text-to-speech playback core for a language tutor
//!
//! This library turns tutor replies into audible speech:
//! - Expiring audio cache keyed by text and speed
//! - Remote speech synthesis
//! - Primary audio-graph playback with a media-player fallback
//! - Device-specific playback strategy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               SpeechPlayer::speak                    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   AudioCache  ──miss──▶  SpeechSynthesizer           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   GraphEngine (primary)  │  MediaElementEngine       │
//! │   cpal + resampling      │  mpv / ffplay / afplay    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod player;
pub mod voice;

pub use cache::{AudioCache, CacheKey, CacheStats, CacheWriteSkipped};
pub use config::Config;
pub use device::{DeviceProfile, RuntimeEnvironment};
pub use error::{Error, Result};
pub use player::{EngineMode, PlayerState, SpeechPlayer, SpeedStrategy};
pub use voice::{PlaybackCallbacks, PlaybackEngine, SpeechSynthesizer};
