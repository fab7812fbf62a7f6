//! Voice output
//!
//! Speech synthesis plus the two playback engines: a primary engine driving
//! an audio graph and a fallback engine driving a simple media player.

mod callbacks;
mod engine;
pub mod graph;
pub mod media;
mod playback;
pub mod tts;

pub use callbacks::PlaybackCallbacks;
pub use engine::{MAX_SPEED, MIN_SPEED, PlaybackEngine, clamp_speed};
pub use graph::{AudioGraph, CpalGraph, GraphState, SampleBuffer, samples_to_wav};
pub use media::{CommandPlayer, ElementSettings, MediaElementEngine, MediaPlayer, PlayerProgram, StartCue};
pub use playback::GraphEngine;
pub use tts::{HttpSynthesizer, OpenAiSynthesizer, SpeechSynthesizer};
