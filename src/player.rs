//! Speech orchestration
//!
//! [`SpeechPlayer`] turns text into sound: cache lookup, synthesis on a
//! miss, then playback on the engine the device profile calls for. A
//! failing primary engine is retried once on the fallback engine and never
//! used again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::cache::AudioCache;
use crate::config::Config;
use crate::device::DeviceProfile;
use crate::voice::{
    CommandPlayer, ElementSettings, GraphEngine, MediaElementEngine, PlaybackCallbacks,
    PlaybackEngine, SpeechSynthesizer, clamp_speed,
};
use crate::{Error, Result};

/// Which engine plays the next payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Audio graph with decode and resampling
    Primary,
    /// Simple media element
    Fallback,
}

impl EngineMode {
    /// Starting mode for a device
    #[must_use]
    pub const fn for_profile(profile: &DeviceProfile) -> Self {
        if profile.is_mobile {
            Self::Fallback
        } else {
            Self::Primary
        }
    }

    /// Mode after the primary engine has failed once
    #[must_use]
    pub const fn after_primary_failure(self) -> Self {
        match self {
            Self::Primary | Self::Fallback => Self::Fallback,
        }
    }
}

/// Where the speed multiplier is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedStrategy {
    /// Synthesize at the requested speed and play at normal rate
    #[default]
    Provider,
    /// Synthesize at normal speed and let the engine change the rate
    Engine,
}

impl SpeedStrategy {
    /// Speed sent to the synthesizer
    #[must_use]
    pub const fn synthesis_speed(self, speed: f32) -> f32 {
        match self {
            Self::Provider => speed,
            Self::Engine => 1.0,
        }
    }

    /// Speed handed to the playback engine
    #[must_use]
    pub const fn playback_speed(self, speed: f32) -> f32 {
        match self {
            Self::Provider => 1.0,
            Self::Engine => speed,
        }
    }
}

impl std::str::FromStr for SpeedStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provider" => Ok(Self::Provider),
            "engine" => Ok(Self::Engine),
            other => Err(Error::Config(format!("unknown speed strategy: {other}"))),
        }
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Ready for a speak call
    Idle,
    /// Looking up or synthesizing audio
    Loading,
    /// Handed to an engine
    Playing {
        /// Engine doing the playback
        engine: EngineMode,
    },
}

/// Marks a speak call in flight; resets the player to idle when dropped
struct InFlight<'a> {
    state: &'a Mutex<PlayerState>,
}

impl<'a> InFlight<'a> {
    fn acquire(state: &'a Mutex<PlayerState>) -> Option<Self> {
        let mut current = state.lock();
        if *current != PlayerState::Idle {
            return None;
        }
        *current = PlayerState::Loading;
        drop(current);

        Some(Self { state })
    }

    fn playing(&self, engine: EngineMode) {
        *self.state.lock() = PlayerState::Playing { engine };
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state.lock() = PlayerState::Idle;
    }
}

/// Text-to-speech player with caching and engine fallback
pub struct SpeechPlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    primary: Arc<dyn PlaybackEngine>,
    fallback: Arc<dyn PlaybackEngine>,
    cache: AudioCache,
    profile: DeviceProfile,
    speed_strategy: SpeedStrategy,
    mode: Mutex<EngineMode>,
    state: Mutex<PlayerState>,
    disposed: AtomicBool,
}

impl fmt::Debug for SpeechPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechPlayer")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .field("profile", &self.profile)
            .field("speed_strategy", &self.speed_strategy)
            .field("mode", &*self.mode.lock())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SpeechPlayer {
    /// Player for a device profile
    ///
    /// Mobile profiles start on the fallback engine, which should already be
    /// tuned with [`ElementSettings::mobile`].
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        primary: Arc<dyn PlaybackEngine>,
        fallback: Arc<dyn PlaybackEngine>,
        profile: DeviceProfile,
    ) -> Self {
        let mode = EngineMode::for_profile(&profile);
        tracing::debug!(?profile, ?mode, "speech player created");

        Self {
            synthesizer,
            primary,
            fallback,
            cache: AudioCache::default(),
            profile,
            speed_strategy: SpeedStrategy::default(),
            mode: Mutex::new(mode),
            state: Mutex::new(PlayerState::Idle),
            disposed: AtomicBool::new(false),
        }
    }

    /// Player wired from configuration: cpal graph, external media player
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let profile = config.runtime_environment().profile();
        let fallback = MediaElementEngine::new(
            CommandPlayer::detect(config.playback.player),
            ElementSettings::for_profile(&profile),
        );

        Ok(Self::new(
            config.synthesizer()?,
            Arc::new(GraphEngine::cpal()),
            Arc::new(fallback),
            profile,
        )
        .with_cache(AudioCache::new(config.playback.cache_ttl))
        .with_speed_strategy(config.playback.speed_strategy))
    }

    /// Use a specific (possibly shared) cache
    #[must_use]
    pub fn with_cache(mut self, cache: AudioCache) -> Self {
        self.cache = cache;
        self
    }

    /// Choose where the speed multiplier is applied
    #[must_use]
    pub const fn with_speed_strategy(mut self, strategy: SpeedStrategy) -> Self {
        self.speed_strategy = strategy;
        self
    }

    /// Speak `text` at `speed`, resolving when playback ends
    ///
    /// Only one call may be in flight; a second one is rejected. Speeds are
    /// clamped into the supported range. Every failure fires `on_error`
    /// once and is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the player is busy or disposed, the text is empty,
    /// synthesis fails or no engine can play the audio
    pub async fn speak(&self, text: &str, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        self.run(text, speed, callbacks).await.map_err(|e| {
            tracing::error!(error = %e, "speak failed");
            callbacks.fail(e)
        })
    }

    async fn run(&self, text: &str, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        if text.trim().is_empty() {
            return Err(Error::EmptyText);
        }

        let guard = InFlight::acquire(&self.state).ok_or(Error::ConcurrentSpeak)?;
        let speed = clamp_speed(speed);

        tracing::debug!(
            chars = text.chars().count(),
            speed,
            mode = ?self.mode(),
            "speak start"
        );

        let payload = self.fetch(text, speed).await?;
        self.play(&guard, payload, speed, callbacks).await
    }

    /// Cached payload, or a fresh synthesis that gets cached
    async fn fetch(&self, text: &str, speed: f32) -> Result<Bytes> {
        if let Some(payload) = self.cache.get(text, speed) {
            tracing::debug!(size = payload.len(), speed, "speech cache hit");
            return Ok(payload);
        }

        let payload = self
            .synthesizer
            .synthesize(text, self.speed_strategy.synthesis_speed(speed))
            .await?;

        tracing::debug!(size = payload.len(), speed, "synthesized speech");
        self.cache.set(text, speed, payload.clone());

        Ok(payload)
    }

    async fn play(
        &self,
        guard: &InFlight<'_>,
        payload: Bytes,
        speed: f32,
        callbacks: &PlaybackCallbacks,
    ) -> Result<()> {
        let speed = self.speed_strategy.playback_speed(speed);
        // on_error belongs to speak(), which may still recover; on_start
        // must not fire again if the fallback replays the payload
        let engine_callbacks = callbacks.without_error().start_once();

        if self.mode() == EngineMode::Primary {
            guard.playing(EngineMode::Primary);

            match self.primary.play(payload.clone(), speed, &engine_callbacks).await {
                Ok(()) => return Ok(()),
                Err(e) if self.disposed.load(Ordering::SeqCst) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        engine = self.primary.name(),
                        "primary engine failed, switching to fallback"
                    );
                    self.degrade();
                }
            }
        }

        guard.playing(EngineMode::Fallback);
        self.fallback.play(payload, speed, &engine_callbacks).await
    }

    /// Switch to the fallback engine for good and release the primary one
    fn degrade(&self) {
        let mut mode = self.mode.lock();
        if *mode == EngineMode::Primary {
            *mode = mode.after_primary_failure();
            drop(mode);
            self.primary.dispose();
        }
    }

    /// Stop current playback; no-op when idle
    pub fn stop(&self) {
        let state = *self.state.lock();
        if let PlayerState::Playing { engine } = state {
            tracing::debug!(?engine, "stopping speech");
            self.engine(engine).stop();
        }
    }

    /// Release audio resources; later speak calls fail
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("disposing speech player");
        self.primary.dispose();
        self.fallback.stop();
    }

    fn engine(&self, mode: EngineMode) -> &dyn PlaybackEngine {
        match mode {
            EngineMode::Primary => self.primary.as_ref(),
            EngineMode::Fallback => self.fallback.as_ref(),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    /// Whether audio is being fetched
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state() == PlayerState::Loading
    }

    /// Whether an engine is playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self.state(), PlayerState::Playing { .. })
    }

    /// Engine the next payload goes to
    #[must_use]
    pub fn mode(&self) -> EngineMode {
        *self.mode.lock()
    }

    /// Device classification made at construction
    #[must_use]
    pub const fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Speech cache in use
    #[must_use]
    pub const fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Where the speed multiplier is applied
    #[must_use]
    pub const fn speed_strategy(&self) -> SpeedStrategy {
        self.speed_strategy
    }
}
