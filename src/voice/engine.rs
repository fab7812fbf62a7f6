//! Common playback engine contract

use async_trait::async_trait;
use bytes::Bytes;

use super::PlaybackCallbacks;
use crate::Result;

/// Slowest supported playback speed
pub const MIN_SPEED: f32 = 0.25;

/// Fastest supported playback speed
pub const MAX_SPEED: f32 = 4.0;

/// Clamp a speed multiplier into the supported range
///
/// NaN falls back to normal speed.
#[must_use]
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

/// Something that can turn an audio payload into sound
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Play `payload` to completion
    ///
    /// Out-of-range speeds are clamped. Failures fire `on_error` and are
    /// returned.
    async fn play(&self, payload: Bytes, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()>;

    /// Stop the current playback, if any
    fn stop(&self);

    /// Release underlying resources for good
    fn dispose(&self) {
        self.stop();
    }

    /// Whether audio is currently playing
    fn is_playing(&self) -> bool;
}
