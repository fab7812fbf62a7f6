//! Fallback playback engine
//!
//! Hands the payload to a simple media element: the bytes are written to a
//! temporary file and played by a [`MediaPlayer`]. Used on mobile profiles
//! and whenever the audio graph has failed.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{PlaybackCallbacks, PlaybackEngine, clamp_speed};
use crate::device::DeviceProfile;
use crate::{Error, Result};

/// When the start hook fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCue {
    /// As soon as loading begins
    LoadStart,
    /// Once the media is loaded and ready to play through
    CanPlayThrough,
}

/// Media element tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSettings {
    /// When `on_start` fires
    pub start_cue: StartCue,
    /// Output volume in [0.0, 1.0]
    pub volume: f32,
    /// Play inline rather than in a fullscreen player (iOS)
    pub plays_inline: bool,
    /// Load the whole file before playing
    pub preload: bool,
}

impl Default for ElementSettings {
    fn default() -> Self {
        Self::desktop()
    }
}

impl ElementSettings {
    /// Desktop fallback behavior
    #[must_use]
    pub const fn desktop() -> Self {
        Self {
            start_cue: StartCue::LoadStart,
            volume: 1.0,
            plays_inline: false,
            preload: false,
        }
    }

    /// Mobile tuning: preload, full volume, inline on iOS
    #[must_use]
    pub const fn mobile(profile: &DeviceProfile) -> Self {
        Self {
            start_cue: StartCue::CanPlayThrough,
            volume: 1.0,
            plays_inline: profile.is_ios,
            preload: true,
        }
    }

    /// Settings appropriate for `profile`
    #[must_use]
    pub const fn for_profile(profile: &DeviceProfile) -> Self {
        if profile.is_mobile {
            Self::mobile(profile)
        } else {
            Self::desktop()
        }
    }
}

/// A simple media element
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether a playback rate can be applied
    fn supports_rate(&self) -> bool;

    /// Check the media at `path` can be played
    ///
    /// # Errors
    ///
    /// Returns error if the media cannot be loaded
    async fn load(&self, path: &Path, settings: &ElementSettings) -> Result<()>;

    /// Play the media at `path` until it ends
    ///
    /// Dropping the returned future must stop the sound.
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn play(&self, path: &Path, rate: Option<f32>, settings: &ElementSettings) -> Result<()>;
}

/// Plays payloads through a media element backed by a temporary file
pub struct MediaElementEngine<P> {
    player: P,
    settings: ElementSettings,
    current: Mutex<Option<oneshot::Sender<()>>>,
}

impl<P: MediaPlayer> MediaElementEngine<P> {
    /// Engine using `player` with the given tuning
    #[must_use]
    pub const fn new(player: P, settings: ElementSettings) -> Self {
        Self {
            player,
            settings,
            current: Mutex::new(None),
        }
    }

    /// Element tuning in use
    #[must_use]
    pub const fn settings(&self) -> &ElementSettings {
        &self.settings
    }

    /// Underlying media player
    #[must_use]
    pub const fn player(&self) -> &P {
        &self.player
    }

    async fn run(&self, payload: &[u8], speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        // Installed before loading so a stop during load is kept
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.current.lock() = Some(stop_tx);

        let outcome = self.play_media(payload, speed, callbacks, &mut stop_rx).await;
        self.current.lock().take();

        outcome?;
        callbacks.ended();
        Ok(())
    }

    async fn play_media(
        &self,
        payload: &[u8],
        speed: f32,
        callbacks: &PlaybackCallbacks,
        stop_rx: &mut oneshot::Receiver<()>,
    ) -> Result<()> {
        if self.settings.start_cue == StartCue::LoadStart {
            callbacks.started();
        }

        // Removed on drop, which covers every exit path below
        let media = write_media(payload)?;

        self.player.load(media.path(), &self.settings).await?;

        if stop_rx.try_recv().is_ok() {
            tracing::debug!(player = self.player.name(), "media stopped while loading");
            return Ok(());
        }

        if self.settings.start_cue == StartCue::CanPlayThrough {
            callbacks.started();
        }

        let rate = self.player.supports_rate().then_some(speed);
        if rate.is_none() && (speed - 1.0).abs() > f32::EPSILON {
            tracing::debug!(player = self.player.name(), speed, "player ignores playback rate");
        }

        let outcome = tokio::select! {
            result = self.player.play(media.path(), rate, &self.settings) => result,
            Ok(()) = stop_rx => {
                tracing::debug!(player = self.player.name(), "media playback stopped");
                Ok(())
            }
        };

        if let Err(e) = media.close() {
            tracing::warn!(error = %e, "failed to remove temporary media file");
        }

        outcome
    }
}

#[async_trait]
impl<P: MediaPlayer> PlaybackEngine for MediaElementEngine<P> {
    fn name(&self) -> &'static str {
        "media"
    }

    async fn play(&self, payload: Bytes, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        let speed = clamp_speed(speed);

        tracing::debug!(
            size = payload.len(),
            speed,
            player = self.player.name(),
            "media playback start"
        );

        self.run(&payload, speed, callbacks).await.map_err(|e| {
            tracing::warn!(error = %e, player = self.player.name(), "media playback failed");
            callbacks.fail(e)
        })
    }

    fn stop(&self) {
        if let Some(stop) = self.current.lock().take() {
            let _ = stop.send(());
        }
    }

    fn is_playing(&self) -> bool {
        self.current.lock().is_some()
    }
}

/// Write `payload` to a temporary file named after its container format
fn write_media(payload: &[u8]) -> Result<tempfile::NamedTempFile> {
    let suffix = if payload.starts_with(b"RIFF") { ".wav" } else { ".mp3" };

    let mut file = tempfile::Builder::new()
        .prefix("lingua-speech-")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(payload)?;
    file.flush()?;

    Ok(file)
}

/// Command-line audio players the fallback engine can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerProgram {
    /// mpv
    Mpv,
    /// ffplay from `FFmpeg`
    Ffplay,
    /// macOS afplay
    Afplay,
    /// `PipeWire` pw-play
    PwPlay,
}

impl PlayerProgram {
    /// Detection order
    pub const ALL: [Self; 4] = [Self::Mpv, Self::Ffplay, Self::Afplay, Self::PwPlay];

    /// Executable name
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Mpv => "mpv",
            Self::Ffplay => "ffplay",
            Self::Afplay => "afplay",
            Self::PwPlay => "pw-play",
        }
    }

    /// Whether the program can change playback speed
    #[must_use]
    pub const fn supports_rate(self) -> bool {
        !matches!(self, Self::PwPlay)
    }

    /// Parse a program by executable name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.binary().eq_ignore_ascii_case(name.trim()))
    }

    /// Command-line arguments for one playback
    #[must_use]
    pub fn args(self, path: &Path, rate: Option<f32>, settings: &ElementSettings) -> Vec<OsString> {
        let volume = settings.volume.clamp(0.0, 1.0);
        let mut args: Vec<OsString> = Vec::new();

        match self {
            Self::Mpv => {
                args.extend(["--no-video", "--really-quiet"].map(OsString::from));
                args.push(format!("--volume={}", (volume * 100.0).round()).into());
                if let Some(rate) = rate {
                    args.push(format!("--speed={rate}").into());
                }
                if !settings.preload {
                    args.push("--cache=no".into());
                }
            }
            Self::Ffplay => {
                args.extend(["-nodisp", "-autoexit", "-loglevel", "error", "-volume"].map(OsString::from));
                args.push(format!("{}", (volume * 100.0).round()).into());
                if let Some(rate) = rate {
                    args.push("-af".into());
                    args.push(atempo_chain(rate).into());
                }
            }
            Self::Afplay => {
                args.push("-v".into());
                args.push(format!("{volume}").into());
                if let Some(rate) = rate {
                    args.push("-r".into());
                    args.push(format!("{rate}").into());
                }
            }
            Self::PwPlay => {
                args.push(format!("--volume={volume}").into());
            }
        }

        args.push(path.as_os_str().to_owned());
        args
    }
}

/// `atempo` filter chain for `rate`; each stage is limited to [0.5, 2.0]
fn atempo_chain(rate: f32) -> String {
    let mut remaining = rate;
    let mut stages = Vec::new();

    while remaining < 0.5 {
        stages.push("atempo=0.5".to_string());
        remaining /= 0.5;
    }
    while remaining > 2.0 {
        stages.push("atempo=2".to_string());
        remaining /= 2.0;
    }
    stages.push(format!("atempo={remaining}"));

    stages.join(",")
}

/// Media element backed by an external player process
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    resolved: Option<(PlayerProgram, PathBuf)>,
}

impl CommandPlayer {
    /// Find a player on `PATH`, trying `preferred` first
    ///
    /// A missing player is reported when media is loaded, not here.
    #[must_use]
    pub fn detect(preferred: Option<PlayerProgram>) -> Self {
        let resolved = preferred
            .into_iter()
            .chain(PlayerProgram::ALL)
            .find_map(|program| {
                which::which(program.binary())
                    .ok()
                    .map(|path| (program, path))
            });

        match &resolved {
            Some((program, path)) => tracing::debug!(
                program = program.binary(),
                path = %path.display(),
                "media player found"
            ),
            None => tracing::warn!("no supported media player found on PATH"),
        }

        Self { resolved }
    }

    /// Use a specific executable
    #[must_use]
    pub const fn with_binary(program: PlayerProgram, path: PathBuf) -> Self {
        Self {
            resolved: Some((program, path)),
        }
    }

    /// Program in use, if one was found
    #[must_use]
    pub fn program(&self) -> Option<PlayerProgram> {
        self.resolved.as_ref().map(|(program, _)| *program)
    }

    fn resolved(&self) -> Result<&(PlayerProgram, PathBuf)> {
        self.resolved.as_ref().ok_or_else(|| {
            Error::Playback(
                "no supported audio player found; install mpv, ffplay or pw-play".to_string(),
            )
        })
    }
}

#[async_trait]
impl MediaPlayer for CommandPlayer {
    fn name(&self) -> &str {
        self.program().map_or("none", PlayerProgram::binary)
    }

    fn supports_rate(&self) -> bool {
        self.program().is_some_and(PlayerProgram::supports_rate)
    }

    async fn load(&self, path: &Path, _settings: &ElementSettings) -> Result<()> {
        self.resolved()?;

        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() == 0 {
            return Err(Error::Playback("media file is empty".to_string()));
        }

        Ok(())
    }

    async fn play(&self, path: &Path, rate: Option<f32>, settings: &ElementSettings) -> Result<()> {
        let (program, binary) = self.resolved()?;

        let status = tokio::process::Command::new(binary)
            .args(program.args(path, rate, settings))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Playback(format!("failed to launch {}: {e}", program.binary())))?;

        if !status.success() {
            return Err(Error::Playback(format!(
                "{} exited with {status}",
                program.binary()
            )));
        }

        Ok(())
    }
}
