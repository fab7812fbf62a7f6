//! Low-level audio graph used by the primary engine
//!
//! An [`AudioGraph`] is the hardware-facing half of the primary engine: it
//! decodes payloads into sample buffers and runs one source node per
//! playback. [`CpalGraph`] drives the default output device through cpal.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use parking_lot::Mutex;
use rubato::{FftFixedIn, Resampler as _};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Poll interval of the playback thread
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra time granted past the expected duration before giving up
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle state of an audio graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Created but not yet allowed to make sound
    Suspended,
    /// Ready to start sources
    Running,
    /// Released for good
    Closed,
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl SampleBuffer {
    /// Playback length at normal speed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// How a source node stopped producing sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEnd {
    /// Played to the last sample
    Finished,
    /// Halted before the end
    Halted,
}

/// Caller side of a started source node
#[derive(Debug)]
pub struct SourceHandle {
    halt: Arc<AtomicBool>,
    done: oneshot::Receiver<Result<SourceEnd>>,
}

/// Graph side of a started source node
#[derive(Debug)]
pub struct SourceSignal {
    halt: Arc<AtomicBool>,
    done: oneshot::Sender<Result<SourceEnd>>,
}

/// Create the two halves of a source node
#[must_use]
pub fn source_channel() -> (SourceHandle, SourceSignal) {
    let halt = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    (
        SourceHandle {
            halt: Arc::clone(&halt),
            done: rx,
        },
        SourceSignal { halt, done: tx },
    )
}

impl SourceHandle {
    /// Ask the source to stop
    pub fn halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Flag shared with the graph side
    #[must_use]
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Wait for the source to end
    ///
    /// A graph that drops its side without reporting counts as halted.
    ///
    /// # Errors
    ///
    /// Returns the playback error reported by the graph
    pub async fn ended(self) -> Result<SourceEnd> {
        self.done.await.unwrap_or(Ok(SourceEnd::Halted))
    }
}

impl SourceSignal {
    /// Whether the caller asked the source to stop
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Flag shared with the caller side
    #[must_use]
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Report how the source ended
    pub fn finish(self, result: Result<SourceEnd>) {
        // The caller may have stopped waiting
        let _ = self.done.send(result);
    }
}

/// Hardware-backed audio graph
pub trait AudioGraph: Send + Sync {
    /// Current lifecycle state
    fn state(&self) -> GraphState;

    /// Move a suspended graph to running
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot be resumed
    fn resume(&self) -> Result<()>;

    /// Decode a compressed payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not playable audio
    fn decode(&self, payload: &[u8]) -> Result<SampleBuffer>;

    /// Start a source node playing `buffer` at `rate` times normal speed
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be started
    fn start(&self, buffer: SampleBuffer, rate: f32) -> Result<SourceHandle>;

    /// Release the graph
    fn close(&self);
}

/// Audio graph on the default cpal output device
pub struct CpalGraph {
    config: StreamConfig,
    state: Mutex<GraphState>,
}

impl CpalGraph {
    /// Open the default output device
    ///
    /// The graph starts suspended and must be resumed before use.
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = pick_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio graph created"
        );

        Ok(Self {
            config,
            state: Mutex::new(GraphState::Suspended),
        })
    }

    /// Output sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl AudioGraph for CpalGraph {
    fn state(&self) -> GraphState {
        *self.state.lock()
    }

    fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            GraphState::Running => Ok(()),
            GraphState::Closed => Err(Error::Audio("audio graph is closed".to_string())),
            GraphState::Suspended => {
                cpal::default_host()
                    .default_output_device()
                    .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
                *state = GraphState::Running;
                tracing::debug!("audio graph resumed");
                Ok(())
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<SampleBuffer> {
        decode_audio(payload)
    }

    fn start(&self, buffer: SampleBuffer, rate: f32) -> Result<SourceHandle> {
        if self.state() != GraphState::Running {
            return Err(Error::Playback("audio graph is not running".to_string()));
        }

        let samples = resample(
            &buffer.samples,
            scaled_rate(buffer.sample_rate, rate),
            self.sample_rate(),
        )?;

        let (handle, signal) = source_channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let config = self.config.clone();

        std::thread::Builder::new()
            .name("lingua-playback".to_string())
            .spawn(move || play_blocking(samples, &config, signal, &ready_tx))
            .map_err(|e| Error::Playback(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Playback("playback thread exited".to_string()))??;

        Ok(handle)
    }

    fn close(&self) {
        *self.state.lock() = GraphState::Closed;
        tracing::debug!("audio graph closed");
    }
}

/// Prefer the device default, falling back to any f32 config at that rate
fn pick_config(device: &Device) -> Result<StreamConfig> {
    let default = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;

    if default.sample_format() == SampleFormat::F32 {
        return Ok(default.config());
    }

    let rate = default.sample_rate();
    device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))
}

/// Own the cpal stream on this thread until the samples run out or a halt
fn play_blocking(
    samples: Vec<f32>,
    config: &StreamConfig,
    signal: SourceSignal,
    ready: &mpsc::Sender<Result<()>>,
) {
    let sample_count = samples.len();
    let channels = usize::from(config.channels);
    let finished = Arc::new(AtomicBool::new(false));
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let halt = signal.halt_flag();

    let stream = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))
        .and_then(|device| {
            let finished = Arc::clone(&finished);
            let failure = Arc::clone(&failure);
            let mut pos = 0usize;

            device
                .build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let halted = halt.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = if !halted && pos < samples.len() {
                                pos += 1;
                                samples[pos - 1]
                            } else {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            };
                            frame.fill(sample);
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio playback error");
                        *failure.lock() = Some(err.to_string());
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))
        })
        .and_then(|stream| {
            stream
                .play()
                .map_err(|e| Error::Playback(e.to_string()))?;
            Ok(stream)
        });

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    #[allow(clippy::cast_precision_loss)]
    let expected = Duration::from_secs_f64(sample_count as f64 / f64::from(config.sample_rate.0));
    let deadline = Instant::now() + expected + DRAIN_GRACE;

    let outcome = loop {
        if let Some(message) = failure.lock().take() {
            break Err(Error::Playback(message));
        }
        if signal.is_halted() {
            break Ok(SourceEnd::Halted);
        }
        if finished.load(Ordering::Relaxed) {
            // Let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
            break Ok(SourceEnd::Finished);
        }
        if Instant::now() > deadline {
            tracing::warn!(samples = sample_count, "playback overran expected duration");
            break Ok(SourceEnd::Finished);
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    drop(stream);
    tracing::debug!(samples = sample_count, outcome = ?outcome, "source ended");
    signal.finish(outcome);
}

/// Source rate that makes `rate` times normal speed after resampling
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scaled_rate(sample_rate: u32, rate: f32) -> u32 {
    (f64::from(sample_rate) * f64::from(rate)).round().max(1.0) as u32
}

/// Decode an MP3 or WAV payload into mono samples
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is empty or not decodable
pub fn decode_audio(payload: &[u8]) -> Result<SampleBuffer> {
    if payload.is_empty() {
        return Err(Error::Decode("empty payload".to_string()));
    }

    let buffer = if payload.starts_with(b"RIFF") {
        decode_wav(payload)?
    } else {
        decode_mp3(payload)?
    };

    if buffer.is_empty() || buffer.sample_rate == 0 {
        return Err(Error::Decode("no audio frames in payload".to_string()));
    }

    Ok(buffer)
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<SampleBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            // ID3 tags and junk between frames
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(SampleBuffer {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<SampleBuffer> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = f32::powi(2.0, i32::from(spec.bits_per_sample) - 1);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?
        }
    };

    Ok(SampleBuffer {
        samples: downmix(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

/// Convert interleaved multi-channel audio to mono by averaging channels
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

/// Resample audio from one sample rate to another using FFT-based resampling
///
/// # Errors
///
/// Returns [`Error::Playback`] if the resampler cannot be built
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        2, // sub-chunks for quality
        1, // mono
    )
    .map_err(|e| Error::Playback(format!("resampler: {e}")))?;

    let mut output = Vec::new();

    let mut pos = 0;
    while pos + chunk_size <= samples.len() {
        let chunk = &samples[pos..pos + chunk_size];
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Playback(format!("resampler: {e}")))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
        pos += chunk_size;
    }

    // Pad the tail and keep only its proportional share
    if pos < samples.len() {
        let remaining = &samples[pos..];
        let mut padded = vec![0.0f32; chunk_size];
        padded[..remaining.len()].copy_from_slice(remaining);

        let result = resampler
            .process(&[&padded], None)
            .map_err(|e| Error::Playback(format!("resampler: {e}")))?;
        if let Some(channel) = result.first() {
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss
            )]
            let output_len = (remaining.len() as f64 * f64::from(to_rate) / f64::from(from_rate))
                .ceil() as usize;
            let take = output_len.min(channel.len());
            output.extend_from_slice(&channel[..take]);
        }
    }

    Ok(output)
}

/// Encode mono f32 samples as 16-bit PCM WAV bytes
///
/// # Errors
///
/// Returns error if encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
