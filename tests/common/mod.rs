//! Shared test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use lingua_voice::voice::graph::{SourceEnd, SourceHandle, source_channel};
use lingua_voice::voice::{
    AudioGraph, ElementSettings, GraphEngine, GraphState, MediaPlayer, SampleBuffer,
};
use lingua_voice::{Error, PlaybackCallbacks, PlaybackEngine, Result, SpeechSynthesizer};

/// Payload prefix the mock graph refuses to decode
pub const UNDECODABLE: &[u8] = b"BAD!";

/// Ordered log of things that happened during a test
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }

    /// Callbacks recording `start`, `end` and `error` into this log
    pub fn callbacks(&self) -> PlaybackCallbacks {
        let start = self.clone();
        let end = self.clone();
        let error = self.clone();
        PlaybackCallbacks::new()
            .on_start(move || start.push("start"))
            .on_end(move || end.push("end"))
            .on_error(move |_| error.push("error"))
    }
}

/// Synthesizer answering from memory
#[derive(Debug)]
pub struct MockSynthesizer {
    payload: Bytes,
    status: Option<u16>,
    delay: Duration,
    calls: AtomicUsize,
    speeds: Mutex<Vec<f32>>,
}

impl MockSynthesizer {
    pub fn returning(payload: &'static [u8]) -> Self {
        Self {
            payload: Bytes::from_static(payload),
            status: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            speeds: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::returning(b"")
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn speeds(&self) -> Vec<f32> {
        self.speeds.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str, speed: f32) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.speeds.lock().push(speed);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.status {
            Some(status) => Err(Error::SynthesisStatus { status }),
            None => Ok(self.payload.clone()),
        }
    }
}

/// Counts audio graphs that are open
#[derive(Debug, Default)]
pub struct ResourceTracker {
    open: AtomicUsize,
    created: AtomicUsize,
}

impl ResourceTracker {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// Records what the mock graphs were asked to do
#[derive(Debug, Default)]
pub struct GraphRecord {
    pub tracker: ResourceTracker,
    pub rates: Mutex<Vec<f32>>,
    pub resumes: AtomicUsize,
    /// Sources play until halted instead of finishing at once
    pub hold: AtomicBool,
    /// Decodes started so far
    pub decodes: AtomicUsize,
    /// How long each decode blocks
    pub decode_delay: Mutex<Duration>,
    /// Sources refuse to start
    pub fail_start: AtomicBool,
}

impl GraphRecord {
    pub fn rates(&self) -> Vec<f32> {
        self.rates.lock().clone()
    }
}

/// In-memory audio graph
pub struct MockGraph {
    record: Arc<GraphRecord>,
    state: Mutex<GraphState>,
}

impl MockGraph {
    pub fn new(record: Arc<GraphRecord>) -> Self {
        record.tracker.open.fetch_add(1, Ordering::SeqCst);
        record.tracker.created.fetch_add(1, Ordering::SeqCst);
        Self {
            record,
            state: Mutex::new(GraphState::Suspended),
        }
    }
}

impl AudioGraph for MockGraph {
    fn state(&self) -> GraphState {
        *self.state.lock()
    }

    fn resume(&self) -> Result<()> {
        self.record.resumes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = GraphState::Running;
        Ok(())
    }

    fn decode(&self, payload: &[u8]) -> Result<SampleBuffer> {
        self.record.decodes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.record.decode_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if payload.is_empty() || payload.starts_with(UNDECODABLE) {
            return Err(Error::Decode("unrecognized audio".to_string()));
        }
        Ok(SampleBuffer {
            samples: vec![0.0; 240],
            sample_rate: 24_000,
        })
    }

    fn start(&self, _buffer: SampleBuffer, rate: f32) -> Result<SourceHandle> {
        if self.record.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Playback("source node refused to start".to_string()));
        }

        self.record.rates.lock().push(rate);
        let (handle, signal) = source_channel();

        if self.record.hold.load(Ordering::SeqCst) {
            std::thread::spawn(move || {
                for _ in 0..500 {
                    if signal.is_halted() {
                        signal.finish(Ok(SourceEnd::Halted));
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                signal.finish(Ok(SourceEnd::Finished));
            });
        } else {
            signal.finish(Ok(SourceEnd::Finished));
        }

        Ok(handle)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if *state != GraphState::Closed {
            *state = GraphState::Closed;
            self.record.tracker.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Primary engine over mock graphs
pub fn mock_graph_engine() -> (GraphEngine, Arc<GraphRecord>) {
    let record = Arc::new(GraphRecord::default());
    let factory_record = Arc::clone(&record);
    let engine = GraphEngine::new(move || {
        Ok(Arc::new(MockGraph::new(Arc::clone(&factory_record))) as Arc<dyn AudioGraph>)
    });
    (engine, record)
}

/// Media element that never makes a sound
#[derive(Debug, Default)]
pub struct MockMediaPlayer {
    pub log: EventLog,
    pub paths: Mutex<Vec<PathBuf>>,
    pub rates: Mutex<Vec<Option<f32>>>,
    pub no_rate: bool,
    pub fail_load: bool,
    pub fail_play: bool,
    /// How long each play lasts
    pub duration: Duration,
    /// How long each load takes
    pub load_delay: Duration,
}

impl MockMediaPlayer {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }
}

#[async_trait]
impl MediaPlayer for MockMediaPlayer {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_rate(&self) -> bool {
        !self.no_rate
    }

    async fn load(&self, path: &Path, _settings: &ElementSettings) -> Result<()> {
        self.log.push("load");
        self.paths.lock().push(path.to_path_buf());
        assert!(path.exists(), "media file should exist while loading");

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        if self.fail_load {
            return Err(Error::Playback("unsupported media".to_string()));
        }
        Ok(())
    }

    async fn play(&self, path: &Path, rate: Option<f32>, _settings: &ElementSettings) -> Result<()> {
        self.log.push("play");
        self.rates.lock().push(rate);
        assert!(path.exists(), "media file should exist while playing");

        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        if self.fail_play {
            return Err(Error::Playback("element error".to_string()));
        }
        Ok(())
    }
}

/// Engine that plays instantly, or always fails
#[derive(Debug)]
pub struct MockEngine {
    name: &'static str,
    fail: bool,
    plays: AtomicUsize,
    speeds: Mutex<Vec<f32>>,
    stops: AtomicUsize,
    disposed: AtomicBool,
}

impl MockEngine {
    pub fn working(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: false,
            plays: AtomicUsize::new(0),
            speeds: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn broken(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail: true,
            plays: AtomicUsize::new(0),
            speeds: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn speeds(&self) -> Vec<f32> {
        self.speeds.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackEngine for MockEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn play(&self, _payload: Bytes, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.speeds.lock().push(speed);

        if self.fail {
            return Err(callbacks.fail(Error::Decode("corrupt payload".to_string())));
        }

        callbacks.started();
        callbacks.ended();
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        false
    }
}
