//! Primary playback engine
//!
//! Decodes payloads and plays them through an [`AudioGraph`], with
//! continuous speed control by resampling. The graph is created lazily on
//! the first play and only one source plays at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::graph::{AudioGraph, CpalGraph, GraphState, SourceEnd};
use super::{PlaybackCallbacks, PlaybackEngine, clamp_speed};
use crate::{Error, Result};

type GraphFactory = Box<dyn Fn() -> Result<Arc<dyn AudioGraph>> + Send + Sync>;

/// Currently playing source
struct Session {
    id: u64,
    halt: Arc<AtomicBool>,
}

/// Plays decoded audio through a lazily created audio graph
pub struct GraphEngine {
    factory: GraphFactory,
    graph: Mutex<Option<Arc<dyn AudioGraph>>>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    disposed: AtomicBool,
}

impl GraphEngine {
    /// Engine whose graph is built by `factory` on first use
    #[must_use]
    pub fn new(factory: impl Fn() -> Result<Arc<dyn AudioGraph>> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            graph: Mutex::new(None),
            session: Mutex::new(None),
            next_session: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Engine on the default cpal output device
    #[must_use]
    pub fn cpal() -> Self {
        Self::new(|| CpalGraph::open().map(|graph| Arc::new(graph) as Arc<dyn AudioGraph>))
    }

    /// Get the graph, creating and resuming it as needed
    fn acquire_graph(&self) -> Result<Arc<dyn AudioGraph>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }

        let mut slot = self.graph.lock();
        let graph = match slot.as_ref() {
            Some(graph) if graph.state() != GraphState::Closed => Arc::clone(graph),
            _ => {
                let graph = (self.factory)()?;
                *slot = Some(Arc::clone(&graph));
                graph
            }
        };
        drop(slot);

        if graph.state() == GraphState::Suspended {
            graph.resume()?;
        }

        Ok(graph)
    }

    async fn run(&self, payload: Bytes, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        self.stop();

        // Registered before the first await so a stop during decode is kept
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let halt = Arc::new(AtomicBool::new(false));
        *self.session.lock() = Some(Session {
            id,
            halt: Arc::clone(&halt),
        });

        let outcome = self.play_session(id, &halt, payload, speed, callbacks).await;

        {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(|s| s.id == id) {
                *session = None;
            }
        }

        match outcome? {
            SourceEnd::Finished => tracing::debug!("playback finished"),
            SourceEnd::Halted => tracing::debug!("playback halted"),
        }

        callbacks.ended();
        Ok(())
    }

    async fn play_session(
        &self,
        id: u64,
        halt: &AtomicBool,
        payload: Bytes,
        speed: f32,
        callbacks: &PlaybackCallbacks,
    ) -> Result<SourceEnd> {
        let graph = self.acquire_graph()?;

        let buffer = {
            let graph = Arc::clone(&graph);
            tokio::task::spawn_blocking(move || graph.decode(&payload))
                .await
                .map_err(|e| Error::Decode(e.to_string()))??
        };

        tracing::debug!(
            samples = buffer.samples.len(),
            sample_rate = buffer.sample_rate,
            speed,
            "decoded payload"
        );

        if halt.load(Ordering::SeqCst) {
            return Ok(SourceEnd::Halted);
        }

        callbacks.started();

        let handle = {
            let graph = Arc::clone(&graph);
            tokio::task::spawn_blocking(move || graph.start(buffer, speed))
                .await
                .map_err(|e| Error::Playback(e.to_string()))??
        };

        // Hand later stops to the source; forward one that came while starting
        {
            let mut session = self.session.lock();
            if halt.load(Ordering::SeqCst) {
                handle.halt();
            }
            if let Some(session) = session.as_mut().filter(|s| s.id == id) {
                session.halt = handle.halt_flag();
            }
        }

        handle.ended().await
    }
}

#[async_trait]
impl PlaybackEngine for GraphEngine {
    fn name(&self) -> &'static str {
        "graph"
    }

    async fn play(&self, payload: Bytes, speed: f32, callbacks: &PlaybackCallbacks) -> Result<()> {
        let speed = clamp_speed(speed);

        self.run(payload, speed, callbacks).await.map_err(|e| {
            tracing::warn!(error = %e, "graph playback failed");
            callbacks.fail(e)
        })
    }

    fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.halt.store(true, Ordering::SeqCst);
            tracing::debug!(session = session.id, "stopping graph playback");
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stop();
        if let Some(graph) = self.graph.lock().take() {
            graph.close();
        }
    }

    fn is_playing(&self) -> bool {
        self.session.lock().is_some()
    }
}
