//! Playback progress notifications

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Error;

type Notify = Arc<dyn Fn() + Send + Sync>;
type NotifyError = Arc<dyn Fn(&Error) + Send + Sync>;

/// Optional start, end and error hooks for a playback
///
/// Every hook is optional. Errors are always also returned from the call
/// that fired them.
#[derive(Clone, Default)]
pub struct PlaybackCallbacks {
    on_start: Option<Notify>,
    on_end: Option<Notify>,
    on_error: Option<NotifyError>,
}

impl fmt::Debug for PlaybackCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl PlaybackCallbacks {
    /// No hooks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called right before audio begins
    #[must_use]
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called when playback ends or is stopped
    #[must_use]
    pub fn on_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_end = Some(Arc::new(f));
        self
    }

    /// Called once with the error that ends a failed playback
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Same start and end hooks, error hook removed
    ///
    /// Used when a failure may still be recovered by another engine.
    #[must_use]
    pub fn without_error(&self) -> Self {
        Self {
            on_start: self.on_start.clone(),
            on_end: self.on_end.clone(),
            on_error: None,
        }
    }

    /// Same hooks, with `on_start` firing at most once across every engine
    /// these callbacks are handed to
    #[must_use]
    pub fn start_once(&self) -> Self {
        let on_start = self.on_start.clone().map(|f| {
            let fired = AtomicBool::new(false);
            Arc::new(move || {
                if !fired.swap(true, Ordering::SeqCst) {
                    f();
                }
            }) as Notify
        });

        Self {
            on_start,
            on_end: self.on_end.clone(),
            on_error: self.on_error.clone(),
        }
    }

    /// Fire `on_start`
    pub fn started(&self) {
        if let Some(f) = &self.on_start {
            f();
        }
    }

    /// Fire `on_end`
    pub fn ended(&self) {
        if let Some(f) = &self.on_end {
            f();
        }
    }

    /// Fire `on_error`
    pub fn failed(&self, error: &Error) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    /// Report `error` through the hook and hand it back for returning
    #[must_use]
    pub fn fail(&self, error: Error) -> Error {
        self.failed(&error);
        error
    }
}
