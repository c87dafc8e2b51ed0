//! Test helpers for rtmprelay-core tests
//!
//! [`MockEngine`] stands in for the media engine so the session machinery
//! can be exercised without GStreamer installed. It counts every engine call
//! so tests can assert that pipelines are released exactly once.

use crate::error::{RelayError, Result};
use crate::pipeline::{EnginePipeline, EventSink, PipelineDescription, PipelineEngine, PipelineEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    constructed: AtomicUsize,
    playing: AtomicUsize,
    eos_sent: AtomicUsize,
    released: AtomicUsize,
    construction_failure: Mutex<Option<String>>,
    play_failure: Mutex<Option<String>>,
    play_delay: Mutex<Option<Duration>>,
    descriptions: Mutex<Vec<String>>,
}

/// Engine double that records calls instead of running media
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following construction fail with `message`.
    pub fn fail_construction(&self, message: &str) {
        *self.state.construction_failure.lock() = Some(message.to_string());
    }

    /// Make every following `play` fail with `message`.
    pub fn fail_play(&self, message: &str) {
        *self.state.play_failure.lock() = Some(message.to_string());
    }

    /// Delay `play` to widen race windows in concurrency tests.
    pub fn delay_play(&self, delay: Duration) {
        *self.state.play_delay.lock() = Some(delay);
    }

    pub fn constructed(&self) -> usize {
        self.state.constructed.load(Ordering::SeqCst)
    }

    pub fn playing(&self) -> usize {
        self.state.playing.load(Ordering::SeqCst)
    }

    pub fn eos_sent(&self) -> usize {
        self.state.eos_sent.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Pipelines constructed but not yet released.
    pub fn active(&self) -> usize {
        self.constructed() - self.released()
    }

    /// Rendered descriptions, in construction order.
    pub fn descriptions(&self) -> Vec<String> {
        self.state.descriptions.lock().clone()
    }
}

#[async_trait]
impl PipelineEngine for MockEngine {
    async fn construct(&self, description: &PipelineDescription) -> Result<Box<dyn EnginePipeline>> {
        let failure = self.state.construction_failure.lock().clone();
        if let Some(message) = failure {
            return Err(RelayError::PipelineConstruction(message));
        }
        self.state.constructed.fetch_add(1, Ordering::SeqCst);
        self.state.descriptions.lock().push(description.to_string());
        Ok(Box::new(MockPipeline {
            state: Arc::clone(&self.state),
            sink: None,
            released: false,
        }))
    }
}

struct MockPipeline {
    state: Arc<MockState>,
    sink: Option<EventSink>,
    released: bool,
}

#[async_trait]
impl EnginePipeline for MockPipeline {
    async fn play(&mut self, events: EventSink) -> Result<()> {
        let delay = *self.state.play_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.state.play_failure.lock().clone();
        if let Some(message) = failure {
            return Err(RelayError::PipelineConstruction(message));
        }
        self.state.playing.fetch_add(1, Ordering::SeqCst);
        events.emit(PipelineEvent::StateChanged {
            element: "pipeline0".to_string(),
            from: "PAUSED".to_string(),
            to: "PLAYING".to_string(),
        });
        self.sink = Some(events);
        Ok(())
    }

    async fn send_eos(&mut self, _timeout: Duration) -> bool {
        self.state.eos_sent.fetch_add(1, Ordering::SeqCst);
        if let Some(sink) = &self.sink {
            sink.emit(PipelineEvent::EndOfStream);
        }
        true
    }

    async fn shutdown(&mut self) {
        if !self.released {
            self.released = true;
            self.sink = None;
            self.state.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}
