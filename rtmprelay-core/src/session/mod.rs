//! Per-session streaming state machine
//!
//! Every mutable field of a [`Session`] sits behind one async mutex, so start,
//! stop and teardown of the same session are strictly serialized while
//! different sessions proceed in parallel.

pub mod state;
pub mod store;

pub use state::SessionState;
pub use store::SessionStore;

use crate::config::PipelineConfig;
use crate::error::{RelayError, Result};
use crate::pipeline::{is_valid_url, EventSender, PipelineEngine, RelayPipeline};
use crate::ports::PortAllocator;
use crate::types::{PortPair, SessionHandle};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shared services a session needs to bring a relay up
#[derive(Clone, Copy)]
pub struct StreamContext<'a> {
    pub engine: &'a dyn PipelineEngine,
    pub config: &'a PipelineConfig,
    pub ports: &'a PortAllocator,
    pub events: &'a EventSender,
}

struct SessionInner {
    state: SessionState,
    pipeline: Option<RelayPipeline>,
    ports: Option<PortPair>,
    url: Option<String>,
    /// Set once teardown has begun; the session never streams again
    closed: bool,
}

impl SessionInner {
    async fn teardown(&mut self) -> bool {
        let Some(mut pipeline) = self.pipeline.take() else {
            return false;
        };
        pipeline.stop().await;
        self.ports = None;
        self.url = None;
        self.state = SessionState::Stopped;
        true
    }
}

/// One host session and its relay
pub struct Session {
    handle: SessionHandle,
    inner: Mutex<SessionInner>,
}

/// Point-in-time view of a session, as reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub audio_port: Option<u16>,
    pub video_port: Option<u16>,
    pub url: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                pipeline: None,
                ports: None,
                url: None,
                closed: false,
            }),
        }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            state: inner.state,
            audio_port: inner.ports.map(|p| p.audio),
            video_port: inner.ports.map(|p| p.video),
            url: inner.url.clone(),
        }
    }

    /// Start relaying to `url`.
    ///
    /// On any error the session is left exactly as it was.
    pub async fn start(&self, url: &str, ctx: StreamContext<'_>) -> Result<PortPair> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RelayError::NoSession);
        }
        if !is_valid_url(url) {
            return Err(RelayError::InvalidUrl(url.to_string()));
        }
        if inner.state.is_streaming() {
            return Err(RelayError::AlreadyStreaming);
        }

        let ports = ctx.ports.allocate_pair();
        info!(
            session = %self.handle,
            audio_port = ports.audio,
            video_port = ports.video,
            "Starting relay to {url}"
        );

        let mut pipeline = RelayPipeline::build(ctx.engine, ctx.config, url, ports).await?;
        if let Err(e) = pipeline.start(ctx.events.for_session(&self.handle)).await {
            pipeline.stop().await;
            return Err(e);
        }

        inner.pipeline = Some(pipeline);
        inner.ports = Some(ports);
        inner.url = Some(url.to_string());
        inner.state = SessionState::Streaming;
        Ok(ports)
    }

    /// Stop the running relay.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.teardown().await {
            return Err(RelayError::NotStreaming);
        }
        info!(session = %self.handle, "Relay stopped");
        Ok(())
    }

    /// Stop the relay if there is one; used when the host reports media gone.
    pub async fn stop_quietly(&self) {
        match self.stop().await {
            Ok(()) | Err(RelayError::NotStreaming) => {}
            Err(e) => warn!(session = %self.handle, "Failed to stop relay: {e}"),
        }
    }

    /// Tear down for removal. Later starts fail with `NoSession`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        if inner.teardown().await {
            info!(session = %self.handle, "Relay stopped on session teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::event_channel;
    use crate::test_helpers::MockEngine;

    const URL: &str = "rtmp://live.example.com/app/key";

    struct Fixture {
        engine: MockEngine,
        config: PipelineConfig,
        ports: PortAllocator,
        events: EventSender,
    }

    impl Fixture {
        fn new() -> Self {
            let (events, _rx) = event_channel();
            Self {
                engine: MockEngine::new(),
                config: PipelineConfig::default(),
                ports: PortAllocator::default(),
                events,
            }
        }

        fn ctx(&self) -> StreamContext<'_> {
            StreamContext {
                engine: &self.engine,
                config: &self.config,
                ports: &self.ports,
                events: &self.events,
            }
        }
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));

        let ports = session.start(URL, fixture.ctx()).await.unwrap();
        assert_ne!(ports.audio, ports.video);
        assert!(ports.audio > 0);

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Streaming);
        assert_eq!(snapshot.audio_port, Some(ports.audio));
        assert_eq!(snapshot.url.as_deref(), Some(URL));

        session.stop().await.unwrap();
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.state, SessionState::Stopped);
        assert_eq!(snapshot.audio_port, None);
        assert_eq!(snapshot.url, None);
        assert_eq!(fixture.engine.released(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_leaves_state_unchanged() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));

        for url in ["http://example.com", "", "rtmp"] {
            let err = session.start(url, fixture.ctx()).await.unwrap_err();
            assert!(matches!(err, RelayError::InvalidUrl(_)));
        }

        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(fixture.ports.allocated_pairs(), 0);
        assert_eq!(fixture.engine.constructed(), 0);
    }

    #[tokio::test]
    async fn test_start_while_streaming_keeps_pipeline() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));
        let first = session.start(URL, fixture.ctx()).await.unwrap();

        let err = session
            .start("rtmp://other.example.com/app/key", fixture.ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AlreadyStreaming));

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.audio_port, Some(first.audio));
        assert_eq!(snapshot.url.as_deref(), Some(URL));
        assert_eq!(fixture.engine.active(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_stream() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));

        assert!(matches!(session.stop().await, Err(RelayError::NotStreaming)));

        session.start(URL, fixture.ctx()).await.unwrap();
        session.stop().await.unwrap();
        assert!(matches!(session.stop().await, Err(RelayError::NotStreaming)));
        assert_eq!(fixture.engine.released(), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_gets_fresh_ports() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));

        let first = session.start(URL, fixture.ctx()).await.unwrap();
        session.stop().await.unwrap();
        let second = session.start(URL, fixture.ctx()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(session.state().await, SessionState::Streaming);
    }

    #[tokio::test]
    async fn test_play_failure_releases_pipeline() {
        let fixture = Fixture::new();
        fixture.engine.fail_play("cannot bind udp port");
        let session = Session::new(SessionHandle::from("h1"));

        let err = session.start(URL, fixture.ctx()).await.unwrap_err();
        assert!(matches!(err, RelayError::PipelineConstruction(_)));
        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(fixture.engine.active(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_start() {
        let fixture = Fixture::new();
        let session = Session::new(SessionHandle::from("h1"));
        session.start(URL, fixture.ctx()).await.unwrap();

        session.close().await;
        assert_eq!(fixture.engine.released(), 1);
        assert!(matches!(
            session.start(URL, fixture.ctx()).await,
            Err(RelayError::NoSession)
        ));

        // Closing twice is harmless
        session.close().await;
        assert_eq!(fixture.engine.released(), 1);
    }
}
