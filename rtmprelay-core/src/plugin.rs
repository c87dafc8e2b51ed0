//! Host-facing plugin surface
//!
//! [`RtmpRelay`] is the explicit process-scoped context: it owns the session
//! store, the port cursor, the engine and the event feed. Hosts talk to it
//! through [`RelayPlugin`].

use crate::config::{Config, PipelineConfig};
use crate::control::{self, ControlResponse, SUPPORTED_REQUESTS};
use crate::error::{RelayError, Result};
use crate::pipeline::events::{event_channel, spawn_event_loop, TaggedEvent};
use crate::pipeline::{EventSender, PipelineEngine};
use crate::ports::PortAllocator;
use crate::session::{SessionSnapshot, SessionStore, StreamContext};
use crate::types::SessionHandle;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PLUGIN_NAME: &str = "RTMP relay";
pub const PLUGIN_VERSION: u32 = 1;
pub const PLUGIN_VERSION_STRING: &str = "0.0.1";
pub const PLUGIN_DESCRIPTION: &str = "Relays media from WebRTC peers to RTMP servers through GStreamer";
pub const PLUGIN_AUTHOR: &str = "rtmprelay contributors";
pub const PLUGIN_PACKAGE: &str = "rtmprelay";
/// Host plugin API revision this relay is built against
pub const PLUGIN_API_COMPATIBILITY: u32 = 15;

/// Static description of the plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: u32,
    pub version_string: &'static str,
    pub description: &'static str,
    pub author: &'static str,
    pub package: &'static str,
    pub api_compatibility: u32,
    pub requests: &'static [&'static str],
}

impl PluginInfo {
    #[must_use]
    pub const fn current() -> Self {
        Self {
            name: PLUGIN_NAME,
            version: PLUGIN_VERSION,
            version_string: PLUGIN_VERSION_STRING,
            description: PLUGIN_DESCRIPTION,
            author: PLUGIN_AUTHOR,
            package: PLUGIN_PACKAGE,
            api_compatibility: PLUGIN_API_COMPATIBILITY,
            requests: SUPPORTED_REQUESTS,
        }
    }
}

/// Capabilities a host drives the relay through
#[async_trait]
pub trait RelayPlugin: Send + Sync {
    /// Start accepting sessions.
    async fn init(&self) -> Result<()>;

    /// Refuse new work, tear down every session and stop the event feed.
    async fn shutdown(&self);

    async fn create_session(&self, handle: SessionHandle) -> Result<()>;

    async fn destroy_session(&self, handle: &SessionHandle) -> Result<()>;

    /// Handle one control message. Failures come back as error responses.
    async fn handle_message(&self, handle: &SessionHandle, message: Option<&Value>) -> ControlResponse;

    /// The host has negotiated media for the session.
    async fn setup_media(&self, handle: &SessionHandle) -> Result<()>;

    /// The host's media went away; any relay for the session is stopped.
    async fn hangup_media(&self, handle: &SessionHandle) -> Result<()>;

    async fn query_session(&self, handle: &SessionHandle) -> Result<SessionSnapshot>;

    fn info(&self) -> PluginInfo {
        PluginInfo::current()
    }
}

struct EventFeed {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct RtmpRelay {
    store: SessionStore,
    ports: PortAllocator,
    engine: Arc<dyn PipelineEngine>,
    pipeline_config: PipelineConfig,
    events: EventSender,
    /// Receiver parked here until `init` starts the drain task
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<TaggedEvent>>>,
    feed: Mutex<Option<EventFeed>>,
}

impl RtmpRelay {
    #[must_use]
    pub fn new(config: &Config, engine: Arc<dyn PipelineEngine>) -> Self {
        let (events, rx) = event_channel();
        Self {
            store: SessionStore::new(),
            ports: PortAllocator::new(config.ports.base, config.ports.max),
            engine,
            pipeline_config: config.pipeline.clone(),
            events,
            pending_rx: Mutex::new(Some(rx)),
            feed: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    fn stream_context(&self) -> StreamContext<'_> {
        StreamContext {
            engine: self.engine.as_ref(),
            config: &self.pipeline_config,
            ports: &self.ports,
            events: &self.events,
        }
    }
}

#[async_trait]
impl RelayPlugin for RtmpRelay {
    async fn init(&self) -> Result<()> {
        if self.store.is_ready() {
            return Ok(());
        }
        let rx = self.pending_rx.lock().take().ok_or_else(|| {
            RelayError::NotReady("Plugin cannot be initialized again after shutdown".to_string())
        })?;

        let cancel = CancellationToken::new();
        let task = spawn_event_loop(rx, cancel.clone());
        *self.feed.lock() = Some(EventFeed { cancel, task });

        self.store.open();
        info!("{PLUGIN_NAME} initialized");
        Ok(())
    }

    async fn shutdown(&self) {
        self.store.begin_shutdown();
        info!(sessions = self.store.len(), "Shutting down {PLUGIN_NAME}");

        let closed = self.store.drain().await;
        debug!(closed, "Sessions torn down");

        let feed = self.feed.lock().take();
        if let Some(feed) = feed {
            feed.cancel.cancel();
            if let Err(e) = feed.task.await {
                warn!("Event loop ended abnormally: {e}");
            }
        }
        info!("{PLUGIN_NAME} destroyed");
    }

    async fn create_session(&self, handle: SessionHandle) -> Result<()> {
        self.store.create(handle).map(|_| ())
    }

    async fn destroy_session(&self, handle: &SessionHandle) -> Result<()> {
        self.store.ensure_ready()?;
        self.store.destroy(handle).await
    }

    async fn handle_message(&self, handle: &SessionHandle, message: Option<&Value>) -> ControlResponse {
        control::dispatch(&self.store, handle, message, self.stream_context()).await
    }

    async fn setup_media(&self, handle: &SessionHandle) -> Result<()> {
        self.store.ensure_ready()?;
        self.store.lookup(handle).ok_or(RelayError::NoSession)?;
        info!(session = %handle, "WebRTC media is now available");
        Ok(())
    }

    async fn hangup_media(&self, handle: &SessionHandle) -> Result<()> {
        self.store.ensure_ready()?;
        let session = self.store.lookup(handle).ok_or(RelayError::NoSession)?;
        info!(session = %handle, "No WebRTC media anymore");
        session.stop_quietly().await;
        Ok(())
    }

    async fn query_session(&self, handle: &SessionHandle) -> Result<SessionSnapshot> {
        self.store.ensure_ready()?;
        let session = self.store.lookup(handle).ok_or(RelayError::NoSession)?;
        Ok(session.snapshot().await)
    }
}
