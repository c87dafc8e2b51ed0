//! Relay pipeline adapter
//!
//! Wraps construction, start, monitoring and teardown of one relay pipeline.
//! The media engine itself sits behind [`PipelineEngine`]; the default
//! implementation drives `gst-launch-1.0` (see [`gst_launch`]).

pub mod description;
pub mod events;
pub mod gst_launch;

pub use description::PipelineDescription;
pub use events::{EventSender, EventSink, PipelineEvent};
pub use gst_launch::GstLaunchEngine;

use crate::config::PipelineConfig;
use crate::error::{RelayError, Result};
use crate::types::PortPair;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

static PUSH_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rtmps?://.+").expect("Invalid push URL regex"));

/// Whether `url` has the shape of an RTMP or RTMPS push destination.
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    PUSH_URL.is_match(url)
}

/// Media engine able to realize relay descriptions
#[async_trait]
pub trait PipelineEngine: Send + Sync + 'static {
    /// Realize `description` into an idle pipeline.
    ///
    /// Failures (missing element plugins, bad parameters) are reported as
    /// [`RelayError::PipelineConstruction`] and are not retried.
    async fn construct(&self, description: &PipelineDescription) -> Result<Box<dyn EnginePipeline>>;
}

/// One realized pipeline inside the engine
#[async_trait]
pub trait EnginePipeline: Send + Sync {
    /// Switch to playing and start reporting into `events`.
    async fn play(&mut self, events: EventSink) -> Result<()>;

    /// Deliver end-of-stream and wait up to `timeout` for it to drain.
    ///
    /// Returns whether the pipeline finished on its own.
    async fn send_eos(&mut self, timeout: Duration) -> bool;

    /// Force the null state and release every engine resource.
    /// Must tolerate being called on a pipeline that already stopped.
    async fn shutdown(&mut self);
}

/// The relay pipeline owned by one streaming session
pub struct RelayPipeline {
    inner: Option<Box<dyn EnginePipeline>>,
    description: PipelineDescription,
    ports: PortPair,
    url: String,
    eos_timeout: Duration,
    playing: bool,
}

impl RelayPipeline {
    /// Validate `url` and have the engine realize the relay description.
    pub async fn build(
        engine: &dyn PipelineEngine,
        config: &PipelineConfig,
        url: &str,
        ports: PortPair,
    ) -> Result<Self> {
        if !is_valid_url(url) {
            return Err(RelayError::InvalidUrl(url.to_string()));
        }

        let description =
            PipelineDescription::relay(url, ports, &config.rtp_address, config.audio_bitrate);
        info!("Pipeline definition: {description}");

        let inner = engine.construct(&description).await?;

        Ok(Self {
            inner: Some(inner),
            description,
            ports,
            url: url.to_string(),
            eos_timeout: config.eos_timeout(),
            playing: false,
        })
    }

    /// Start playing. The pipeline reports into `events` until [`stop`](Self::stop).
    pub async fn start(&mut self, events: EventSink) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(RelayError::Internal("pipeline already released".to_string()));
        };
        inner.play(events).await?;
        self.playing = true;
        info!(
            audio_port = self.ports.audio,
            video_port = self.ports.video,
            "Pipeline started"
        );
        Ok(())
    }

    /// Tear the pipeline down. Calling this again is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };

        if self.playing && !inner.send_eos(self.eos_timeout).await {
            warn!(
                url = %self.url,
                timeout_ms = u64::try_from(self.eos_timeout.as_millis()).unwrap_or(u64::MAX),
                "Pipeline did not drain after end-of-stream, forcing shutdown"
            );
        }
        inner.shutdown().await;
        self.playing = false;
        info!(url = %self.url, "Pipeline stopped");
    }

    /// Whether engine resources are still held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn ports(&self) -> PortPair {
        self.ports
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn description(&self) -> &PipelineDescription {
        &self.description
    }
}
