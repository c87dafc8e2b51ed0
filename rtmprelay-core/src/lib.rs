//! Core of the RTMP relay
//!
//! Takes media a host delivers as RTP on local UDP ports and pushes it to an
//! RTMP/RTMPS destination through a GStreamer pipeline, one relay per host
//! session.

pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod plugin;
pub mod ports;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::Config;
pub use control::{ControlRequest, ControlResponse, StreamingReply};
pub use error::{RelayError, Result};
pub use pipeline::{GstLaunchEngine, PipelineEngine};
pub use plugin::{PluginInfo, RelayPlugin, RtmpRelay};
pub use session::{SessionSnapshot, SessionState};
pub use types::{PortPair, SessionHandle};
