//! Pipeline event feed
//!
//! Every running pipeline reports through one process-wide channel that a
//! single background task drains. Events are logged only: none of them
//! touch session state, which changes solely through control requests and
//! teardown.

use crate::types::SessionHandle;
use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Asynchronous notification from a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The engine reported an error, optionally naming the failing element
    Error {
        source: Option<String>,
        message: String,
    },
    EndOfStream,
    StateChanged {
        element: String,
        from: String,
        to: String,
    },
    /// Any other bus message, by message type
    Other { kind: String, source: String },
    /// The engine process went away
    Exited { code: Option<i32> },
}

/// An event tagged with the session whose pipeline produced it
pub type TaggedEvent = (SessionHandle, PipelineEvent);

/// Writer side of the feed, cloned into every pipeline
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSender {
    #[must_use]
    pub fn for_session(&self, handle: &SessionHandle) -> EventSink {
        EventSink {
            handle: handle.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Per-pipeline handle on the feed
#[derive(Debug, Clone)]
pub struct EventSink {
    handle: SessionHandle,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    /// Queue an event. Returns false once the feed has shut down.
    pub fn emit(&self, event: PipelineEvent) -> bool {
        self.tx.send((self.handle.clone(), event)).is_ok()
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

#[must_use]
pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<TaggedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

/// Spawn the single task that drains the feed until `cancel` fires or every
/// sender is gone.
pub fn spawn_event_loop(
    mut rx: mpsc::UnboundedReceiver<TaggedEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Pipeline event loop cancelled");
                    break;
                }
                next = rx.recv() => match next {
                    Some((handle, event)) => log_event(&handle, &event),
                    None => {
                        debug!("Pipeline event feed closed");
                        break;
                    }
                },
            }
        }
    })
}

fn log_event(handle: &SessionHandle, event: &PipelineEvent) {
    match event {
        PipelineEvent::Error { source, message } => {
            error!(
                session = %handle,
                element = source.as_deref().unwrap_or("-"),
                "Pipeline error: {message}"
            );
        }
        PipelineEvent::EndOfStream => info!(session = %handle, "Pipeline reached end of stream"),
        PipelineEvent::StateChanged { element, from, to } => {
            debug!(session = %handle, "Element {element} state changed from {from} to {to}");
        }
        PipelineEvent::Other { kind, source } => {
            trace!(session = %handle, "Got {kind} message from {source}");
        }
        PipelineEvent::Exited { code: Some(0) } => {
            info!(session = %handle, "Pipeline process exited");
        }
        PipelineEvent::Exited { code } => {
            warn!(session = %handle, exit_code = ?code, "Pipeline process exited abnormally");
        }
    }
}

mod patterns {
    use super::{LazyLock, Regex};

    pub static ELEMENT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^ERROR: from element (\S+): (.*)$").expect("Invalid element error regex")
    });

    pub static GENERIC_ERROR: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:ERROR|WARNING: erroneous pipeline): ?(.+)$").expect("Invalid error regex")
    });

    pub static EOS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"^Got EOS from element "([^"]+)""#).expect("Invalid EOS regex")
    });

    pub static MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"^Got message #\d+ from (?:element|pad|object) "([^"]+)" \(([^)]+)\)"#)
            .expect("Invalid message regex")
    });

    pub static STATES: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"old-state=\(GstState\)GST_STATE_(\w+), new-state=\(GstState\)GST_STATE_(\w+)")
            .expect("Invalid state regex")
    });
}

/// Translate one line of `gst-launch-1.0 -m` output into an event.
///
/// Error and EOS bus messages are skipped in favour of the dedicated
/// summary lines gst-launch prints for them, so each is reported once.
#[must_use]
pub fn parse_launch_line(line: &str) -> Option<PipelineEvent> {
    let line = line.trim();

    if let Some(caps) = patterns::ELEMENT_ERROR.captures(line) {
        return Some(PipelineEvent::Error {
            source: Some(caps[1].to_string()),
            message: caps[2].to_string(),
        });
    }
    if let Some(caps) = patterns::GENERIC_ERROR.captures(line) {
        return Some(PipelineEvent::Error {
            source: None,
            message: caps[1].to_string(),
        });
    }
    if patterns::EOS.is_match(line) {
        return Some(PipelineEvent::EndOfStream);
    }

    let caps = patterns::MESSAGE.captures(line)?;
    let source = caps[1].to_string();
    match &caps[2] {
        "error" | "eos" => None,
        "state-changed" => {
            let states = patterns::STATES.captures(line)?;
            Some(PipelineEvent::StateChanged {
                element: source,
                from: states[1].to_string(),
                to: states[2].to_string(),
            })
        }
        kind => Some(PipelineEvent::Other {
            kind: kind.to_string(),
            source,
        }),
    }
}
