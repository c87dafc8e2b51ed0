//! `gst-launch-1.0` backed pipeline engine
//!
//! Each relay pipeline runs as a `gst-launch-1.0 -e -m` child process:
//! `-e` turns SIGINT into an end-of-stream that drains the muxer before the
//! process exits, and `-m` prints every bus message so stdout/stderr can be
//! translated into [`PipelineEvent`]s.

use super::description::PipelineDescription;
use super::events::{parse_launch_line, EventSink, PipelineEvent};
use super::{EnginePipeline, PipelineEngine};
use crate::config::PipelineConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// How long shutdown waits for output readers to hit end of file
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub struct GstLaunchEngine {
    launch_path: String,
    inspect_path: String,
    probe_elements: bool,
    kill_timeout: Duration,
    /// Element name -> whether `gst-inspect-1.0 --exists` found it
    probed: DashMap<String, bool>,
}

impl GstLaunchEngine {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            launch_path: config.gst_launch_path.clone(),
            inspect_path: config.gst_inspect_path.clone(),
            probe_elements: config.probe_elements,
            kill_timeout: config.kill_timeout(),
            probed: DashMap::new(),
        }
    }

    async fn element_exists(&self, element: &str) -> Result<bool> {
        if let Some(found) = self.probed.get(element) {
            return Ok(*found);
        }

        let status = Command::new(&self.inspect_path)
            .arg("--exists")
            .arg(element)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                RelayError::PipelineConstruction(format!(
                    "cannot run {} to probe for {element}: {e}",
                    self.inspect_path
                ))
            })?;

        let found = status.success();
        debug!(element, found, "Probed pipeline element");
        self.probed.insert(element.to_string(), found);
        Ok(found)
    }

    async fn missing_elements(&self, elements: &[&str]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for element in elements {
            if !self.element_exists(element).await? {
                missing.push((*element).to_string());
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl PipelineEngine for GstLaunchEngine {
    async fn construct(&self, description: &PipelineDescription) -> Result<Box<dyn EnginePipeline>> {
        if self.probe_elements {
            let missing = self.missing_elements(description.required_elements()).await?;
            if !missing.is_empty() {
                return Err(RelayError::PipelineConstruction(format!(
                    "missing GStreamer element(s): {}",
                    missing.join(", ")
                )));
            }
        }

        let mut args = vec!["-e".to_string(), "-m".to_string()];
        args.extend(description.tokens().iter().cloned());

        Ok(Box::new(GstLaunchPipeline {
            program: self.launch_path.clone(),
            args,
            kill_timeout: self.kill_timeout,
            process: None,
        }))
    }
}

struct GstLaunchPipeline {
    program: String,
    args: Vec<String>,
    kill_timeout: Duration,
    process: Option<LaunchProcess>,
}

/// Tasks and channels tied to one spawned `gst-launch-1.0`
struct LaunchProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<bool>,
    waiter: JoinHandle<()>,
    readers: Vec<JoinHandle<()>>,
}

impl LaunchProcess {
    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.exited.wait_for(|exited| *exited))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

#[async_trait]
impl EnginePipeline for GstLaunchPipeline {
    async fn play(&mut self, events: EventSink) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RelayError::PipelineConstruction(format!("failed to launch {}: {e}", self.program))
            })?;

        let pid = child.id();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(stdout, events.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_output(stderr, events.clone())));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill pipeline process: {e}");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to reap pipeline process: {e}");
                    None
                }
            };
            events.emit(PipelineEvent::Exited { code });
            let _ = exited_tx.send(true);
        });

        info!(pid = ?pid, "Launched {}", self.program);
        self.process = Some(LaunchProcess {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            waiter,
            readers,
        });
        Ok(())
    }

    async fn send_eos(&mut self, timeout: Duration) -> bool {
        let Some(process) = self.process.as_mut() else {
            return true;
        };
        let exited = *process.exited.borrow();
        if exited {
            return true;
        }
        let Some(pid) = process.pid else {
            return false;
        };
        if !interrupt(pid) {
            return false;
        }
        process.wait_exit(timeout).await
    }

    async fn shutdown(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        let exited = *process.exited.borrow();
        if !exited {
            if let Some(kill_tx) = process.kill_tx.take() {
                let _ = kill_tx.send(());
            }
            if !process.wait_exit(self.kill_timeout).await {
                warn!(pid = ?process.pid, "Pipeline process did not exit after kill");
            }
        }

        process.waiter.abort();
        // Let the readers turn trailing output (EOS or error summaries) into
        // events; a grandchild still holding the pipes must not stall us.
        for mut reader in process.readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }
    }
}

async fn forward_output<R>(stream: R, events: EventSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(session = %events.handle(), "gst-launch: {line}");
        if let Some(event) = parse_launch_line(&line) {
            events.emit(event);
        }
    }
}

/// Ask gst-launch to finish the stream; with `-e` it forwards EOS and exits.
#[cfg(unix)]
fn interrupt(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGINT) {
        Ok(()) => true,
        Err(e) => {
            warn!(pid, "Failed to interrupt pipeline process: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) -> bool {
    false
}
