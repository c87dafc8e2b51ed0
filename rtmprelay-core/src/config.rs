use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::ports::DEFAULT_PORT_BASE;

/// Relay node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ports: PortConfig,
    pub pipeline: PipelineConfig,
}

/// Listen address of the HTTP host adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8088,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Inclusive range the inbound RTP port cursor walks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub base: u16,
    pub max: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_PORT_BASE,
            max: u16::MAX,
        }
    }
}

/// Media pipeline engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `gst-launch-1.0` executable used to run relay pipelines
    pub gst_launch_path: String,
    /// `gst-inspect-1.0` executable used to probe for required elements
    pub gst_inspect_path: String,
    /// Skip element probing (the pipeline then fails at runtime instead)
    pub probe_elements: bool,
    /// Address the RTP receivers bind to
    pub rtp_address: String,
    /// AAC bitrate of the transcoded audio track (bits/s)
    pub audio_bitrate: u32,
    /// How long stop waits for end-of-stream to drain before killing
    pub eos_timeout_ms: u64,
    /// How long stop waits for a killed pipeline to be reaped
    pub kill_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gst_launch_path: "gst-launch-1.0".to_string(),
            gst_inspect_path: "gst-inspect-1.0".to_string(),
            probe_elements: true,
            rtp_address: "localhost".to_string(),
            audio_bitrate: 128_000,
            eos_timeout_ms: 5_000,
            kill_timeout_ms: 2_000,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub const fn eos_timeout(&self) -> Duration {
        Duration::from_millis(self.eos_timeout_ms)
    }

    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // RTMPRELAY_SERVER__HTTP_PORT, RTMPRELAY_PIPELINE__EOS_TIMEOUT_MS, ...
        builder = builder.add_source(
            Environment::with_prefix("RTMPRELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ports.base == 0 {
            errors.push("ports.base must be non-zero".to_string());
        }
        if self.ports.max <= self.ports.base {
            errors.push(format!(
                "ports.max ({}) must be greater than ports.base ({})",
                self.ports.max, self.ports.base
            ));
        }
        if self.pipeline.gst_launch_path.trim().is_empty() {
            errors.push("pipeline.gst_launch_path must not be empty".to_string());
        }
        if self.pipeline.probe_elements && self.pipeline.gst_inspect_path.trim().is_empty() {
            errors.push(
                "pipeline.gst_inspect_path must not be empty when probe_elements is set".to_string(),
            );
        }
        if self.pipeline.rtp_address.trim().is_empty() {
            errors.push("pipeline.rtp_address must not be empty".to_string());
        }
        if self.pipeline.audio_bitrate == 0 {
            errors.push("pipeline.audio_bitrate must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

/// Resolve and load the node configuration.
///
/// Config file search order:
/// 1. `explicit_path` (from the command line)
/// 2. `RTMPRELAY_CONFIG_PATH` environment variable
/// 3. ./rtmprelay.yaml (current working directory)
/// 4. /etc/rtmprelay/config.yaml
/// 5. Fall back to environment variables only
pub fn load_config(explicit_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = explicit_path
        .map(str::to_string)
        .or_else(|| {
            std::env::var("RTMPRELAY_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            ["rtmprelay.yaml", "/etc/rtmprelay/config.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        });

    let config = match config_path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path)?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            Config::from_env()?
        }
    };

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated");
    Ok(config)
}
