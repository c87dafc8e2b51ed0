//! Relay pipeline description
//!
//! The relay graph is fixed: Opus and H.264 RTP arrive on two local UDP
//! ports, pass through an `rtpbin`, the video is depayloaded straight into a
//! streamable FLV mux, the audio is decoded and re-encoded as AAC, and the
//! mux output is pushed to the RTMP destination.

use crate::types::PortPair;
use std::fmt;

/// RTP caps of the inbound audio track (WebRTC Opus)
pub const AUDIO_RTP_CAPS: &str =
    "application/x-rtp,media=audio,encoding-name=OPUS,clock-rate=48000";

/// RTP caps of the inbound video track (WebRTC H.264)
pub const VIDEO_RTP_CAPS: &str =
    "application/x-rtp,media=video,encoding-name=H264,clock-rate=90000";

/// Every element the relay graph instantiates.
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "rtpbin",
    "udpsrc",
    "rtph264depay",
    "flvmux",
    "rtmpsink",
    "rtpopusdepay",
    "queue",
    "opusdec",
    "voaacenc",
];

/// Launch description for one relay pipeline.
///
/// Kept as a token list because `gst-launch-1.0` escapes whitespace inside
/// each argument; a URL containing spaces therefore stays a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    tokens: Vec<String>,
}

impl PipelineDescription {
    #[must_use]
    pub fn relay(url: &str, ports: PortPair, rtp_address: &str, audio_bitrate: u32) -> Self {
        let audio_port = format!("port={}", ports.audio);
        let video_port = format!("port={}", ports.video);
        let address = format!("address={rtp_address}");
        let audio_caps = format!("caps={AUDIO_RTP_CAPS}");
        let video_caps = format!("caps={VIDEO_RTP_CAPS}");
        let location = format!("location={url}");
        let bitrate = format!("bitrate={audio_bitrate}");

        let mut tokens = Vec::new();
        extend(&mut tokens, &["rtpbin", "name=rtpbin"]);
        extend(
            &mut tokens,
            &["udpsrc", address.as_str(), audio_port.as_str(), audio_caps.as_str(), "!", "rtpbin.recv_rtp_sink_1"],
        );
        extend(
            &mut tokens,
            &["udpsrc", address.as_str(), video_port.as_str(), video_caps.as_str(), "!", "rtpbin.recv_rtp_sink_0"],
        );
        extend(
            &mut tokens,
            &["rtpbin.", "!", "rtph264depay", "!", "flvmux", "streamable=true", "name=mux", "!", "rtmpsink", location.as_str()],
        );
        extend(
            &mut tokens,
            &["rtpbin.", "!", "rtpopusdepay", "!", "queue", "!", "opusdec", "!", "voaacenc", bitrate.as_str(), "!", "mux."],
        );

        Self { tokens }
    }

    /// Arguments handed to the engine, one element property or link per entry.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn required_elements(&self) -> &'static [&'static str] {
        REQUIRED_ELEMENTS
    }
}

fn extend(tokens: &mut Vec<String>, parts: &[&str]) {
    tokens.extend(parts.iter().map(|p| (*p).to_string()));
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}
