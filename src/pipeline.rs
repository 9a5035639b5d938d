//! Launch description for the relay graph.
//!
//! ```text
//! rtspsrc ! rtph264depay ! h264parse ! avdec_h264 ! videoconvert ! videoscale
//!   ! queue ! video/x-raw,... ! tee name=t
//!       t. ! queue ! tcpserversink | udpsink
//!       t. ! queue ! appsink name=frames
//! ```
//!
//! Every queue holds a single buffer and leaks downstream, so a slow branch
//! drops stale frames instead of stalling the camera.

use std::fmt;

/// Name of the `rtspsrc` element; its `location` is set after parsing.
pub const SOURCE_NAME: &str = "src";
/// Name of the network sink.
pub const SINK_NAME: &str = "out";
/// Name of the appsink feeding the in-process frame consumer.
pub const FRAMES_NAME: &str = "frames";

const QUEUE: &str = "queue max-size-buffers=1 leaky=downstream";

/// Where the scaled raw video goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Tcp { host, port } => write!(f, "tcpserversink host={} port={}", host, port),
            Output::Udp { host, port } => write!(f, "udpsink host={} port={}", host, port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub latency_ms: u32,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub output: Output,
    /// Add the tee + appsink branch for in-process consumers.
    pub frames: bool,
}

/// Builds the `gst_parse_launch` description for `config`.
///
/// The camera URL is deliberately absent; see [`SOURCE_NAME`].
pub fn describe(config: &PipelineConfig) -> String {
    let mut desc = format!(
        "rtspsrc name={src} latency={latency} ! \
         rtph264depay ! h264parse ! avdec_h264 ! \
         videoconvert ! videoscale ! \
         {queue} ! \
         video/x-raw,format={format},width={width},height={height} ! ",
        src = SOURCE_NAME,
        latency = config.latency_ms,
        queue = QUEUE,
        format = config.format,
        width = config.width,
        height = config.height,
    );

    let sink = format!("{} name={} sync=false", config.output, SINK_NAME);

    if config.frames {
        desc.push_str(&format!(
            "tee name=t \
             t. ! {queue} ! {sink} \
             t. ! {queue} ! appsink name={frames} sync=false emit-signals=false drop=true max-buffers=1",
            queue = QUEUE,
            sink = sink,
            frames = FRAMES_NAME,
        ));
    } else {
        desc.push_str(&format!("{} ! {}", QUEUE, sink));
    }

    desc
}
