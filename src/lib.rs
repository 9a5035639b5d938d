//! Relay an RTSP camera as scaled raw video over TCP or UDP.
//!
//! GStreamer does the RTSP session, H.264 decode, conversion, scaling and
//! network output. This crate builds the launch description, drives the
//! pipeline state and hands decoded frames to an optional in-process
//! [`FrameConsumer`].

pub mod config;
pub mod frames;
pub mod logging;
pub mod pipeline;
pub mod relay;

pub use config::{Args, redact};
pub use frames::{Discard, Frame, FrameConsumer, FrameStats};
pub use pipeline::{Output, PipelineConfig, describe};
pub use relay::{BusEvent, Relay, ShutdownHandle};
