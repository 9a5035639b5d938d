use anyhow::{Context, Result, anyhow};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::redact;
use crate::frames::{Frame, FrameConsumer};
use crate::pipeline::{self, FRAMES_NAME, PipelineConfig, SINK_NAME, SOURCE_NAME};

/// How long the drain thread blocks on the appsink before rechecking its token.
const PULL_TIMEOUT_MS: u64 = 100;
/// Pause after a pull that came back empty before its timeout (appsink flushing).
const EMPTY_PULL_BACKOFF: Duration = Duration::from_millis(10);

/// Structure name of the application message that forces the bus loop out.
const SHUTDOWN_MESSAGE: &str = "rtsp-relay-shutdown";

const BUS_FILTER: [gst::MessageType; 4] = [
    gst::MessageType::Error,
    gst::MessageType::Eos,
    gst::MessageType::StateChanged,
    gst::MessageType::Application,
];

/// What the bus loop should do with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Eos,
    Shutdown,
    Error {
        source: String,
        message: String,
        debug: Option<String>,
        hint: Option<&'static str>,
    },
    StateChanged {
        old: gst::State,
        new: gst::State,
    },
    Ignore,
}

pub fn classify(msg: &gst::Message, pipeline: &gst::Pipeline) -> BusEvent {
    use gst::MessageView;

    match msg.view() {
        MessageView::Eos(..) => BusEvent::Eos,
        MessageView::Error(err) => {
            let from = err.src().map_or(Origin::Other, |s| origin(s, pipeline));
            BusEvent::Error {
                source: err
                    .src()
                    .map(|s| s.path_string().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                message: err.error().to_string(),
                debug: err.debug().map(|d| d.to_string()),
                hint: hint(&err.error(), from),
            }
        }
        MessageView::StateChanged(sc) if sc.src() == Some(pipeline.upcast_ref::<gst::Object>()) => {
            BusEvent::StateChanged {
                old: sc.old(),
                new: sc.current(),
            }
        }
        MessageView::Application(app)
            if app.structure().is_some_and(|s| s.has_name(SHUTDOWN_MESSAGE)) =>
        {
            BusEvent::Shutdown
        }
        _ => BusEvent::Ignore,
    }
}

/// Which part of the graph an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Camera,
    Output,
    Other,
}

// rtspsrc posts from its internal children (udpsrc, rtpbin...), so match
// the named element or anything below it.
fn origin(obj: &gst::Object, pipeline: &gst::Pipeline) -> Origin {
    for (name, role) in [(SOURCE_NAME, Origin::Camera), (SINK_NAME, Origin::Output)] {
        if let Some(element) = pipeline.by_name(name) {
            let element = element.upcast::<gst::Object>();
            if *obj == element || obj.has_as_ancestor(&element) {
                return role;
            }
        }
    }
    Origin::Other
}

// Sinks and sources both report failures as resource errors, so the
// domain alone does not say which flags are wrong.
fn hint(err: &glib::Error, origin: Origin) -> Option<&'static str> {
    err.kind::<gst::ResourceError>()?;
    match origin {
        Origin::Camera if err.matches(gst::ResourceError::NotAuthorized) => {
            Some("check --username/--password")
        }
        Origin::Camera => Some("check --cam-ip/--cam-port/--rtsp-path"),
        Origin::Output => Some("check --out-ip/--out-port"),
        Origin::Other => None,
    }
}

/// Where the drain thread pulls decoded samples from.
pub trait SampleSource {
    /// Waits up to `timeout` for the next sample.
    fn pull(&self, timeout: gst::ClockTime) -> Option<gst::Sample>;
    fn is_eos(&self) -> bool;
}

impl SampleSource for gst_app::AppSink {
    fn pull(&self, timeout: gst::ClockTime) -> Option<gst::Sample> {
        self.try_pull_sample(timeout)
    }

    fn is_eos(&self) -> bool {
        gst_app::AppSink::is_eos(self)
    }
}

/// Feeds samples to `consumer` until the source ends, the consumer fails,
/// or `token` is cancelled. Returns the number of frames delivered.
pub fn drain_frames<S, C>(source: &S, mut consumer: C, token: &CancellationToken) -> u64
where
    S: SampleSource,
    C: FrameConsumer,
{
    let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);
    let mut drained = 0;

    while !token.is_cancelled() {
        let started = Instant::now();
        let Some(sample) = source.pull(timeout) else {
            if source.is_eos() {
                debug!("Frame source reached end of stream");
                break;
            }
            if started.elapsed() < Duration::from_millis(PULL_TIMEOUT_MS) {
                thread::sleep(EMPTY_PULL_BACKOFF);
            }
            continue;
        };

        let frame = match Frame::from_sample(&sample) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping undecodable sample: {:#}", e);
                continue;
            }
        };

        drained += 1;
        if let Err(e) = consumer.on_frame(frame) {
            error!("Frame consumer failed: {:#}", e);
            break;
        }
    }

    info!("Frame drain exiting after {} frames", drained);
    drained
}

/// Cloneable handle that asks a running [`Relay`] to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    pipeline: gst::Pipeline,
}

impl ShutdownHandle {
    /// Sends EOS through the pipeline so the sinks flush and the bus loop
    /// ends on the normal end-of-stream path.
    pub fn request(&self) {
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            warn!("Pipeline did not accept EOS, forcing shutdown");
            self.force();
        }
    }

    /// Stops the bus loop without waiting for EOS to propagate.
    pub fn force(&self) {
        let msg = gst::message::Application::builder(gst::Structure::new_empty(SHUTDOWN_MESSAGE))
            .src(&self.pipeline)
            .build();
        if self.pipeline.post_message(msg).is_err() {
            warn!("Failed to post shutdown message");
        }
    }
}

pub struct Relay {
    pipeline: gst::Pipeline,
    frames: Option<gst_app::AppSink>,
}

impl Relay {
    /// Parses the launch description for `config` and points it at `camera`.
    /// `gst::init` must have been called.
    pub fn new(config: &PipelineConfig, camera: &Url) -> Result<Self> {
        let desc = pipeline::describe(config);
        debug!("Launch description: {}", desc);

        let pipeline = gst::parse::launch(&desc)
            .context("Failed to create pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("Launch description did not produce a pipeline"))?;

        let src = pipeline
            .by_name(SOURCE_NAME)
            .with_context(|| format!("No element named '{}' in the pipeline", SOURCE_NAME))?;
        src.set_property("location", camera.as_str());
        info!("Camera: {}", redact(camera));

        let frames = if config.frames {
            let sink = pipeline
                .by_name(FRAMES_NAME)
                .with_context(|| format!("Could not find appsink named '{}' in the pipeline", FRAMES_NAME))?
                .downcast::<gst_app::AppSink>()
                .map_err(|_| anyhow!("Element '{}' is not an appsink", FRAMES_NAME))?;
            Some(sink)
        } else {
            None
        };

        Ok(Self { pipeline, frames })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            pipeline: self.pipeline.clone(),
        }
    }

    /// Drives the pipeline NULL → PLAYING → NULL, handing decoded frames to
    /// `consumer` until end of stream, an error, or a shutdown request.
    #[instrument(skip_all)]
    pub fn run<C>(&self, consumer: C) -> Result<()>
    where
        C: FrameConsumer + 'static,
    {
        if let Err(e) = self.pipeline.set_state(gst::State::Playing) {
            self.stop();
            return Err(anyhow!("Failed to set pipeline to PLAYING: {}", e));
        }

        let token = CancellationToken::new();
        let drain = match self.spawn_drain(consumer, &token) {
            Ok(drain) => drain,
            Err(e) => {
                self.stop();
                return Err(e);
            }
        };

        let result = self.watch_bus();

        token.cancel();
        if let Some(handle) = drain {
            match handle.join() {
                Ok(n) => debug!("Drain thread joined ({} frames)", n),
                Err(_) => error!("Frame drain thread panicked"),
            }
        }

        self.stop();
        if result.is_ok() {
            info!("Exiting cleanly");
        }
        result
    }

    fn spawn_drain<C>(&self, consumer: C, token: &CancellationToken) -> Result<Option<JoinHandle<u64>>>
    where
        C: FrameConsumer + 'static,
    {
        let Some(appsink) = self.frames.clone() else {
            return Ok(None);
        };
        let token = token.clone();
        let handle = thread::Builder::new()
            .name("frame-drain".into())
            .spawn(move || drain_frames(&appsink, consumer, &token))
            .context("Failed to spawn frame drain thread")?;
        Ok(Some(handle))
    }

    fn watch_bus(&self) -> Result<()> {
        let bus = self.pipeline.bus().context("Pipeline has no bus")?;

        for msg in bus.iter_timed_filtered(gst::ClockTime::NONE, &BUS_FILTER) {
            match classify(&msg, &self.pipeline) {
                BusEvent::Eos => {
                    info!("End of stream");
                    return Ok(());
                }
                BusEvent::Shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                BusEvent::Error {
                    source,
                    message,
                    debug: debug_info,
                    hint,
                } => {
                    error!(
                        "Error from {}: {} ({})",
                        source,
                        message,
                        debug_info.as_deref().unwrap_or("no debug info")
                    );
                    return Err(match hint {
                        Some(hint) => anyhow!("{}: {} ({})", source, message, hint),
                        None => anyhow!("{}: {}", source, message),
                    });
                }
                BusEvent::StateChanged { old, new } => {
                    info!("Pipeline state changed from {:?} to {:?}", old, new);
                }
                BusEvent::Ignore => {}
            }
        }

        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!("Failed to set pipeline to NULL: {}", e);
        }
    }
}
