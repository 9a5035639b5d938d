use anyhow::{Context, Result};
use clap::Parser;
use gstreamer as gst;
use std::time::Duration;
use tracing::{info, warn};

use rtsp_relay::{Args, FrameStats, Relay, describe};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
// How long Ctrl-C waits for EOS to drain through the sinks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    rtsp_relay::logging::init();

    let args = Args::parse();
    let camera = args.camera_url()?;
    let config = args.pipeline_config();

    gst::init().context("Failed to initialize GStreamer")?;

    info!("Pipeline:\n{}", describe(&config));
    let relay = Relay::new(&config, &camera)?;
    let shutdown = relay.shutdown_handle();

    // The bus loop blocks, keep it off the async workers.
    let mut task = tokio::task::spawn_blocking(move || relay.run(FrameStats::new(STATS_INTERVAL)));

    let result = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping pipeline");
            shutdown.request();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(res) => res,
                Err(_) => {
                    warn!("End of stream did not arrive in time, forcing shutdown");
                    shutdown.force();
                    task.await
                }
            }
        }
    };

    result.context("Relay task panicked")?
}
