//! Local RTSP test camera for exercising `rtsp-relay` without hardware.
//!
//! Serves an H.264 test pattern at `rtsp://<address>:<port><mount>`. The
//! defaults line up with the relay's default `--rtsp-path`, so
//! `rtsp-relay --cam-ip 127.0.0.1 --cam-port 8554` works out of the box.

use anyhow::{Context, Result};
use clap::Parser;
use gstreamer as gst;
use gstreamer_rtsp_server as gst_rtsp_server;
use gst_rtsp_server::prelude::*;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "fake-camera")]
struct Args {
    /// Address to bind the RTSP server to
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    #[arg(long, default_value_t = 8554)]
    port: u16,

    /// Mount point of the stream
    #[arg(long, default_value = "/h264Preview_01_sub")]
    mount: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    #[arg(long, default_value_t = 15)]
    fps: u32,

    /// videotestsrc pattern (smpte, ball, snow, ...)
    #[arg(long, default_value = "smpte")]
    pattern: String,
}

impl Args {
    fn mount_path(&self) -> String {
        format!("/{}", self.mount.trim_start_matches('/'))
    }

    fn launch(&self) -> String {
        format!(
            "( videotestsrc is-live=true pattern={pattern} ! \
             video/x-raw,width={width},height={height},framerate={fps}/1 ! \
             x264enc tune=zerolatency speed-preset=veryfast key-int-max={fps} ! \
             video/x-h264,profile=baseline ! \
             rtph264pay config-interval=1 name=pay0 pt=96 )",
            pattern = self.pattern,
            width = self.width,
            height = self.height,
            fps = self.fps,
        )
    }
}

fn main() -> Result<()> {
    rtsp_relay::logging::init();
    let args = Args::parse();

    gst::init().context("Failed to initialize GStreamer")?;

    let main_loop = glib::MainLoop::new(None, false);
    let server = gst_rtsp_server::RTSPServer::new();
    server.set_address(&args.address);
    server.set_service(&args.port.to_string());

    let mounts = server
        .mount_points()
        .context("RTSP server has no mount points")?;

    let factory = gst_rtsp_server::RTSPMediaFactory::new();
    factory.set_launch(&args.launch());
    // One encoder for every client, like a real camera.
    factory.set_shared(true);

    let mount = args.mount_path();
    mounts.add_factory(&mount, factory);

    server
        .attach(None)
        .context("Cannot attach RTSP server to the main context")?;

    info!(
        "Test camera ready at rtsp://{}:{}{}",
        args.address, args.port, mount
    );
    main_loop.run();
    Ok(())
}
