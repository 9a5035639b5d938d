use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use gstreamer as gst;
use std::time::{Duration, Instant};
use tracing::info;

/// A decoded, scaled frame pulled from the appsink branch.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// GStreamer raw format name, e.g. `RGB16`.
    pub format: String,
    pub pts: Option<gst::ClockTime>,
}

impl Frame {
    pub fn from_sample(sample: &gst::Sample) -> Result<Self> {
        let buffer = sample.buffer().context("Sample has no buffer")?;
        let caps = sample.caps().context("Sample has no caps")?;
        let s = caps.structure(0).context("Sample caps are empty")?;

        let width = s
            .get::<i32>("width")
            .map_err(|e| anyhow!("Sample caps have no width: {}", e))?;
        let height = s
            .get::<i32>("height")
            .map_err(|e| anyhow!("Sample caps have no height: {}", e))?;
        let format = s.get::<String>("format").unwrap_or_default();

        let map = buffer.map_readable().context("Failed to map sample buffer")?;

        Ok(Frame {
            data: Bytes::copy_from_slice(map.as_slice()),
            width: u32::try_from(width).context("Negative frame width")?,
            height: u32::try_from(height).context("Negative frame height")?,
            format,
            pts: buffer.pts(),
        })
    }
}

/// Receives frames on the drain thread. Returning an error stops draining.
pub trait FrameConsumer: Send {
    fn on_frame(&mut self, frame: Frame) -> Result<()>;
}

impl<F> FrameConsumer for F
where
    F: FnMut(Frame) -> Result<()> + Send,
{
    fn on_frame(&mut self, frame: Frame) -> Result<()> {
        self(frame)
    }
}

/// Drops every frame; only keeps the appsink queue from filling up.
pub struct Discard;

impl FrameConsumer for Discard {
    fn on_frame(&mut self, _frame: Frame) -> Result<()> {
        Ok(())
    }
}

/// Counts frames and periodically logs the observed rate.
pub struct FrameStats {
    interval: Duration,
    frames: u64,
    bytes: u64,
    // Opens on the first frame so camera setup time is not counted.
    window_start: Option<Instant>,
    window_frames: u64,
}

impl FrameStats {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            frames: 0,
            bytes: 0,
            window_start: None,
            window_frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl FrameConsumer for FrameStats {
    fn on_frame(&mut self, frame: Frame) -> Result<()> {
        self.frames += 1;
        self.bytes += frame.data.len() as u64;
        self.window_frames += 1;

        let Some(window_start) = self.window_start else {
            self.window_start = Some(Instant::now());
            return Ok(());
        };

        let elapsed = window_start.elapsed();
        if elapsed >= self.interval {
            let fps = self.window_frames as f64 / elapsed.as_secs_f64();
            info!(
                "{:.1} fps, {}x{} {}, {} frames total",
                fps, frame.width, frame.height, frame.format, self.frames
            );
            self.window_start = Some(Instant::now());
            self.window_frames = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(with_caps: bool) -> gst::Sample {
        gst::init().unwrap();
        let mut buffer = gst::Buffer::from_mut_slice(vec![7u8; 4 * 2 * 2]);
        buffer
            .get_mut()
            .unwrap()
            .set_pts(gst::ClockTime::from_mseconds(40));
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB16")
            .field("width", 4i32)
            .field("height", 2i32)
            .build();
        if with_caps {
            gst::Sample::builder().buffer(&buffer).caps(&caps).build()
        } else {
            gst::Sample::builder().buffer(&buffer).build()
        }
    }

    #[test]
    fn frame_from_sample_reads_caps_and_payload() {
        let frame = Frame::from_sample(&sample(true)).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.format, "RGB16");
        assert_eq!(frame.data.len(), 16);
        assert!(frame.data.iter().all(|b| *b == 7));
        assert_eq!(frame.pts, Some(gst::ClockTime::from_mseconds(40)));
    }

    #[test]
    fn frame_without_caps_is_an_error() {
        assert!(Frame::from_sample(&sample(false)).is_err());
    }

    #[test]
    fn stats_count_frames_and_bytes() {
        let mut stats = FrameStats::new(Duration::ZERO);
        for _ in 0..3 {
            stats.on_frame(Frame::from_sample(&sample(true)).unwrap()).unwrap();
        }
        assert_eq!(stats.frames(), 3);
        assert_eq!(stats.bytes(), 48);
    }

    #[test]
    fn rate_window_opens_on_first_frame() {
        let mut stats = FrameStats::new(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));

        stats.on_frame(Frame::from_sample(&sample(true)).unwrap()).unwrap();
        assert!(stats.window_start.is_some());
        assert_eq!(stats.window_frames, 1);

        std::thread::sleep(Duration::from_millis(40));
        stats.on_frame(Frame::from_sample(&sample(true)).unwrap()).unwrap();
        assert_eq!(stats.window_frames, 0);
        assert_eq!(stats.frames(), 2);
    }

    #[test]
    fn closures_are_consumers() {
        let mut seen = Vec::new();
        {
            let mut consumer = |f: Frame| -> Result<()> {
                seen.push(f.width);
                Ok(())
            };
            consumer.on_frame(Frame::from_sample(&sample(true)).unwrap()).unwrap();
        }
        assert_eq!(seen, vec![4]);
    }
}
