//! File playback through FFmpeg: any container/codec FFmpeg can demux and
//! decode, converted to RGB24.

use std::path::Path;

use ffmpeg_next::{
    codec, format, frame, media,
    software::scaling::{Context as ScalingContext, Flags},
    util::format::Pixel,
};

use crate::{frame::VideoFrame, source::FrameReader};

pub struct FfmpegReader {
    input: format::context::Input,
    decoder: codec::decoder::Video,
    scaler: ScalingContext,
    stream_index: usize,
    time_base: f64,
    /// Stream start time in `time_base` units, if known.
    start_pts: Option<i64>,
    fps: f64,
    duration: f64,
    eof_sent: bool,
    frame_count: u64,
}

// The scaling context holds raw pointers; the reader is only used from the
// single blocking thread that owns it.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;

        let input = format::input(&path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", path.display(), e))?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or(anyhow::anyhow!("no video stream in {}", path.display()))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let start_pts = Some(stream.start_time()).filter(|t| *t != ffmpeg_next::ffi::AV_NOPTS_VALUE);
        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            30.0
        };

        let decoder = codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("missing codec parameters in {}", path.display());
        }

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )?;

        let duration = if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
        } else {
            f64::INFINITY
        };

        log::info!(
            "ffmpeg source {}: {}x{} {:?} @ {:.2} fps, {:.2}s",
            path.display(),
            decoder.width(),
            decoder.height(),
            decoder.format(),
            fps,
            duration
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            time_base,
            start_pts,
            fps,
            duration,
            eof_sent: false,
            frame_count: 0,
        })
    }

    fn receive(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        let mut decoded = frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            // EAGAIN or EOF
            return Ok(None);
        }

        let mut rgb = frame::Video::empty();
        self.scaler.run(&decoded, &mut rgb)?;

        let (width, height) = (rgb.width(), rgb.height());
        let row = width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data(0);
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&plane[y * stride..y * stride + row]);
        }

        let timestamp = match decoded.timestamp().or(decoded.pts()) {
            Some(pts) => playback_position(pts, self.start_pts, self.time_base),
            None => self.frame_count as f64 / self.fps,
        };
        self.frame_count += 1;
        Ok(Some(VideoFrame::new(data, width, height, timestamp)))
    }
}

/// Seconds since the start of the stream. Containers such as MPEG-TS begin at
/// a non-zero timestamp, while the reported duration does not include it.
fn playback_position(pts: i64, start_pts: Option<i64>, time_base: f64) -> f64 {
    let offset = pts.saturating_sub(start_pts.unwrap_or(0));
    (offset as f64 * time_base).max(0.0)
}

impl FrameReader for FfmpegReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("ffmpeg source: send packet error: {}", e);
                    }
                }
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_relative_to_stream_start() {
        // MPEG-TS, 90 kHz clock, first frame at 1.4s
        let time_base = 1.0 / 90_000.0;
        let start = Some(126_000);
        assert_eq!(playback_position(126_000, start, time_base), 0.0);
        assert!((playback_position(900_000, start, time_base) - 8.6).abs() < 1e-9);
        assert!((playback_position(90_000, None, time_base) - 1.0).abs() < 1e-9);
        // frames before the declared start clamp to zero
        assert_eq!(playback_position(0, start, time_base), 0.0);
    }
}
