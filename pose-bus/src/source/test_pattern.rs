use std::time::Instant;

use crate::{frame::VideoFrame, source::FrameReader};

/// Synthetic live feed: a dim gradient with a bright square sweeping across it.
pub struct TestPatternReader {
    width: u32,
    height: u32,
    fps: f64,
    started: Option<Instant>,
    frame_count: u64,
}

impl TestPatternReader {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            started: None,
            frame_count: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![0u8; VideoFrame::rgb_len(self.width, self.height)];
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                data[i] = (x * 96 / w.max(1)) as u8;
                data[i + 1] = (y * 96 / h.max(1)) as u8;
                data[i + 2] = 48;
            }
        }

        let side = (w.min(h) / 6).max(1);
        let travel = w.saturating_sub(side).max(1);
        let left = (self.frame_count as usize * 4) % travel;
        let top = h.saturating_sub(side) / 2;
        for y in top..(top + side).min(h) {
            for x in left..(left + side).min(w) {
                let i = (y * w + x) * 3;
                data[i..i + 3].copy_from_slice(&[240, 240, 240]);
            }
        }
        data
    }
}

impl FrameReader for TestPatternReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn duration(&self) -> f64 {
        f64::INFINITY
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let frame = VideoFrame::new(
            self.render(),
            self.width,
            self.height,
            started.elapsed().as_secs_f64(),
        );
        self.frame_count += 1;
        Ok(Some(frame))
    }
}
