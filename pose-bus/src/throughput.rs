use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Length of one throughput window.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Frames processed in the last window over its elapsed time. Not averaged
/// across windows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThroughputSample {
    pub fps: f64,
    pub frames: u64,
    pub elapsed_secs: f64,
}

pub struct ThroughputMeter {
    frames: u64,
    window_start: Instant,
    last: Option<ThroughputSample>,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            frames: 0,
            window_start: start,
            last: None,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    /// Closes the current window at `now` and starts the next one.
    pub fn sample_at(&mut self, now: Instant) -> ThroughputSample {
        let elapsed = now.saturating_duration_since(self.window_start);
        let elapsed_secs = elapsed.as_secs_f64();
        let fps = if elapsed_secs > 0.0 {
            self.frames as f64 / elapsed_secs
        } else {
            0.0
        };
        let sample = ThroughputSample {
            fps,
            frames: self.frames,
            elapsed_secs,
        };
        self.frames = 0;
        self.window_start = now;
        self.last = Some(sample);
        sample
    }

    pub fn sample(&mut self) -> ThroughputSample {
        self.sample_at(Instant::now())
    }

    pub fn last(&self) -> Option<ThroughputSample> {
        self.last
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}
