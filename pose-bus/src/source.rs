use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::frame::{FrameCmd, FrameReceiver, FrameSender, VideoFrame};

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod raw_video;
pub mod test_pattern;

/// Where frames come from: a live feed or file playback.
pub trait FrameSource: Send + Sync {
    /// Latest decoded frame, if any.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Playback position in seconds.
    fn position(&self) -> f64;

    /// Total length in seconds; `f64::INFINITY` for live sources.
    fn duration(&self) -> f64;

    /// Raw frame stream, used for capture and for frame-arrival notification.
    fn subscribe(&self) -> FrameReceiver;

    fn is_ready(&self) -> bool {
        self.current_frame().is_some_and(|f| f.is_decoded())
    }

    /// Live sources never end.
    fn is_end_of_stream(&self) -> bool {
        self.duration().is_finite() && self.position() >= self.duration()
    }
}

/// Blocking producer of frames, driven by a [`PacedSource`].
pub trait FrameReader: Send + 'static {
    /// Frames per second the reader should be played back at.
    fn fps(&self) -> f64;

    /// Total length in seconds; `f64::INFINITY` when unknown or live.
    fn duration(&self) -> f64;

    /// Next frame, `None` at end of stream.
    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>>;
}

struct SourceShared {
    current: watch::Sender<Option<Arc<VideoFrame>>>,
    ended: AtomicBool,
}

/// Plays a [`FrameReader`] back at its own frame rate on a blocking thread and
/// publishes every frame.
pub struct PacedSource {
    shared: Arc<SourceShared>,
    frames: FrameSender,
    cancel: CancellationToken,
    duration: f64,
}

impl PacedSource {
    pub fn start<R: FrameReader>(reader: R) -> Self {
        let (current, _) = watch::channel(None);
        let shared = Arc::new(SourceShared {
            current,
            ended: AtomicBool::new(false),
        });
        let (frames, _) = tokio::sync::broadcast::channel(64);
        let cancel = CancellationToken::new();
        let duration = reader.duration();

        let task_shared = Arc::clone(&shared);
        let task_frames = frames.clone();
        let task_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            Self::read_loop(reader, task_shared, task_frames, task_cancel)
        });

        Self {
            shared,
            frames,
            cancel,
            duration,
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn read_loop(
        mut reader: impl FrameReader,
        shared: Arc<SourceShared>,
        frames: FrameSender,
        cancel: CancellationToken,
    ) {
        let fps = reader.fps();
        let interval = if fps > 0.0 {
            Duration::from_secs_f64(1.0 / fps)
        } else {
            Duration::ZERO
        };
        let mut sequence = 0u64;

        loop {
            if cancel.is_cancelled() {
                log::debug!("frame reader cancelled after {} frames", sequence);
                break;
            }
            let started = Instant::now();
            match reader.read_frame() {
                Ok(Some(frame)) => {
                    let frame = Arc::new(frame.with_sequence(sequence));
                    sequence += 1;
                    shared.current.send_replace(Some(Arc::clone(&frame)));
                    // no subscribers is fine
                    let _ = frames.send(FrameCmd::Data(frame));
                }
                Ok(None) => {
                    log::info!("frame reader reached end of stream after {} frames", sequence);
                    break;
                }
                Err(e) => {
                    log::error!("frame reader error: {:#}", e);
                    break;
                }
            }
            std::thread::sleep(interval.saturating_sub(started.elapsed()));
        }

        shared.ended.store(true, Ordering::Release);
        let _ = frames.send(FrameCmd::EOF);
    }
}

impl FrameSource for PacedSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.shared.current.borrow().clone()
    }

    fn position(&self) -> f64 {
        if self.shared.ended.load(Ordering::Acquire) && self.duration.is_finite() {
            return self.duration;
        }
        self.current_frame().map(|f| f.timestamp).unwrap_or(0.0)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn subscribe(&self) -> FrameReceiver {
        self.frames.subscribe()
    }
}

impl Drop for PacedSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
