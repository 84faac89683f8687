use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;

pub type FrameSender = tokio::sync::broadcast::Sender<FrameCmd>;
pub type FrameReceiver = tokio::sync::broadcast::Receiver<FrameCmd>;

#[derive(Clone)]
pub enum FrameCmd {
    Data(Arc<VideoFrame>),
    EOF,
}

/// Decoded frame, packed RGB24 rows without padding.
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Seconds since the start of the stream.
    pub timestamp: f64,
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, timestamp: f64) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            timestamp,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Solid color frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], timestamp: f64) -> Self {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(Self::rgb_len(width, height))
            .collect();
        Self::new(data, width, height, timestamp)
    }

    pub fn rgb_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// A frame is usable once it has positive dimensions and a complete buffer.
    pub fn is_decoded(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= Self::rgb_len(self.width, self.height)
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame {{ #{} {}x{} @ {:.3}s, data: {} }}",
            self.sequence,
            self.width,
            self.height,
            self.timestamp,
            self.data.len()
        )
    }
}
