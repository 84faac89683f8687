use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::{Path, PathBuf},
};

use crate::{frame::VideoFrame, source::FrameReader};

/// Plays back a headerless RGB24 file (`ffmpeg -f rawvideo -pix_fmt rgb24`),
/// which is also what the raw recording format writes.
pub struct RawVideoReader {
    path: PathBuf,
    reader: BufReader<File>,
    width: u32,
    height: u32,
    fps: f64,
    frame_total: u64,
    frame_count: u64,
}

impl RawVideoReader {
    pub fn open(path: impl AsRef<Path>, width: u32, height: u32, fps: f64) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        if fps <= 0.0 {
            anyhow::bail!("invalid frame rate {}", fps);
        }

        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("open raw video {}: {}", path.display(), e))?;
        let len = file.metadata()?.len();
        let frame_len = VideoFrame::rgb_len(width, height) as u64;
        let frame_total = len / frame_len;
        if len % frame_len != 0 {
            log::warn!(
                "raw video {} has {} trailing bytes, ignoring the partial frame",
                path.display(),
                len % frame_len
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            width,
            height,
            fps,
            frame_total,
            frame_count: 0,
        })
    }

    pub fn frame_total(&self) -> u64 {
        self.frame_total
    }
}

impl FrameReader for RawVideoReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn duration(&self) -> f64 {
        self.frame_total as f64 / self.fps
    }

    fn read_frame(&mut self) -> anyhow::Result<Option<VideoFrame>> {
        if self.frame_count >= self.frame_total {
            return Ok(None);
        }

        let mut data = vec![0u8; VideoFrame::rgb_len(self.width, self.height)];
        match self.reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "read frame {} of {}: {}",
                    self.frame_count,
                    self.path.display(),
                    e
                ));
            }
        }

        let timestamp = self.frame_count as f64 / self.fps;
        self.frame_count += 1;
        Ok(Some(VideoFrame::new(data, self.width, self.height, timestamp)))
    }
}
