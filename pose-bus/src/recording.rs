use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::{
    sync::broadcast::error::RecvError,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    artifact::{Artifact, ArtifactKind, ArtifactSink, artifact_stamp},
    error::{PipelineError, PipelineResult},
    frame::{FrameCmd, FrameReceiver, VideoFrame},
    inference_log::InferenceLog,
    pipeline::InferencePipeline,
};

/// Finished media blob.
pub struct EncodedMedia {
    pub data: Bytes,
    pub extension: &'static str,
    pub content_type: &'static str,
}

/// Turns captured frames into one media blob.
pub trait MediaEncoder: Send {
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<()>;

    fn finish(self: Box<Self>) -> anyhow::Result<EncodedMedia>;
}

pub type MediaEncoderFactory = Arc<dyn Fn() -> Box<dyn MediaEncoder> + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mjpeg,
    RawVideo,
}

impl MediaFormat {
    pub fn encoder_factory(self, jpeg_quality: u8) -> MediaEncoderFactory {
        match self {
            MediaFormat::Mjpeg => {
                Arc::new(move || Box::new(MjpegEncoder::new(jpeg_quality)) as Box<dyn MediaEncoder>)
            }
            MediaFormat::RawVideo => {
                Arc::new(|| Box::new(RawVideoEncoder::default()) as Box<dyn MediaEncoder>)
            }
        }
    }
}

/// Motion JPEG: every frame encoded on its own and concatenated.
pub struct MjpegEncoder {
    quality: u8,
    data: Vec<u8>,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            data: Vec::new(),
        }
    }
}

impl MediaEncoder for MjpegEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<()> {
        if !frame.is_decoded() {
            anyhow::bail!("cannot encode incomplete {}", frame);
        }
        let width = u16::try_from(frame.width)
            .map_err(|_| anyhow::anyhow!("frame width {} too large for jpeg", frame.width))?;
        let height = u16::try_from(frame.height)
            .map_err(|_| anyhow::anyhow!("frame height {} too large for jpeg", frame.height))?;
        let pixels = &frame.data[..VideoFrame::rgb_len(frame.width, frame.height)];
        jpeg_encoder::Encoder::new(&mut self.data, self.quality)
            .encode(pixels, width, height, jpeg_encoder::ColorType::Rgb)
            .map_err(|e| anyhow::anyhow!("jpeg encode {}: {}", frame, e))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> anyhow::Result<EncodedMedia> {
        Ok(EncodedMedia {
            data: Bytes::from(self.data),
            extension: "mjpeg",
            content_type: "video/x-motion-jpeg",
        })
    }
}

/// Headerless RGB24, readable by the raw video source. All frames must share
/// one size.
#[derive(Default)]
pub struct RawVideoEncoder {
    size: Option<(u32, u32)>,
    data: Vec<u8>,
}

impl MediaEncoder for RawVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame) -> anyhow::Result<()> {
        if !frame.is_decoded() {
            anyhow::bail!("cannot encode incomplete {}", frame);
        }
        let size = *self.size.get_or_insert((frame.width, frame.height));
        if size != (frame.width, frame.height) {
            anyhow::bail!(
                "frame size changed from {}x{} to {}x{}",
                size.0,
                size.1,
                frame.width,
                frame.height
            );
        }
        self.data
            .extend_from_slice(&frame.data[..VideoFrame::rgb_len(frame.width, frame.height)]);
        Ok(())
    }

    fn finish(self: Box<Self>) -> anyhow::Result<EncodedMedia> {
        Ok(EncodedMedia {
            data: Bytes::from(self.data),
            extension: "rgb",
            content_type: "application/octet-stream",
        })
    }
}

pub trait LogEncoder: Send + Sync {
    fn encode(&self, inference_log: &InferenceLog) -> anyhow::Result<Bytes>;
}

pub struct JsonLogEncoder {
    pub pretty: bool,
}

impl Default for JsonLogEncoder {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl LogEncoder for JsonLogEncoder {
    fn encode(&self, inference_log: &InferenceLog) -> anyhow::Result<Bytes> {
        Ok(inference_log.to_json(self.pretty)?)
    }
}

struct CaptureOutcome {
    encoder: Box<dyn MediaEncoder>,
    frames: u64,
    error: Option<anyhow::Error>,
}

/// Buffers frames from the source stream until cancelled. Encoding runs on a
/// blocking thread fed by the stream.
struct CaptureTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<CaptureOutcome, JoinError>>,
}

impl CaptureTask {
    fn start(rx: FrameReceiver, encoder: Box<dyn MediaEncoder>) -> Self {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { Self::capture_loop(cancel_clone, rx, encoder).await });
        Self { cancel, handle }
    }

    async fn capture_loop(
        cancel: CancellationToken,
        mut rx: FrameReceiver,
        encoder: Box<dyn MediaEncoder>,
    ) -> Result<CaptureOutcome, JoinError> {
        let (frame_tx, frame_rx) = std::sync::mpsc::channel::<Arc<VideoFrame>>();
        let handle = tokio::task::spawn_blocking(move || Self::encode_loop(encoder, frame_rx));

        let mut forwarded = 0u64;
        let mut ended = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                cmd = rx.recv(), if !ended => match cmd {
                    Ok(FrameCmd::Data(frame)) => {
                        forwarded += 1;
                        let _ = frame_tx.send(frame);
                    }
                    Ok(FrameCmd::EOF) | Err(RecvError::Closed) => {
                        log::debug!("capture: source ended after {} frames", forwarded);
                        ended = true;
                    }
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("capture: dropped {} frames", n);
                    }
                },
            }
        }

        // frames published before stop still belong to the recording
        while let Ok(cmd) = rx.try_recv() {
            if let FrameCmd::Data(frame) = cmd {
                let _ = frame_tx.send(frame);
            }
        }
        drop(frame_tx);
        handle.await
    }

    fn encode_loop(
        encoder: Box<dyn MediaEncoder>,
        frames: std::sync::mpsc::Receiver<Arc<VideoFrame>>,
    ) -> CaptureOutcome {
        let mut outcome = CaptureOutcome {
            encoder,
            frames: 0,
            error: None,
        };
        for frame in frames {
            outcome.push(&frame);
        }
        outcome
    }

    async fn finish(self) -> PipelineResult<CaptureOutcome> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) | Err(e) => Err(PipelineError::Media(anyhow::anyhow!(
                "capture task failed: {}",
                e
            ))),
        }
    }
}

impl CaptureOutcome {
    fn push(&mut self, frame: &VideoFrame) {
        if self.error.is_some() {
            return;
        }
        match self.encoder.encode(frame) {
            Ok(()) => self.frames += 1,
            Err(e) => {
                log::error!("capture: {:#}, no more frames will be recorded", e);
                self.error = Some(e);
            }
        }
    }
}

/// Results of one `stop`. The two artifacts succeed or fail independently.
#[derive(Debug)]
pub struct StopReport {
    pub frames: u64,
    /// File name of the saved media artifact.
    pub media: PipelineResult<String>,
    /// File name of the saved inference log.
    pub log: PipelineResult<String>,
}

/// `Idle -> Recording -> Idle`. Owns the raw capture while recording.
pub struct RecordingSession {
    sink: Arc<dyn ArtifactSink>,
    media_encoder: MediaEncoderFactory,
    log_encoder: Box<dyn LogEncoder>,
    active: Option<CaptureTask>,
}

impl RecordingSession {
    pub fn new(sink: Arc<dyn ArtifactSink>, media_encoder: MediaEncoderFactory) -> Self {
        Self {
            sink,
            media_encoder,
            log_encoder: Box::new(JsonLogEncoder::default()),
            active: None,
        }
    }

    pub fn with_log_encoder(mut self, log_encoder: Box<dyn LogEncoder>) -> Self {
        self.log_encoder = log_encoder;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Resets the pipeline log and starts capturing the source stream. Until
    /// `stop`, selection changes keep appending to the same log.
    pub fn start(&mut self, pipeline: &mut InferencePipeline) -> PipelineResult<()> {
        if self.active.is_some() {
            return Err(PipelineError::AlreadyRecording);
        }
        pipeline.reset_log();
        pipeline.retain_log(true);
        let rx = pipeline.source().subscribe();
        self.active = Some(CaptureTask::start(rx, (self.media_encoder)()));
        log::info!("recording started");
        Ok(())
    }

    /// Finalizes the capture and exports it together with the pipeline log
    /// collected since `start`.
    pub async fn stop(&mut self, pipeline: &mut InferencePipeline) -> PipelineResult<StopReport> {
        let capture = self.active.take().ok_or(PipelineError::NotRecording)?;
        pipeline.retain_log(false);
        let stamp = artifact_stamp();

        let (frames, media) = match capture.finish().await {
            Ok(outcome) => (outcome.frames, self.save_media(&stamp, outcome).await),
            Err(e) => (0, Err(e)),
        };
        let log_result = self.save_log(&stamp, pipeline.log()).await;

        match (&media, &log_result) {
            (Ok(media_file), Ok(log_file)) => {
                log::info!(
                    "recording stopped: {} frames in {}, log {}",
                    frames,
                    media_file,
                    log_file
                );
            }
            _ => {
                if let Err(e) = &media {
                    log::error!("recording stopped, media lost: {}", e);
                }
                if let Err(e) = &log_result {
                    log::error!("recording stopped, log lost: {}", e);
                }
            }
        }
        Ok(StopReport {
            frames,
            media,
            log: log_result,
        })
    }

    /// Saves the log on its own, outside a recording.
    pub async fn export_log(&self, inference_log: &InferenceLog) -> PipelineResult<String> {
        self.save_log(&artifact_stamp(), inference_log).await
    }

    async fn save_media(&self, stamp: &str, outcome: CaptureOutcome) -> PipelineResult<String> {
        if let Some(e) = outcome.error {
            return Err(PipelineError::Media(e));
        }
        let media = outcome.encoder.finish().map_err(PipelineError::Media)?;
        let artifact = Artifact::media(stamp, media.extension, media.content_type, media.data);
        self.persist(artifact).await
    }

    async fn save_log(&self, stamp: &str, inference_log: &InferenceLog) -> PipelineResult<String> {
        let data = self
            .log_encoder
            .encode(inference_log)
            .map_err(|error| PipelineError::Serialization {
                kind: ArtifactKind::InferenceLog,
                error,
            })?;
        self.persist(Artifact::inference_log(stamp, data)).await
    }

    async fn persist(&self, artifact: Artifact) -> PipelineResult<String> {
        let (kind, file_name) = (artifact.kind, artifact.file_name.clone());
        self.sink
            .save(artifact)
            .await
            .map_err(|error| PipelineError::Persist { kind, error })?;
        Ok(file_name)
    }
}

#[cfg(test)]
#[path = "recording_test.rs"]
mod recording_test;
