use std::sync::Arc;

use futures::StreamExt;
use pose_bus::{
    artifact::DirectorySink,
    bus::{PipelineBus, PipelineEvent, PipelineEventStream},
    compositor::{OverlayCompositor, OverlayReceiver},
    model::{NoopModel, PoseModel},
    pipeline::InferencePipeline,
    recording::RecordingSession,
    registry::ModelRegistry,
    replay::ReplayModel,
    source::{FrameSource, PacedSource, raw_video::RawVideoReader, test_pattern::TestPatternReader},
    types::ModelDescriptor,
};
use tokio_util::sync::CancellationToken;

use crate::config::{ModelConfig, ModelKind, SandboxConfig, SourceConfig};

/// Everything the HTTP handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<PipelineBus>,
    pub registry: Arc<ModelRegistry>,
    pub overlay: OverlayReceiver,
    pub jpeg_quality: u8,
}

impl AppState {
    /// Builds the source, registry, pipeline and recording session and starts
    /// the driver with the initial selection.
    pub async fn start(config: &SandboxConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(build_registry(&config.models));
        let source = build_source(&config.source)?;
        let (compositor, overlay) = OverlayCompositor::new();

        let pipeline = InferencePipeline::new(
            Arc::clone(&registry),
            source,
            Box::new(compositor),
            config.pipeline.options(),
        );
        let recording = RecordingSession::new(
            Arc::new(DirectorySink::new(&config.recording.output_dir)),
            config
                .recording
                .format
                .encoder_factory(config.recording.jpeg_quality),
        );
        let bus = Arc::new(PipelineBus::new(pipeline, recording));

        if !config.initial_models.is_empty() {
            let report = bus.set_active_models(config.initial_models.clone()).await?;
            for e in &report.failed {
                log::warn!("initial model unavailable: {}", e);
            }
        }

        Ok(Self {
            bus,
            registry,
            overlay,
            jpeg_quality: config.recording.jpeg_quality,
        })
    }
}

pub fn build_registry(models: &[ModelConfig]) -> ModelRegistry {
    let mut builder = ModelRegistry::builder();
    for model in models {
        let descriptor = ModelDescriptor::new(&model.id, &model.name, model.color);
        builder = match &model.kind {
            ModelKind::None => {
                builder.register(descriptor, || Box::new(NoopModel) as Box<dyn PoseModel>)
            }
            ModelKind::Replay {
                log,
                source_model,
                max_gap_secs,
            } => {
                let (log, source_model, max_gap_secs) =
                    (log.clone(), source_model.clone(), *max_gap_secs);
                builder.register(descriptor, move || {
                    Box::new(
                        ReplayModel::new(log.clone(), source_model.clone())
                            .with_max_gap(max_gap_secs),
                    ) as Box<dyn PoseModel>
                })
            }
        };
    }
    builder.build()
}

pub fn build_source(config: &SourceConfig) -> anyhow::Result<Arc<dyn FrameSource>> {
    let source = match config {
        SourceConfig::TestPattern { width, height, fps } => {
            log::info!("source: test pattern {}x{} @ {} fps", width, height, fps);
            PacedSource::start(TestPatternReader::new(*width, *height, *fps))
        }
        SourceConfig::RawVideo {
            path,
            width,
            height,
            fps,
        } => {
            log::info!("source: raw video {}", path.display());
            PacedSource::start(RawVideoReader::open(path, *width, *height, *fps)?)
        }
        #[cfg(feature = "ffmpeg")]
        SourceConfig::Ffmpeg { path } => {
            log::info!("source: ffmpeg {}", path.display());
            PacedSource::start(pose_bus::source::ffmpeg::FfmpegReader::open(path)?)
        }
        #[cfg(not(feature = "ffmpeg"))]
        SourceConfig::Ffmpeg { path } => {
            anyhow::bail!(
                "cannot open {}: built without the ffmpeg feature",
                path.display()
            );
        }
    };
    Ok(Arc::new(source))
}

/// Logs pipeline events until cancelled.
pub fn spawn_event_logger(mut events: PipelineEventStream, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => log_event(&event),
                    None => break,
                },
            }
        }
    });
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Throughput(sample) => {
            log::debug!("throughput {:.1} fps ({} frames)", sample.fps, sample.frames)
        }
        PipelineEvent::FrameErrors {
            frame_index,
            errors,
        } => {
            for e in errors.iter() {
                log::warn!("frame {}: {}", frame_index, e);
            }
        }
        PipelineEvent::Reconciled(report) => {
            log::info!("selection now [{}]", report.active.join(", "))
        }
        PipelineEvent::EndOfStream { log_file } => match log_file {
            Some(file) => log::info!("end of stream, log saved as {}", file),
            None => log::info!("end of stream"),
        },
        PipelineEvent::RecordingFinished(report) => {
            log::info!("recording finished with {} frames", report.frames)
        }
    }
}
