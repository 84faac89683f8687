//! Mock collaborators shared by the pipeline, recording and bus tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    artifact::{Artifact, ArtifactSink},
    compositor::Compositor,
    frame::{FrameCmd, FrameReceiver, FrameSender, VideoFrame},
    model::PoseModel,
    registry::ModelRegistry,
    source::FrameSource,
    types::{Color, Keypoint2D, ModelDescriptor, PoseEstimate},
};

/// Ordered record of collaborator calls, e.g. `load:modelA`.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

pub struct MockSource {
    current: Mutex<Option<Arc<VideoFrame>>>,
    position: Mutex<f64>,
    duration: f64,
    frames: FrameSender,
    sequence: Mutex<u64>,
}

impl MockSource {
    pub fn new(duration: f64) -> Arc<Self> {
        let (frames, _) = tokio::sync::broadcast::channel(64);
        Arc::new(Self {
            current: Mutex::new(None),
            position: Mutex::new(0.0),
            duration,
            frames,
            sequence: Mutex::new(0),
        })
    }

    pub fn live() -> Arc<Self> {
        Self::new(f64::INFINITY)
    }

    /// Publishes a 4x4 frame at `timestamp`.
    pub fn push(&self, timestamp: f64) {
        let mut sequence = self.sequence.lock().unwrap();
        let frame = Arc::new(VideoFrame::filled(4, 4, [50, 60, 70], timestamp).with_sequence(*sequence));
        *sequence += 1;
        *self.current.lock().unwrap() = Some(Arc::clone(&frame));
        *self.position.lock().unwrap() = timestamp;
        let _ = self.frames.send(FrameCmd::Data(frame));
    }

    /// Moves playback to the end and signals end of stream.
    pub fn finish(&self) {
        *self.position.lock().unwrap() = self.duration;
        let _ = self.frames.send(FrameCmd::EOF);
    }
}

impl FrameSource for MockSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.current.lock().unwrap().clone()
    }

    fn position(&self) -> f64 {
        *self.position.lock().unwrap()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn subscribe(&self) -> FrameReceiver {
        self.frames.subscribe()
    }
}

#[derive(Clone, Default)]
pub struct MockBehavior {
    pub fail_load: bool,
    pub fail_inference: bool,
    pub inference_delay: Option<Duration>,
    pub estimates: usize,
}

pub struct MockModel {
    id: String,
    events: EventLog,
    behavior: MockBehavior,
}

impl MockModel {
    pub fn new(id: &str, events: &EventLog, behavior: MockBehavior) -> Self {
        Self {
            id: id.to_string(),
            events: events.clone(),
            behavior,
        }
    }
}

#[async_trait]
impl PoseModel for MockModel {
    async fn load(&mut self) -> anyhow::Result<()> {
        self.events.push(format!("load:{}", self.id));
        if self.behavior.fail_load {
            anyhow::bail!("{} weights unavailable", self.id);
        }
        Ok(())
    }

    async fn run_inference(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<PoseEstimate>> {
        self.events.push(format!("infer:{}@{}", self.id, frame.sequence));
        if let Some(delay) = self.behavior.inference_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_inference {
            anyhow::bail!("{} backend lost", self.id);
        }
        Ok((0..self.behavior.estimates)
            .map(|i| PoseEstimate::new(Some(0.9), vec![Keypoint2D::new(1.0 + i as f64, 1.0, 0.8)]))
            .collect())
    }

    fn dispose(&mut self) {
        self.events.push(format!("dispose:{}", self.id));
    }
}

/// Registry of mock models. Each entry is `(id, behavior)`, drawn in a
/// distinct color.
pub fn mock_registry(events: &EventLog, models: &[(&str, MockBehavior)]) -> Arc<ModelRegistry> {
    let mut builder = ModelRegistry::builder();
    for (i, (id, behavior)) in models.iter().enumerate() {
        let (id, behavior, events) = (id.to_string(), behavior.clone(), events.clone());
        let descriptor = ModelDescriptor::new(&id, id.to_uppercase(), Color::rgb(i as u8 * 10, 0, 0));
        builder = builder.register(descriptor, move || {
            Box::new(MockModel::new(&id, &events, behavior.clone())) as Box<dyn PoseModel>
        });
    }
    Arc::new(builder.build())
}

/// Records `begin`, `render:<color>:<n>` and `finish` calls.
pub struct MockCompositor {
    pub events: EventLog,
}

impl Compositor for MockCompositor {
    fn begin_frame(&mut self, width: u32, height: u32) {
        self.events.push(format!("begin:{}x{}", width, height));
    }

    fn render(&mut self, estimates: &[PoseEstimate], color: Color, _min_confidence: f64) {
        self.events.push(format!("render:{}:{}", color, estimates.len()));
    }

    fn finish_frame(&mut self) {
        self.events.push("finish");
    }
}

/// Keeps saved artifacts in memory, or rejects every save when `fail_all`.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub saved: Arc<Mutex<Vec<Artifact>>>,
    pub fail_all: bool,
}

impl MemorySink {
    pub fn saved(&self) -> Vec<Artifact> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn save(&self, artifact: Artifact) -> anyhow::Result<()> {
        if self.fail_all {
            anyhow::bail!("disk full");
        }
        self.saved.lock().unwrap().push(artifact);
        Ok(())
    }
}
