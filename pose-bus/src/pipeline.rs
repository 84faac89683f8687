use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::{
    compositor::Compositor,
    error::{PipelineError, PipelineResult},
    inference_log::{FrameInferenceRecord, InferenceLog},
    model::{ModelHandle, ModelState},
    registry::ModelRegistry,
    source::FrameSource,
    throughput::{ThroughputMeter, ThroughputSample},
};

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Keypoints below this confidence are not drawn.
    pub min_confidence: f64,
    /// Per-model bound on one inference call. `None` waits indefinitely.
    pub inference_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.1,
            inference_timeout: None,
        }
    }
}

/// Outcome of one `set_active_models` call.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// The requested set matched the previous one; nothing was loaded or disposed.
    pub unchanged: bool,
    pub loaded: Vec<String>,
    pub disposed: Vec<String>,
    pub failed: Vec<PipelineError>,
    /// Ids missing from the registry, dropped.
    pub unknown: Vec<String>,
    /// Ready models after reconciliation, in draw order.
    pub active: Vec<String>,
}

#[derive(Debug)]
pub struct StepReport {
    pub frame_index: u64,
    pub timestamp: f64,
    pub records: usize,
    /// Models skipped for this frame.
    pub errors: Vec<PipelineError>,
}

#[derive(Debug)]
pub enum StepOutcome {
    Processed(StepReport),
    /// No decoded frame with positive dimensions yet.
    NotReady,
    EndOfStream,
    Halted,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub display_name: String,
    pub state: ModelState,
    pub generation: u64,
}

/// Owns the active model set, the inference log and throughput accounting.
///
/// All mutation goes through `&mut self`, so steps never overlap each other or
/// a reconciliation, and no lock guards the log.
pub struct InferencePipeline {
    registry: Arc<ModelRegistry>,
    source: Arc<dyn FrameSource>,
    compositor: Box<dyn Compositor>,
    options: PipelineOptions,
    /// Draw order.
    handles: Vec<ModelHandle>,
    requested: Option<Vec<String>>,
    next_generation: u64,
    log: InferenceLog,
    /// Set while a recording owns the log; selection changes then keep it.
    log_retained: bool,
    /// Sequence of the last frame stepped.
    last_sequence: Option<u64>,
    throughput: ThroughputMeter,
    halted: bool,
}

impl InferencePipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        source: Arc<dyn FrameSource>,
        compositor: Box<dyn Compositor>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            source,
            compositor,
            options,
            handles: Vec::new(),
            requested: None,
            next_generation: 1,
            log: InferenceLog::new(),
            log_retained: false,
            last_sequence: None,
            throughput: ThroughputMeter::new(),
            halted: false,
        }
    }

    /// Reconciles the loaded models with `ids`.
    ///
    /// Models that left the set are disposed before any new model starts
    /// loading; new models load concurrently and the call returns once each
    /// is ready or dropped. Repeating the previous set (in any order) loads
    /// and disposes nothing, so a failed model is only retried by a request
    /// that differs from the last one.
    ///
    /// A changed set starts a new log, unless the log is retained for a
    /// recording.
    pub async fn set_active_models<S: AsRef<str>>(
        &mut self,
        ids: &[S],
    ) -> PipelineResult<ReconcileReport> {
        if self.halted {
            return Err(PipelineError::ShutDown);
        }

        let mut report = ReconcileReport::default();
        let mut desired: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids.iter().map(AsRef::as_ref) {
            if desired.iter().any(|d| d == id) {
                continue;
            }
            if self.registry.contains(id) {
                desired.push(id.to_string());
            } else {
                log::warn!("ignoring unknown model id {}", id);
                report.unknown.push(id.to_string());
            }
        }

        if self.requested.as_ref().is_some_and(|r| same_set(r, &desired)) {
            self.order_handles(&desired);
            self.requested = Some(desired);
            report.unchanged = true;
            report.active = self.active_ids();
            return Ok(report);
        }

        // dispose R \ D first
        let mut kept = Vec::with_capacity(self.handles.len());
        for mut handle in self.handles.drain(..) {
            if desired.iter().any(|d| d == handle.id()) {
                kept.push(handle);
            } else {
                handle.dispose();
                report.disposed.push(handle.id().to_string());
            }
        }

        // then load D \ R concurrently
        let mut loading = Vec::new();
        for id in &desired {
            if kept.iter().any(|h| h.id() == id) {
                continue;
            }
            if let Some(handle) = self.registry.create(id, self.next_generation) {
                self.next_generation += 1;
                loading.push(handle);
            }
        }
        let results = join_all(loading.iter_mut().map(|h| h.load())).await;
        for (handle, result) in loading.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    report.loaded.push(handle.id().to_string());
                    kept.push(handle);
                }
                Err(e) => {
                    log::error!("dropping model: {}", e);
                    report.failed.push(e);
                }
            }
        }

        self.handles = kept;
        self.order_handles(&desired);
        self.requested = Some(desired);
        if !self.log_retained {
            self.log.clear();
        }

        report.active = self.active_ids();
        log::info!(
            "active models [{}], loaded {:?}, disposed {:?}, failed {}",
            report.active.join(", "),
            report.loaded,
            report.disposed,
            report.failed.len()
        );
        Ok(report)
    }

    fn order_handles(&mut self, desired: &[String]) {
        self.handles.sort_by_key(|h| {
            desired
                .iter()
                .position(|d| d == h.id())
                .unwrap_or(usize::MAX)
        });
    }

    /// Runs every ready model on the current frame and appends one group to the
    /// log. Each frame is stepped once; the last frame of a file is still
    /// stepped after playback reached its end.
    pub async fn step(&mut self) -> StepOutcome {
        if self.halted {
            return StepOutcome::Halted;
        }
        let frame = self
            .source
            .current_frame()
            .filter(|f| f.is_decoded() && self.last_sequence != Some(f.sequence));
        let Some(frame) = frame else {
            if self.source.is_end_of_stream() {
                return StepOutcome::EndOfStream;
            }
            return StepOutcome::NotReady;
        };
        self.last_sequence = Some(frame.sequence);

        let frame_index = self.log.next_frame_index();
        let timeout = self.options.inference_timeout;
        let results = join_all(
            self.handles
                .iter_mut()
                .map(|h| h.run_inference(&frame, timeout)),
        )
        .await;

        let mut group = Vec::with_capacity(self.handles.len());
        let mut errors = Vec::new();
        self.compositor.begin_frame(frame.width, frame.height);
        for (handle, result) in self.handles.iter().zip(results) {
            match result {
                Ok(estimates) => {
                    self.compositor.render(
                        &estimates,
                        handle.descriptor().overlay_color,
                        self.options.min_confidence,
                    );
                    group.push(FrameInferenceRecord {
                        timestamp: frame.timestamp,
                        frame_index,
                        model_id: handle.id().to_string(),
                        estimates,
                    });
                }
                Err(e) => {
                    log::warn!("frame {}: {}", frame_index, e);
                    errors.push(e);
                }
            }
        }
        self.compositor.finish_frame();

        let records = group.len();
        self.log.append(group);
        self.throughput.record_frame();

        StepOutcome::Processed(StepReport {
            frame_index,
            timestamp: frame.timestamp,
            records,
            errors,
        })
    }

    /// Frames since the previous call over the elapsed time, then restarts the
    /// window.
    pub fn compute_throughput(&mut self) -> ThroughputSample {
        self.throughput.sample()
    }

    pub fn last_throughput(&self) -> Option<ThroughputSample> {
        self.throughput.last()
    }

    /// Clears the log and restarts frame numbering; models stay loaded.
    pub fn reset_log(&mut self) {
        log::debug!("inference log reset after {} frames", self.log.len());
        self.log.clear();
    }

    /// While retained, selection changes append to the log instead of
    /// clearing it. `reset_log` still clears it.
    pub fn retain_log(&mut self, retained: bool) {
        self.log_retained = retained;
    }

    pub fn is_log_retained(&self) -> bool {
        self.log_retained
    }

    /// Disposes every model and halts. Terminal.
    pub fn shutdown(&mut self) {
        if self.halted {
            return;
        }
        for mut handle in self.handles.drain(..) {
            handle.dispose();
        }
        self.requested = None;
        self.halted = true;
        log::info!("inference pipeline shut down");
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.source.is_end_of_stream()
    }

    pub fn log(&self) -> &InferenceLog {
        &self.log
    }

    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.id().to_string()).collect()
    }

    pub fn model_status(&self) -> Vec<ModelStatus> {
        self.handles
            .iter()
            .map(|h| ModelStatus {
                id: h.id().to_string(),
                display_name: h.descriptor().display_name.clone(),
                state: h.state(),
                generation: h.generation(),
            })
            .collect()
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
