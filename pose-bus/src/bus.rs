use std::{pin::Pin, sync::Arc};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast::error::RecvError, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{PipelineError, PipelineResult},
    frame::FrameCmd,
    pipeline::{InferencePipeline, ModelStatus, ReconcileReport, StepOutcome},
    recording::{RecordingSession, StopReport},
    throughput::{THROUGHPUT_WINDOW, ThroughputSample},
};

pub type PipelineEventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Throughput(ThroughputSample),
    /// Models skipped for one frame.
    FrameErrors {
        frame_index: u64,
        errors: Arc<Vec<PipelineError>>,
    },
    Reconciled(Arc<ReconcileReport>),
    EndOfStream {
        /// Inference log exported when playback ended outside a recording.
        log_file: Option<String>,
    },
    RecordingFinished(Arc<StopReport>),
}

#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub models: Vec<ModelStatus>,
    pub recording: bool,
    pub logged_frames: usize,
    pub next_frame_index: u64,
    pub throughput: Option<ThroughputSample>,
    pub end_of_stream: bool,
}

enum BusCommand {
    SetActiveModels {
        ids: Vec<String>,
        result: oneshot::Sender<PipelineResult<Arc<ReconcileReport>>>,
    },
    StartRecording {
        result: oneshot::Sender<PipelineResult<()>>,
    },
    StopRecording {
        result: oneshot::Sender<PipelineResult<Arc<StopReport>>>,
    },
    ResetLog {
        result: oneshot::Sender<PipelineResult<()>>,
    },
    ExportLog {
        result: oneshot::Sender<PipelineResult<String>>,
    },
    Status {
        result: oneshot::Sender<PipelineStatus>,
    },
    Shutdown {
        result: oneshot::Sender<Option<Arc<StopReport>>>,
    },
}

struct BusState {
    pipeline: InferencePipeline,
    recording: RecordingSession,
    events: tokio::sync::broadcast::Sender<PipelineEvent>,
    end_of_stream: bool,
}

/// Drives one [`InferencePipeline`] and its [`RecordingSession`].
///
/// A single task owns both and handles commands, frame arrivals and the
/// throughput tick in turn, so steps never overlap and the log needs no lock.
pub struct PipelineBus {
    cancel: CancellationToken,
    tx: mpsc::Sender<BusCommand>,
    events: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl PipelineBus {
    pub fn new(pipeline: InferencePipeline, recording: RecordingSession) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let (events, _) = tokio::sync::broadcast::channel(256);

        let state = BusState {
            pipeline,
            recording,
            events: events.clone(),
            end_of_stream: false,
        };
        let cancel_clone = cancel.clone();
        tokio::spawn(async move { Self::inner_loop(cancel_clone, rx, state).await });

        Self { cancel, tx, events }
    }

    async fn inner_loop(
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<BusCommand>,
        mut state: BusState,
    ) {
        let mut frames = state.pipeline.source().subscribe();
        let mut ticker = tokio::time::interval(THROUGHPUT_WINDOW);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    state.finalize().await;
                    break;
                },
                cmd = rx.recv() => match cmd {
                    Some(cmd) => {
                        if !state.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        state.finalize().await;
                        break;
                    }
                },
                frame = frames.recv(), if !state.end_of_stream => match frame {
                    Ok(FrameCmd::Data(_)) => state.step().await,
                    Err(RecvError::Lagged(n)) => {
                        log::debug!("driver skipped {} frame notifications", n);
                        state.step().await;
                    }
                    Ok(FrameCmd::EOF) | Err(RecvError::Closed) => {
                        // the last frame may have arrived right before EOF
                        state.step().await;
                        state.end_of_stream().await;
                    }
                },
                _ = ticker.tick() => {
                    let sample = state.pipeline.compute_throughput();
                    log::trace!("throughput {:.1} fps", sample.fps);
                    let _ = state.events.send(PipelineEvent::Throughput(sample));
                },
            }
        }
        log::info!("pipeline bus stopped");
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BusCommand,
    ) -> PipelineResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| PipelineError::BusClosed)?;
        rx.await.map_err(|_| PipelineError::BusClosed)
    }

    pub async fn set_active_models(&self, ids: Vec<String>) -> PipelineResult<Arc<ReconcileReport>> {
        self.request(|result| BusCommand::SetActiveModels { ids, result })
            .await?
    }

    pub async fn start_recording(&self) -> PipelineResult<()> {
        self.request(|result| BusCommand::StartRecording { result })
            .await?
    }

    pub async fn stop_recording(&self) -> PipelineResult<Arc<StopReport>> {
        self.request(|result| BusCommand::StopRecording { result })
            .await?
    }

    /// Rejected with `AlreadyRecording` while a recording owns the log.
    pub async fn reset_log(&self) -> PipelineResult<()> {
        self.request(|result| BusCommand::ResetLog { result })
            .await?
    }

    pub async fn export_log(&self) -> PipelineResult<String> {
        self.request(|result| BusCommand::ExportLog { result })
            .await?
    }

    pub async fn status(&self) -> PipelineResult<PipelineStatus> {
        self.request(|result| BusCommand::Status { result }).await
    }

    /// Every event published after the call. Slow subscribers miss events
    /// rather than block the driver.
    pub fn subscribe(&self) -> PipelineEventStream {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Finalizes an active recording, disposes every model and stops the
    /// driver. Returns the report of the recording it finalized, if any.
    pub async fn shutdown(&self) -> PipelineResult<Option<Arc<StopReport>>> {
        let report = self.request(|result| BusCommand::Shutdown { result }).await;
        self.cancel.cancel();
        report
    }
}

impl Drop for PipelineBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl BusState {
    /// Returns false once the driver should stop.
    async fn handle_command(&mut self, cmd: BusCommand) -> bool {
        match cmd {
            BusCommand::SetActiveModels { ids, result } => {
                let report = self.pipeline.set_active_models(&ids).await.map(Arc::new);
                if let Ok(report) = &report {
                    let _ = self.events.send(PipelineEvent::Reconciled(Arc::clone(report)));
                }
                let _ = result.send(report);
            }
            BusCommand::StartRecording { result } => {
                let _ = result.send(self.recording.start(&mut self.pipeline));
            }
            BusCommand::StopRecording { result } => {
                let report = self.recording.stop(&mut self.pipeline).await.map(Arc::new);
                if let Ok(report) = &report {
                    let _ = self
                        .events
                        .send(PipelineEvent::RecordingFinished(Arc::clone(report)));
                }
                let _ = result.send(report);
            }
            BusCommand::ResetLog { result } => {
                if self.recording.is_recording() {
                    let _ = result.send(Err(PipelineError::AlreadyRecording));
                } else {
                    self.pipeline.reset_log();
                    let _ = result.send(Ok(()));
                }
            }
            BusCommand::ExportLog { result } => {
                let _ = result.send(self.recording.export_log(self.pipeline.log()).await);
            }
            BusCommand::Status { result } => {
                let _ = result.send(self.status());
            }
            BusCommand::Shutdown { result } => {
                let _ = result.send(self.finalize().await);
                return false;
            }
        }
        true
    }

    fn status(&self) -> PipelineStatus {
        PipelineStatus {
            models: self.pipeline.model_status(),
            recording: self.recording.is_recording(),
            logged_frames: self.pipeline.log().len(),
            next_frame_index: self.pipeline.log().next_frame_index(),
            throughput: self.pipeline.last_throughput(),
            end_of_stream: self.end_of_stream,
        }
    }

    async fn step(&mut self) {
        match self.pipeline.step().await {
            StepOutcome::Processed(report) => {
                if !report.errors.is_empty() {
                    let _ = self.events.send(PipelineEvent::FrameErrors {
                        frame_index: report.frame_index,
                        errors: Arc::new(report.errors),
                    });
                }
            }
            StepOutcome::EndOfStream => self.end_of_stream().await,
            StepOutcome::NotReady | StepOutcome::Halted => {}
        }
    }

    /// Stops stepping and exports what was collected. Models stay loaded.
    async fn end_of_stream(&mut self) {
        if self.end_of_stream {
            return;
        }
        self.end_of_stream = true;
        log::info!(
            "end of stream after {} logged frames",
            self.pipeline.log().len()
        );

        let mut log_file = None;
        if self.recording.is_recording() {
            if let Ok(report) = self.recording.stop(&mut self.pipeline).await {
                let _ = self
                    .events
                    .send(PipelineEvent::RecordingFinished(Arc::new(report)));
            }
        } else if !self.pipeline.log().is_empty() {
            match self.recording.export_log(self.pipeline.log()).await {
                Ok(file) => log_file = Some(file),
                Err(e) => log::error!("end of stream log export failed: {}", e),
            }
        }
        let _ = self.events.send(PipelineEvent::EndOfStream { log_file });
    }

    /// Stops an active recording and shuts the pipeline down.
    async fn finalize(&mut self) -> Option<Arc<StopReport>> {
        let mut finished = None;
        if self.recording.is_recording() {
            match self.recording.stop(&mut self.pipeline).await {
                Ok(report) => {
                    let report = Arc::new(report);
                    let _ = self
                        .events
                        .send(PipelineEvent::RecordingFinished(Arc::clone(&report)));
                    finished = Some(report);
                }
                Err(e) => log::error!("finalize recording: {}", e),
            }
        }
        self.pipeline.shutdown();
        finished
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod bus_test;
