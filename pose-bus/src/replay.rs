use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    frame::VideoFrame, inference_log::InferenceLog, model::PoseModel, types::PoseEstimate,
};

/// Default largest distance, in seconds, between a frame and the replayed
/// record before the record is considered unrelated.
pub const DEFAULT_MAX_GAP_SECS: f64 = 3.0;

/// Re-emits the estimates a model produced in an exported inference log,
/// matched to the incoming frame by nearest timestamp.
pub struct ReplayModel {
    path: PathBuf,
    source_model: String,
    max_gap_secs: f64,
    // (timestamp, estimates) of `source_model`, sorted by timestamp
    track: Option<Vec<(f64, Vec<PoseEstimate>)>>,
}

impl ReplayModel {
    pub fn new(path: impl Into<PathBuf>, source_model: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_model: source_model.into(),
            max_gap_secs: DEFAULT_MAX_GAP_SECS,
            track: None,
        }
    }

    pub fn with_max_gap(mut self, max_gap_secs: f64) -> Self {
        self.max_gap_secs = max_gap_secs;
        self
    }

    fn nearest(track: &[(f64, Vec<PoseEstimate>)], timestamp: f64) -> Option<(f64, &[PoseEstimate])> {
        let pos = track.partition_point(|(t, _)| *t < timestamp);
        let candidates = [pos.checked_sub(1), Some(pos)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| track.get(i))
            .map(|(t, estimates)| ((t - timestamp).abs(), estimates.as_slice()))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

#[async_trait]
impl PoseModel for ReplayModel {
    async fn load(&mut self) -> anyhow::Result<()> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| anyhow::anyhow!("read replay log {}: {}", self.path.display(), e))?;
        let log = InferenceLog::from_json(&data)
            .map_err(|e| anyhow::anyhow!("parse replay log {}: {}", self.path.display(), e))?;

        let mut track: Vec<(f64, Vec<PoseEstimate>)> = log
            .records()
            .filter(|r| r.model_id == self.source_model)
            .map(|r| (r.timestamp, r.estimates.clone()))
            .collect();
        if track.is_empty() {
            anyhow::bail!(
                "replay log {} has no records for model {}",
                self.path.display(),
                self.source_model
            );
        }
        track.sort_by(|a, b| a.0.total_cmp(&b.0));
        log::info!(
            "replay {}: {} records of {}",
            self.path.display(),
            track.len(),
            self.source_model
        );
        self.track = Some(track);
        Ok(())
    }

    async fn run_inference(&mut self, frame: &VideoFrame) -> anyhow::Result<Vec<PoseEstimate>> {
        let track = self
            .track
            .as_ref()
            .ok_or(anyhow::anyhow!("replay of {} not loaded", self.source_model))?;

        match Self::nearest(track, frame.timestamp) {
            Some((gap, estimates)) if gap <= self.max_gap_secs => Ok(estimates.to_vec()),
            Some((gap, _)) => {
                log::debug!(
                    "replay {}: nearest record is {:.3}s away from {:.3}s",
                    self.source_model,
                    gap,
                    frame.timestamp
                );
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn dispose(&mut self) {
        self.track = None;
    }
}
