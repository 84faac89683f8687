//! Inference log: one group of records per processed frame.
//!
//! The serialized form is a JSON array of frame groups, each an array of
//! records, which is what the offline analysis tooling reads:
//!
//! ```text
//! [
//!   [ { "timeStamp": 0.0, "frameIdx": 0, "modelId": "movenet", "poseData": [...] },
//!     { "timeStamp": 0.0, "frameIdx": 0, "modelId": "posenet", "poseData": [...] } ],
//!   [ ... frame 1 ... ]
//! ]
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::PoseEstimate;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameInferenceRecord {
    #[serde(rename = "timeStamp")]
    pub timestamp: f64,
    #[serde(rename = "frameIdx")]
    pub frame_index: u64,
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "poseData")]
    pub estimates: Vec<PoseEstimate>,
}

pub type FrameGroup = Vec<FrameInferenceRecord>;

#[derive(Clone, Debug, Default)]
pub struct InferenceLog {
    groups: Vec<FrameGroup>,
    next_frame_index: u64,
}

impl InferenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended group will carry.
    pub fn next_frame_index(&self) -> u64 {
        self.next_frame_index
    }

    /// Appends one frame group and advances the frame index.
    pub fn append(&mut self, group: FrameGroup) -> u64 {
        let index = self.next_frame_index;
        debug_assert!(group.iter().all(|r| r.frame_index == index));
        self.groups.push(group);
        self.next_frame_index += 1;
        index
    }

    /// Drops every group and restarts frame numbering at zero.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.next_frame_index = 0;
    }

    pub fn groups(&self) -> &[FrameGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &FrameInferenceRecord> {
        self.groups.iter().flatten()
    }

    pub fn to_json(&self, pretty: bool) -> serde_json::Result<Bytes> {
        let data = if pretty {
            serde_json::to_vec_pretty(&self.groups)?
        } else {
            serde_json::to_vec(&self.groups)?
        };
        Ok(Bytes::from(data))
    }

    /// Parses an exported log. Frame numbering continues after the last group.
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        let groups: Vec<FrameGroup> = serde_json::from_slice(data)?;
        let next_frame_index = groups
            .iter()
            .flatten()
            .map(|r| r.frame_index + 1)
            .max()
            .unwrap_or(groups.len() as u64);
        Ok(Self {
            groups,
            next_frame_index,
        })
    }

    /// Estimates of `model_id` recorded closest to `timestamp`, with the
    /// distance between the two timestamps.
    pub fn nearest(&self, model_id: &str, timestamp: f64) -> Option<(f64, &[PoseEstimate])> {
        self.records()
            .filter(|r| r.model_id == model_id)
            .map(|r| ((r.timestamp - timestamp).abs(), r.estimates.as_slice()))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}
