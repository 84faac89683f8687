use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    InferenceLog,
    Media,
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::InferenceLog => write!(f, "inference log"),
            ArtifactKind::Media => write!(f, "media"),
        }
    }
}

/// A finished export, handed to an [`ArtifactSink`] exactly once.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Bytes,
}

impl Artifact {
    pub fn inference_log(stamp: &str, data: Bytes) -> Self {
        Self {
            kind: ArtifactKind::InferenceLog,
            file_name: format!("inference_data_{}.json", stamp),
            content_type: "application/json",
            data,
        }
    }

    pub fn media(stamp: &str, extension: &str, content_type: &'static str, data: Bytes) -> Self {
        Self {
            kind: ArtifactKind::Media,
            file_name: format!("recorded_video_{}.{}", stamp, extension),
            content_type,
            data,
        }
    }
}

/// File-name stamp shared by the artifacts of one export.
pub fn artifact_stamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H-%M-%S-%3f")
        .to_string()
}

/// Save/download capability for finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn save(&self, artifact: Artifact) -> anyhow::Result<()>;
}

/// Writes every artifact into one directory, created on first use.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&self, artifact: Artifact) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            anyhow::anyhow!("create output dir {}: {}", self.dir.display(), e)
        })?;
        let path = self.dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.data)
            .await
            .map_err(|e| anyhow::anyhow!("write {}: {}", path.display(), e))?;
        log::info!(
            "saved {} artifact {} ({} bytes)",
            artifact.kind,
            path.display(),
            artifact.data.len()
        );
        Ok(())
    }
}
