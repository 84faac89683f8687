use std::path::{Path, PathBuf};
use std::time::Duration;

use pose_bus::{
    pipeline::PipelineOptions, recording::MediaFormat, replay::DEFAULT_MAX_GAP_SECS, types::Color,
};
use serde::Deserialize;

pub const CONFIG_ENV: &str = "POSE_SANDBOX_CONFIG";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub source: SourceConfig,
    /// Every model that can be selected.
    pub models: Vec<ModelConfig>,
    /// Selection applied at startup.
    pub initial_models: Vec<String>,
    pub pipeline: PipelineConfig,
    pub recording: RecordingConfig,
    pub api: ApiConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            models: vec![ModelConfig {
                id: "none".to_string(),
                name: "None".to_string(),
                color: Color::rgb(255, 255, 255),
                kind: ModelKind::None,
            }],
            initial_models: Vec::new(),
            pipeline: PipelineConfig::default(),
            recording: RecordingConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Reads the file named by the first argument or `POSE_SANDBOX_CONFIG`,
    /// built-in defaults when neither is set.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_ENV).ok());
        match path {
            Some(path) => Self::from_path(path),
            None => {
                log::info!("no config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        let config = Self::from_json(&text)
            .map_err(|e| anyhow::anyhow!("parse config {}: {:#}", path.display(), e))?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (i, model) in self.models.iter().enumerate() {
            if model.id.is_empty() {
                anyhow::bail!("model #{} has an empty id", i);
            }
            if self.models[..i].iter().any(|m| m.id == model.id) {
                anyhow::bail!("model id {} is defined twice", model.id);
            }
        }
        self.source.validate()?;
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            anyhow::bail!(
                "min_confidence must be within 0..=1, got {}",
                self.pipeline.min_confidence
            );
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic live feed.
    TestPattern { width: u32, height: u32, fps: f64 },
    /// Headerless RGB24 file.
    RawVideo {
        path: PathBuf,
        width: u32,
        height: u32,
        fps: f64,
    },
    /// Any file FFmpeg can decode; needs the `ffmpeg` feature.
    Ffmpeg { path: PathBuf },
}

impl SourceConfig {
    fn validate(&self) -> anyhow::Result<()> {
        match self {
            SourceConfig::TestPattern { width, height, fps }
            | SourceConfig::RawVideo {
                width, height, fps, ..
            } => {
                if *width == 0 || *height == 0 {
                    anyhow::bail!("source size must be positive, got {}x{}", width, height);
                }
                if !fps.is_finite() || *fps <= 0.0 {
                    anyhow::bail!("source fps must be positive, got {}", fps);
                }
                Ok(())
            }
            SourceConfig::Ffmpeg { .. } => Ok(()),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::TestPattern {
            width: 640,
            height: 480,
            fps: 30.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub color: Color,
    #[serde(flatten)]
    pub kind: ModelKind,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    /// Loads instantly and never detects anything.
    None,
    /// Re-emits the estimates a previous session logged for `source_model`.
    Replay {
        log: PathBuf,
        source_model: String,
        #[serde(default = "default_max_gap")]
        max_gap_secs: f64,
    },
}

fn default_max_gap() -> f64 {
    DEFAULT_MAX_GAP_SECS
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_confidence: f64,
    pub inference_timeout_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.1,
            inference_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            min_confidence: self.min_confidence,
            inference_timeout: self.inference_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub format: MediaFormat,
    pub jpeg_quality: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            format: MediaFormat::Mjpeg,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}
