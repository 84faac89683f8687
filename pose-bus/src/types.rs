use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single landmark emitted by a model. Every field is optional: models only
/// fill what they produce.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint2D {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(rename = "score", default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Keypoint2D {
    pub fn new(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            confidence: Some(confidence),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Position when both coordinates are present.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.x?, self.y?))
    }

    /// A keypoint without a confidence is always shown.
    pub fn passes(&self, min_confidence: f64) -> bool {
        self.confidence.is_none_or(|c| c >= min_confidence)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint3D {
    #[serde(flatten)]
    pub point: Keypoint2D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

/// One detected body in one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    #[serde(rename = "score", default, skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<f64>,
    #[serde(default)]
    pub keypoints: Vec<Keypoint2D>,
    #[serde(
        rename = "keypoints3D",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keypoints_3d: Option<Vec<Keypoint3D>>,
}

impl PoseEstimate {
    pub fn new(overall_confidence: Option<f64>, keypoints: Vec<Keypoint2D>) -> Self {
        Self {
            overall_confidence,
            keypoints,
            keypoints_3d: None,
        }
    }
}

/// Overlay color, written as `#rrggbb` and accepted as hex or a CSS color name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                anyhow::bail!("invalid hex color: {}", value);
            }
            let channel = |range: std::ops::Range<usize>| {
                u8::from_str_radix(&hex[range], 16)
                    .map_err(|e| anyhow::anyhow!("invalid hex color {}: {}", value, e))
            };
            return Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?));
        }

        let color = match value.to_ascii_lowercase().as_str() {
            "red" => Self::rgb(255, 0, 0),
            "orange" => Self::rgb(255, 165, 0),
            "yellow" => Self::rgb(255, 255, 0),
            "green" => Self::rgb(0, 128, 0),
            "lime" => Self::rgb(0, 255, 0),
            "blue" => Self::rgb(0, 0, 255),
            "aqua" | "cyan" => Self::rgb(0, 255, 255),
            "magenta" | "fuchsia" => Self::rgb(255, 0, 255),
            "purple" => Self::rgb(128, 0, 128),
            "white" => Self::rgb(255, 255, 255),
            "black" => Self::rgb(0, 0, 0),
            _ => anyhow::bail!("unknown color: {}", value),
        };
        Ok(color)
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Color {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

/// Identity and presentation of a selectable model, independent of load state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub overlay_color: Color,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, color: Color) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            overlay_color: color,
        }
    }
}
