//! Serialisable project document: viewport plus layer records.
//!
//! Pixels are not stored inline; each layer names the byte-store key its
//! source bytes live under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::error::CompositorError;
use crate::layer::{Layer, LayerId};
use crate::transform::Transform;

pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub layers: Vec<PersistedLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistedLayer {
    pub id: LayerId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
}

fn default_version() -> u32 {
    PROJECT_VERSION
}

fn default_scale() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

impl From<&Layer> for PersistedLayer {
    fn from(layer: &Layer) -> Self {
        Self {
            id: layer.id,
            name: layer.name.clone(),
            x: layer.x,
            y: layer.y,
            scale: layer.scale,
            rotation: layer.rotation,
            blend_mode: layer.blend_mode,
            opacity: layer.opacity,
            source_key: layer.source_key.clone(),
        }
    }
}

impl ProjectDocument {
    pub fn capture<'a>(transform: Transform, layers: impl IntoIterator<Item = &'a Layer>) -> Self {
        Self {
            version: PROJECT_VERSION,
            saved_at: Some(Utc::now()),
            transform,
            layers: layers.into_iter().map(PersistedLayer::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CompositorError> {
        let mut json = serde_json::to_vec_pretty(self).map_err(|error| {
            CompositorError::project(format!("failed to serialize project: {error}"))
        })?;
        json.push(b'\n');
        Ok(json)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CompositorError> {
        let document: Self = serde_json::from_slice(bytes).map_err(|error| {
            CompositorError::project(format!("failed to parse project JSON: {error}"))
        })?;
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> Result<(), CompositorError> {
        if self.version == 0 || self.version > PROJECT_VERSION {
            return Err(CompositorError::project(format!(
                "unsupported project version {} (expected 1..={PROJECT_VERSION})",
                self.version
            )));
        }
        let transform = &self.transform;
        if !(transform.x.is_finite() && transform.y.is_finite() && transform.scale.is_finite())
            || transform.scale <= 0.0
        {
            return Err(CompositorError::project(
                "project transform must be finite with a positive scale",
            ));
        }
        Ok(())
    }
}
