use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::displacement::{DisplacementParams, EdgeMode, MaskMode, DEFAULT_STRENGTH};
use crate::engine::Rgba;
use crate::interaction::PointerButton;
use crate::overlap::SizeRule;
use crate::transform::{Point, ZoomLimits, DEFAULT_ZOOM_SENSITIVITY, MAX_SCALE, MIN_SCALE};

/// Tunables for a compositor session. Every field has a default, so an empty
/// YAML document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositorConfig {
    #[serde(default)]
    pub overlap: OverlapConfig,
    #[serde(default)]
    pub zoom: ZoomConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub displacement: DisplacementConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlapConfig {
    #[serde(default)]
    pub size_rule: SizeRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoomConfig {
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    #[serde(default = "default_max_scale")]
    pub max_scale: f64,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    #[serde(default = "default_pan_button")]
    pub pan_button: PointerButton,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            pan_button: default_pan_button(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplacementConfig {
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub mask_mode: MaskMode,
    #[serde(default)]
    pub edge_mode: EdgeMode,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            strength: default_strength(),
            mask_mode: MaskMode::default(),
            edge_mode: EdgeMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanvasConfig {
    #[serde(default = "default_background")]
    pub background: Rgba,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            background: default_background(),
        }
    }
}

fn default_sensitivity() -> f64 {
    DEFAULT_ZOOM_SENSITIVITY
}

fn default_min_scale() -> f64 {
    MIN_SCALE
}

fn default_max_scale() -> f64 {
    MAX_SCALE
}

fn default_pan_button() -> PointerButton {
    PointerButton::Middle
}

fn default_strength() -> f64 {
    DEFAULT_STRENGTH
}

fn default_background() -> Rgba {
    Rgba::TRANSPARENT
}

impl CompositorConfig {
    pub fn validate(&self) -> Result<()> {
        let ratio = self.overlap.size_rule.ratio();
        if !ratio.is_finite() || ratio <= 0.0 {
            bail!("overlap.size_rule.ratio must be finite and > 0, got {ratio}");
        }

        let zoom = &self.zoom;
        if !zoom.sensitivity.is_finite() || zoom.sensitivity <= 0.0 {
            bail!("zoom.sensitivity must be finite and > 0, got {}", zoom.sensitivity);
        }
        if !zoom.min_scale.is_finite() || zoom.min_scale <= 0.0 {
            bail!("zoom.min_scale must be finite and > 0, got {}", zoom.min_scale);
        }
        if !zoom.max_scale.is_finite() || zoom.max_scale < zoom.min_scale {
            bail!(
                "zoom.max_scale must be finite and >= zoom.min_scale ({}), got {}",
                zoom.min_scale,
                zoom.max_scale
            );
        }

        if self.input.pan_button == PointerButton::Primary {
            bail!("input.pan_button must not be primary, which drags layers");
        }

        if !self.displacement.strength.is_finite() {
            bail!("displacement.strength must be finite");
        }

        self.canvas
            .background
            .validate("canvas.background")
            .map_err(|message| anyhow!(message))?;
        Ok(())
    }

    pub fn zoom_limits(&self) -> ZoomLimits {
        ZoomLimits {
            min_scale: self.zoom.min_scale,
            max_scale: self.zoom.max_scale,
            sensitivity: self.zoom.sensitivity,
        }
    }

    pub fn displacement_params(&self) -> DisplacementParams {
        DisplacementParams {
            strength: self.displacement.strength,
            source_offset: Point::default(),
            mask_mode: self.displacement.mask_mode,
            edge_mode: self.displacement.edge_mode,
        }
    }
}

pub fn load_config(path: &Path) -> Result<CompositorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents, &path.display().to_string())
}

/// Parse and validate YAML. `origin` names the source in error messages.
pub fn parse_config(contents: &str, origin: &str) -> Result<CompositorConfig> {
    let config: CompositorConfig = if contents.trim().is_empty() {
        CompositorConfig::default()
    } else {
        serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse yaml in {} at {}: {}",
                origin,
                location,
                error
            )
        })?
    };

    config
        .validate()
        .with_context(|| format!("invalid config {origin}"))?;
    Ok(config)
}
