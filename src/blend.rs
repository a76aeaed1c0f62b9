use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel compositing function used when a layer is drawn over the ones below.
///
/// Names follow the CSS / canvas `globalCompositeOperation` vocabulary.
/// Unknown names never reach the renderer: [`BlendMode::parse_lossy`] falls
/// back to [`BlendMode::SourceOver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlendMode {
    #[default]
    SourceOver,
    SourceIn,
    SourceOut,
    SourceAtop,
    DestinationOver,
    DestinationIn,
    DestinationOut,
    DestinationAtop,
    Xor,
    Lighter,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    pub const ALL: [Self; 25] = [
        Self::SourceOver,
        Self::SourceIn,
        Self::SourceOut,
        Self::SourceAtop,
        Self::DestinationOver,
        Self::DestinationIn,
        Self::DestinationOut,
        Self::DestinationAtop,
        Self::Xor,
        Self::Lighter,
        Self::Multiply,
        Self::Screen,
        Self::Overlay,
        Self::Darken,
        Self::Lighten,
        Self::ColorDodge,
        Self::ColorBurn,
        Self::HardLight,
        Self::SoftLight,
        Self::Difference,
        Self::Exclusion,
        Self::Hue,
        Self::Saturation,
        Self::Color,
        Self::Luminosity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceOver => "source-over",
            Self::SourceIn => "source-in",
            Self::SourceOut => "source-out",
            Self::SourceAtop => "source-atop",
            Self::DestinationOver => "destination-over",
            Self::DestinationIn => "destination-in",
            Self::DestinationOut => "destination-out",
            Self::DestinationAtop => "destination-atop",
            Self::Xor => "xor",
            Self::Lighter => "lighter",
            Self::Multiply => "multiply",
            Self::Screen => "screen",
            Self::Overlay => "overlay",
            Self::Darken => "darken",
            Self::Lighten => "lighten",
            Self::ColorDodge => "color-dodge",
            Self::ColorBurn => "color-burn",
            Self::HardLight => "hard-light",
            Self::SoftLight => "soft-light",
            Self::Difference => "difference",
            Self::Exclusion => "exclusion",
            Self::Hue => "hue",
            Self::Saturation => "saturation",
            Self::Color => "color",
            Self::Luminosity => "luminosity",
        }
    }

    /// Parse a blend-mode name, falling back to source-over.
    pub fn parse_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(blend_mode = raw, "unknown blend mode, using source-over");
            Self::SourceOver
        })
    }

    pub fn to_skia(self) -> tiny_skia::BlendMode {
        use tiny_skia::BlendMode as Sk;
        match self {
            Self::SourceOver => Sk::SourceOver,
            Self::SourceIn => Sk::SourceIn,
            Self::SourceOut => Sk::SourceOut,
            Self::SourceAtop => Sk::SourceAtop,
            Self::DestinationOver => Sk::DestinationOver,
            Self::DestinationIn => Sk::DestinationIn,
            Self::DestinationOut => Sk::DestinationOut,
            Self::DestinationAtop => Sk::DestinationAtop,
            Self::Xor => Sk::Xor,
            Self::Lighter => Sk::Plus,
            Self::Multiply => Sk::Multiply,
            Self::Screen => Sk::Screen,
            Self::Overlay => Sk::Overlay,
            Self::Darken => Sk::Darken,
            Self::Lighten => Sk::Lighten,
            Self::ColorDodge => Sk::ColorDodge,
            Self::ColorBurn => Sk::ColorBurn,
            Self::HardLight => Sk::HardLight,
            Self::SoftLight => Sk::SoftLight,
            Self::Difference => Sk::Difference,
            Self::Exclusion => Sk::Exclusion,
            Self::Hue => Sk::Hue,
            Self::Saturation => Sk::Saturation,
            Self::Color => Sk::Color,
            Self::Luminosity => Sk::Luminosity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBlendMode(pub String);

impl fmt::Display for UnknownBlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown blend mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownBlendMode {}

impl FromStr for BlendMode {
    type Err = UnknownBlendMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| UnknownBlendMode(raw.to_owned()))
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for BlendMode {
    fn from(raw: String) -> Self {
        Self::parse_lossy(&raw)
    }
}

impl From<BlendMode> for String {
    fn from(mode: BlendMode) -> Self {
        mode.as_str().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::BlendMode;

    #[test]
    fn every_mode_parses_back_from_its_name() {
        for mode in BlendMode::ALL {
            assert_eq!(mode.as_str().parse::<BlendMode>(), Ok(mode));
        }
    }

    #[test]
    fn parsing_accepts_snake_case_and_mixed_case() {
        assert_eq!("COLOR_DODGE".parse::<BlendMode>(), Ok(BlendMode::ColorDodge));
        assert_eq!(" Multiply ".parse::<BlendMode>(), Ok(BlendMode::Multiply));
    }

    #[test]
    fn unknown_names_fall_back_to_source_over() {
        assert!("plasma".parse::<BlendMode>().is_err());
        assert_eq!(BlendMode::parse_lossy("plasma"), BlendMode::SourceOver);

        let decoded: BlendMode = serde_json::from_str("\"not-a-mode\"").expect("string decodes");
        assert_eq!(decoded, BlendMode::SourceOver);
    }

    #[test]
    fn serializes_as_canvas_name() {
        let encoded = serde_json::to_string(&BlendMode::SoftLight).expect("encodes");
        assert_eq!(encoded, "\"soft-light\"");
    }
}
