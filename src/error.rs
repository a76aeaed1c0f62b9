use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

/// Failures surfaced by the compositor core.
///
/// Lookups of unknown layer ids are not errors; they come back as `None` or
/// `false` from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorError {
    /// The rendering engine or the canvas surface could not be created.
    Init { message: String },
    /// The bytes did not decode into an image.
    Decode { message: String },
    /// A displacement program or shader failed to build or run.
    Compositor { message: String },
    /// The byte store rejected a read or write.
    Persistence { key: String, message: String },
    /// The engine was handed an unknown handle or an impossible request.
    Engine { message: String },
    /// A saved project document is malformed.
    Project { message: String },
}

impl CompositorError {
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn compositor(message: impl Into<String>) -> Self {
        Self::Compositor {
            message: message.into(),
        }
    }

    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn project(message: impl Into<String>) -> Self {
        Self::Project {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Init { .. } => "E_INIT",
            Self::Decode { .. } => "E_DECODE",
            Self::Compositor { .. } => "E_COMPOSITOR",
            Self::Persistence { .. } => "E_PERSISTENCE",
            Self::Engine { .. } => "E_ENGINE",
            Self::Project { .. } => "E_PROJECT",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Init { message }
            | Self::Decode { message }
            | Self::Compositor { message }
            | Self::Persistence { message, .. }
            | Self::Engine { message }
            | Self::Project { message } => message,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Persistence { key, .. } => Some(json!({ "key": key })),
            _ => None,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code().to_owned(),
                message: self.message().to_owned(),
                details: self.details(),
            },
        }
    }
}

impl fmt::Display for CompositorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistence { key, message } => {
                write!(f, "{}: store key '{}': {}", self.code(), key, message)
            }
            _ => write!(f, "{}: {}", self.code(), self.message()),
        }
    }
}

impl std::error::Error for CompositorError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorEnvelope {
    /// Envelope for an arbitrary error chain; falls back to `E_UNKNOWN`.
    pub fn from_anyhow(error: &Error) -> Self {
        match find_compositor_error(error) {
            Some(coded) => coded.envelope(),
            None => Self {
                ok: false,
                error: ErrorEnvelopeBody {
                    code: "E_UNKNOWN".to_owned(),
                    message: format!("{error:#}"),
                    details: None,
                },
            },
        }
    }
}

pub fn find_compositor_error(error: &Error) -> Option<&CompositorError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CompositorError>())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn persistence_envelope_carries_key_details() {
        let error = CompositorError::persistence("img-abc", "disk full");
        let value = serde_json::to_value(error.envelope()).expect("envelope serializes");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "E_PERSISTENCE");
        assert_eq!(value["error"]["details"]["key"], "img-abc");
    }

    #[test]
    fn coded_error_is_found_through_context_layers() {
        let result: anyhow::Result<()> =
            Err(CompositorError::decode("not a png")).context("failed importing layer");
        let error = result.expect_err("should fail");
        let coded = find_compositor_error(&error).expect("coded error in chain");
        assert_eq!(coded.code(), "E_DECODE");
        assert_eq!(ErrorEnvelope::from_anyhow(&error).error.code, "E_DECODE");
    }

    #[test]
    fn plain_errors_map_to_unknown_code() {
        let error = anyhow::anyhow!("something else");
        let envelope = ErrorEnvelope::from_anyhow(&error);
        assert_eq!(envelope.error.code, "E_UNKNOWN");
        assert!(envelope.error.details.is_none());
    }
}
