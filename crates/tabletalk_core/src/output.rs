use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Normalized result of one sandbox invocation. The `type` tag is what the
/// agent inspects to understand what its code produced, and what the
/// frontend uses to decide how to render an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    Text { data: String },
    /// `data` is a base64-encoded PNG.
    Plot { data: String, caption: String },
    Error { message: String },
}

impl ToolOutput {
    pub fn is_plot(&self) -> bool {
        matches!(self, ToolOutput::Plot { .. })
    }

    /// Plot payloads must be valid base64; text and error payloads are
    /// free-form strings with no length cap.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let ToolOutput::Plot { data, .. } = self {
            STANDARD
                .decode(data)
                .map(|_| ())
                .context("plot payload is not valid base64")?;
        }
        Ok(())
    }
}
