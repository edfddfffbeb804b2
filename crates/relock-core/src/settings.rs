use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

pub const DEFAULT_FAILED_ATTEMPT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptText {
    pub title: String,
    pub subtitle: String,
    pub fallback_subtitle: String,
    pub cancel_label: String,
    pub verify_identity_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateSettings {
    /// Primary failures tolerated before switching to the device credential.
    #[serde(default = "default_threshold")]
    pub failed_attempt_threshold: u32,
    #[serde(default)]
    pub prompt: PromptText,
}

fn default_threshold() -> u32 {
    DEFAULT_FAILED_ATTEMPT_THRESHOLD
}

impl Default for PromptText {
    fn default() -> Self {
        Self {
            title: "Unlock".into(),
            subtitle: "Confirm your identity to continue".into(),
            fallback_subtitle: "Use your device PIN, pattern or password".into(),
            cancel_label: "Cancel".into(),
            verify_identity_message: "Please verify your identity".into(),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            failed_attempt_threshold: DEFAULT_FAILED_ATTEMPT_THRESHOLD,
            prompt: PromptText::default(),
        }
    }
}

impl GateSettings {
    pub fn validate(&self) -> Result<()> {
        if self.failed_attempt_threshold == 0 {
            return Err(GateError::Config(
                "failed_attempt_threshold must be at least 1".into(),
            ));
        }
        if self.prompt.title.trim().is_empty() {
            return Err(GateError::Config("prompt title must not be empty".into()));
        }
        Ok(())
    }
}
