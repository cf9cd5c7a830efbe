use serde::{Deserialize, Serialize};

/// Per-thread generation settings, stored on the thread and applied to every
/// completion started in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
}

impl GenerationSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            enabled_tools: Vec::new(),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// What kind of user action started a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    #[serde(rename = "submit-message")]
    SubmitMessage,
    #[serde(rename = "edit-message")]
    EditMessage,
    #[serde(rename = "regenerate-message")]
    RegenerateMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub response_tokens: u32,
    pub total_tokens: u32,
}

/// Wall-clock stats recorded for an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub time_to_first_token_ms: u64,
    pub duration_ms: u64,
    pub tokens_per_sec: f64,
}
