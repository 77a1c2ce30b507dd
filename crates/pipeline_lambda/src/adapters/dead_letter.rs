use pipeline_core::PipelineError;
use serde::{Deserialize, Serialize};

/// Envelope forwarded to the dead-letter destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub error_code: String,
    pub error_message: String,
    pub source_message_id: Option<String>,
    pub original_body: String,
}

impl DeadLetterEnvelope {
    pub fn new(error: &PipelineError, source_message_id: Option<&str>, body: &str) -> Self {
        Self {
            error_code: error.code().to_string(),
            error_message: error.to_string(),
            source_message_id: source_message_id.map(str::to_string),
            original_body: body.to_string(),
        }
    }
}

pub trait DeadLetterSink {
    fn forward(&self, envelope: &DeadLetterEnvelope) -> Result<(), PipelineError>;
}
