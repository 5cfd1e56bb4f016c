use super::envelope::Envelope;

pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// encode an envelope into a text frame
    pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
        serde_json::to_string(envelope).map_err(|e| CodecError::SerializationError(e.to_string()))
    }

    /// decode a text frame into an envelope
    ///
    /// Frames that are valid JSON but not an object with a string `topic`
    /// are rejected as well.
    pub fn decode(frame: &str) -> Result<Envelope, CodecError> {
        if frame.trim().is_empty() {
            return Err(CodecError::EmptyFrame);
        }

        serde_json::from_str(frame).map_err(|e| CodecError::DeserializationError(e.to_string()))
    }
}

/// Error types for envelope codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Empty frame")]
    EmptyFrame,
}
