//! PayloadCodec - conversion between a Task and its persisted bytes.
//!
//! Stores keep payloads opaque; JSON via serde_json is the only format.

use super::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode task payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode task payload: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Stateless codec used by persistent stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(task).map_err(CodecError::Encode)
    }

    pub fn decode<T: Task>(bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
