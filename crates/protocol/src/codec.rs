//! Message codec for the control channel.
//!
//! One encoded [`Message`] per multiplexer frame; the frame boundary is the
//! message boundary, so no extra length prefix is needed here.

use thiserror::Error;

use crate::message::Message;

/// Errors produced while encoding or decoding a control message.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("failed to encode message: {0}")]
	Encode(#[source] serde_json::Error),

	#[error("failed to decode message: {0}")]
	Decode(#[source] serde_json::Error),
}

/// Encodes a message to its wire bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
	serde_json::to_vec(message).map_err(CodecError::Encode)
}

/// Decodes a message from its wire bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
	serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
