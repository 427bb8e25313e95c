//! Error types for the multiplexer.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while multiplexing a connection.
#[derive(Debug, Error)]
pub enum Error {
	/// A frame announced or carried more bytes than the configured limit.
	#[error("Frame of {len} bytes exceeds the {max} byte limit")]
	FrameTooLarge { len: usize, max: usize },

	/// A frame could not be parsed.
	#[error("Invalid frame: {0}")]
	InvalidFrame(String),

	/// The multiplexer's writer is gone.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// One half of a named sub-stream was already handed out on this side.
	#[error("Sub-stream '{name}' already has a {half}")]
	AlreadyTaken { name: String, half: &'static str },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
