//! Error types for rpcstream sessions.

use rpcstream_protocol::CodecError;
use thiserror::Error;

use crate::arg::RemoteError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a peer.
#[derive(Debug, Error)]
pub enum Error {
	/// The session's transport is gone or the session was closed locally.
	#[error("Session closed")]
	SessionClosed,

	/// The peer's manifest has not arrived yet, so no ids can be allocated.
	#[error("Session not ready: remote manifest not received yet")]
	NotReady,

	/// Awaited an invocation on a session that does not track promises.
	#[error("Promise mode is disabled for this session")]
	PromiseModeDisabled,

	/// Nothing exists at the requested path in the remote tree.
	#[error("Remote capability not found: '{0}'")]
	NotFound(String),

	/// Something exists at the path but it has a different shape.
	#[error("Remote capability '{path}' is not a {expected}")]
	WrongKind { path: String, expected: &'static str },

	/// The remote object does not expose the requested method.
	#[error("{type_name} has no method '{method}'")]
	UnknownMethod { type_name: String, method: String },

	/// The peer rejected a pending call.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name (e.g., "TypeError", "Error")
		name: String,
		message: String,
		stack: Option<String>,
	},

	/// A control message could not be encoded or decoded.
	#[error("Codec error: {0}")]
	Codec(#[from] CodecError),

	/// The multiplexer refused an operation.
	#[error("Transport error: {0}")]
	Transport(#[from] rpcstream_runtime::Error),

	/// A local handler panicked inside the session driver.
	#[error("Session driver panicked: {0}")]
	DriverPanicked(String),
}

impl Error {
	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the stack trace if this is a Remote error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns true if the session can no longer carry traffic.
	pub fn is_closed(&self) -> bool {
		matches!(
			self,
			Error::SessionClosed
				| Error::DriverPanicked(_)
				| Error::Transport(rpcstream_runtime::Error::ChannelClosed)
		)
	}
}

impl From<RemoteError> for Error {
	fn from(err: RemoteError) -> Self {
		Error::Remote {
			name: err.name.unwrap_or_else(|| "Error".to_string()),
			message: err.message,
			stack: err.stack,
		}
	}
}
