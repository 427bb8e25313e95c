//! Session configuration.
//!
//! [`SessionOptions`] deserializes with every field optional, so hosts can
//! embed it in their own config files; the setters cover the programmatic case.

use rpcstream_runtime::DEFAULT_MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

/// Default capacity of the local channels behind a stream argument.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Which error fields cross the wire in an ERROR argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorFields {
	/// Only `message`.
	#[default]
	MessageOnly,
	/// `message`, `name` and `stack`.
	Full,
}

/// Options for [`Session::connect`](crate::Session::connect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
	/// Label recorded on the session's tracing span
	pub name: String,

	/// Fixed id prefix; skips negotiation when set
	#[serde(skip_serializing_if = "Option::is_none")]
	pub prefix: Option<String>,

	/// Track pending returns so invocations can be awaited
	pub promise: bool,

	/// Trace every control message sent and received
	pub log: bool,

	pub error_fields: ErrorFields,

	/// Capacity of the local channels behind a received stream argument
	pub stream_buffer: usize,

	/// Largest multiplexer frame accepted or produced
	pub max_frame_len: usize,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			name: String::new(),
			prefix: None,
			promise: false,
			log: false,
			error_fields: ErrorFields::default(),
			stream_buffer: DEFAULT_STREAM_BUFFER,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}
}

impl SessionOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the session name.
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	/// Sets a fixed id prefix.
	pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = Some(prefix.into());
		self
	}

	/// Enables or disables promise mode.
	pub fn promise(mut self, promise: bool) -> Self {
		self.promise = promise;
		self
	}

	/// Enables or disables control message tracing.
	pub fn log(mut self, log: bool) -> Self {
		self.log = log;
		self
	}

	/// Sets which error fields are sent.
	pub fn error_fields(mut self, fields: ErrorFields) -> Self {
		self.error_fields = fields;
		self
	}

	/// Sets the stream channel capacity (at least 1).
	pub fn stream_buffer(mut self, capacity: usize) -> Self {
		self.stream_buffer = capacity.max(1);
		self
	}

	/// Sets the frame size limit.
	pub fn max_frame_len(mut self, len: usize) -> Self {
		self.max_frame_len = len;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deserialize_partial() {
		let options: SessionOptions = serde_json::from_str(r#"{"name": "server", "promise": true, "errorFields": "full"}"#).unwrap();

		assert_eq!(options.name, "server");
		assert!(options.promise);
		assert!(!options.log);
		assert_eq!(options.error_fields, ErrorFields::Full);
		assert_eq!(options.stream_buffer, DEFAULT_STREAM_BUFFER);
		assert_eq!(options.max_frame_len, DEFAULT_MAX_FRAME_LEN);
		assert!(options.prefix.is_none());
	}

	#[test]
	fn test_builder() {
		let options = SessionOptions::new().name("client").prefix("C").promise(true).stream_buffer(0);

		assert_eq!(options.name, "client");
		assert_eq!(options.prefix.as_deref(), Some("C"));
		assert!(options.promise);
		assert_eq!(options.stream_buffer, 1);
	}
}
