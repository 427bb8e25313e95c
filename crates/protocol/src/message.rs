//! Control-channel messages.
//!
//! Every message on the control channel is one of three kinds:
//!
//! 1. [`Message::Manifest`] - sent once by each side when the session starts
//! 2. [`Message::Call`] - invoke a function, construct an object, or call a method
//! 3. [`Message::Return`] - fire a callback or settle a pending promise
//!
//! Arguments travel as [`TaggedArg`]s. The tag is chosen by the sender, so the
//! receiver dispatches on it exactly and never re-classifies a payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manifest::{Manifest, ObjectManifest};

/// Stream direction bit: the sender produces data the receiver reads.
pub const READABLE: u8 = 1;
/// Stream direction bit: the receiver writes data the sender consumes.
pub const WRITABLE: u8 = 2;
/// Both direction bits.
pub const DUPLEX: u8 = READABLE | WRITABLE;

/// Discriminated union of control-channel messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
	/// Capability manifest plus the sender's random nonce.
	Manifest {
		manifest: Manifest,
		nonce: u32,
	},
	Call(Call),
	Return(Return),
}

/// Whether a call targets an API path or a previously exported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallKind {
	/// Resolved by dotted path through the callee's API tree.
	Api,
	/// Resolved by object id through the callee's exported objects.
	Object,
}

/// Invocation request.
///
/// For [`CallKind::Api`] calls against a constructor, an absent `object_id`
/// means "construct" and a present one means "call `method` on that instance".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
	pub kind: CallKind,
	/// Capability id allocated by the caller for this call.
	pub id: String,
	/// Dotted API path.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub object_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(default)]
	pub args: Vec<TaggedArg>,
}

/// What a [`Return`] settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnKind {
	/// Invoke a registered callback; may arrive any number of times.
	Callback,
	/// Settle a pending promise; only the first arrival counts.
	Promise,
}

/// Outcome carried by a promise return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromiseResult {
	Resolve,
	Reject,
}

/// Callback invocation or promise settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Return {
	pub kind: ReturnKind,
	/// Id of the callback or of the call whose promise is settled.
	pub id: String,
	#[serde(default)]
	pub args: Vec<TaggedArg>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub promise_result: Option<PromiseResult>,
}

/// One marshaled argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaggedArg {
	/// Exported capability; calls come back as [`CallKind::Object`].
	Rpcified(ObjectManifest),
	Error(ErrorPayload),
	/// Id under which the sender registered the callback.
	Callback(String),
	Stream(StreamSpec),
	Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
	Json(Value),
}

/// Serialized error fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	/// Error type name (e.g., "TypeError")
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Shape of a stream argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
	/// Bitwise or of [`READABLE`] and [`WRITABLE`].
	pub direction: u8,
	/// Chunks are JSON values rather than raw bytes.
	pub object_mode: bool,
}

impl StreamSpec {
	pub fn is_readable(&self) -> bool {
		self.direction & READABLE != 0
	}

	pub fn is_writable(&self) -> bool {
		self.direction & WRITABLE != 0
	}
}

mod base64_bytes {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		STANDARD.decode(encoded).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_call_deserialization() {
		let json = r#"{
			"type": "CALL",
			"kind": "API",
			"id": "A.4",
			"name": "fs.read",
			"args": [{"type": "JSON", "payload": "abc"}, {"type": "CALLBACK", "payload": "A.4.1"}]
		}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		match message {
			Message::Call(call) => {
				assert_eq!(call.kind, CallKind::Api);
				assert_eq!(call.id, "A.4");
				assert_eq!(call.name.as_deref(), Some("fs.read"));
				assert!(call.object_id.is_none());
				assert_eq!(call.args[0], TaggedArg::Json(Value::from("abc")));
				assert_eq!(call.args[1], TaggedArg::Callback("A.4.1".into()));
			}
			_ => panic!("Expected Call"),
		}
	}

	#[test]
	fn test_return_serialization() {
		let message = Message::Return(Return {
			kind: ReturnKind::Promise,
			id: "B.0".into(),
			args: vec![TaggedArg::Error(ErrorPayload {
				message: "boom".into(),
				name: None,
				stack: None,
			})],
			promise_result: Some(PromiseResult::Reject),
		});

		let json = serde_json::to_value(&message).unwrap();
		assert_eq!(json["type"], "RETURN");
		assert_eq!(json["kind"], "PROMISE");
		assert_eq!(json["promiseResult"], "REJECT");
		assert_eq!(json["args"][0]["payload"], serde_json::json!({"message": "boom"}));
	}

	#[test]
	fn test_bytes_payload_is_base64() {
		let arg = TaggedArg::Bytes(vec![0, 159, 255]);
		let json = serde_json::to_value(&arg).unwrap();
		assert_eq!(json, serde_json::json!({"type": "BYTES", "payload": "AJ//"}));

		let back: TaggedArg = serde_json::from_value(json).unwrap();
		assert_eq!(back, arg);
	}

	#[test]
	fn test_stream_spec_bits() {
		let spec = StreamSpec {
			direction: DUPLEX,
			object_mode: true,
		};
		assert!(spec.is_readable());
		assert!(spec.is_writable());

		let read_only = StreamSpec {
			direction: READABLE,
			object_mode: false,
		};
		assert!(!read_only.is_writable());
	}
}
