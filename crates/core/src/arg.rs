//! Call arguments and handler replies.
//!
//! Every value crossing a call boundary is an [`Arg`]. The variant is chosen
//! by whoever builds the argument, and it alone decides the wire tag:
//!
//! | Variant | Wire tag | Arrives as |
//! |---|---|---|
//! | [`Arg::Rpcified`] | RPCIFIED | [`Arg::Remote`] |
//! | [`Arg::Error`] | ERROR | [`Arg::Error`] |
//! | [`Arg::Callback`] | CALLBACK | [`Arg::Callback`] (a stub that calls back) |
//! | [`Arg::Stream`] | STREAM | [`Arg::Stream`] (a stand-in wired to the same sub-streams) |
//! | [`Arg::Bytes`] | BYTES | [`Arg::Bytes`] |
//! | [`Arg::Json`] | JSON | [`Arg::Json`] |

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use rpcstream_protocol::ErrorPayload;
use serde::Serialize;
use serde_json::Value;

use crate::callback::Callback;
use crate::capability::Rpcified;
use crate::options::ErrorFields;
use crate::remote::RemoteObject;
use crate::stream::RpcStream;

/// One call argument.
pub enum Arg {
	/// A local capability exported to the peer for the lifetime of the session.
	Rpcified(Arc<Rpcified>),
	/// A capability the peer exported to us.
	Remote(RemoteObject),
	Error(RemoteError),
	Callback(Callback),
	Stream(RpcStream),
	Bytes(Bytes),
	Json(Value),
}

impl Arg {
	/// JSON argument from any serializable value; unserializable input becomes null.
	pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
		match serde_json::to_value(value) {
			Ok(value) => Arg::Json(value),
			Err(e) => {
				tracing::warn!("Argument is not JSON-serializable, sending null: {}", e);
				Arg::Json(Value::Null)
			}
		}
	}

	pub fn null() -> Self {
		Arg::Json(Value::Null)
	}

	pub fn bytes(bytes: impl Into<Bytes>) -> Self {
		Arg::Bytes(bytes.into())
	}

	/// Callback the peer may invoke any number of times.
	pub fn callback<F>(f: F) -> Self
	where
		F: Fn(Args) + Send + Sync + 'static,
	{
		Arg::Callback(Callback::new(f))
	}

	pub fn error(message: impl Into<String>) -> Self {
		Arg::Error(RemoteError::new(message))
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Arg::Json(value) => value.as_str(),
			_ => None,
		}
	}

	pub fn as_json(&self) -> Option<&Value> {
		match self {
			Arg::Json(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_bytes(&self) -> Option<&Bytes> {
		match self {
			Arg::Bytes(bytes) => Some(bytes),
			_ => None,
		}
	}

	pub fn as_error(&self) -> Option<&RemoteError> {
		match self {
			Arg::Error(err) => Some(err),
			_ => None,
		}
	}

	pub fn as_remote(&self) -> Option<&RemoteObject> {
		match self {
			Arg::Remote(object) => Some(object),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Arg::Json(Value::Null))
	}

	/// Wire tag name, for logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Arg::Rpcified(_) => "RPCIFIED",
			Arg::Remote(_) => "REMOTE",
			Arg::Error(_) => "ERROR",
			Arg::Callback(_) => "CALLBACK",
			Arg::Stream(_) => "STREAM",
			Arg::Bytes(_) => "BYTES",
			Arg::Json(_) => "JSON",
		}
	}
}

impl fmt::Debug for Arg {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Arg::Rpcified(wrapper) => f.debug_tuple("Rpcified").field(&wrapper.type_name()).finish(),
			Arg::Remote(object) => f.debug_tuple("Remote").field(object).finish(),
			Arg::Error(err) => f.debug_tuple("Error").field(err).finish(),
			Arg::Callback(cb) => f.debug_tuple("Callback").field(cb).finish(),
			Arg::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
			Arg::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
			Arg::Json(value) => f.debug_tuple("Json").field(value).finish(),
		}
	}
}

impl From<Value> for Arg {
	fn from(value: Value) -> Self {
		Arg::Json(value)
	}
}

impl From<&str> for Arg {
	fn from(value: &str) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<String> for Arg {
	fn from(value: String) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<bool> for Arg {
	fn from(value: bool) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<i64> for Arg {
	fn from(value: i64) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<u64> for Arg {
	fn from(value: u64) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<f64> for Arg {
	fn from(value: f64) -> Self {
		Arg::Json(Value::from(value))
	}
}

impl From<Bytes> for Arg {
	fn from(value: Bytes) -> Self {
		Arg::Bytes(value)
	}
}

impl From<RemoteError> for Arg {
	fn from(value: RemoteError) -> Self {
		Arg::Error(value)
	}
}

impl From<Callback> for Arg {
	fn from(value: Callback) -> Self {
		Arg::Callback(value)
	}
}

impl From<RpcStream> for Arg {
	fn from(value: RpcStream) -> Self {
		Arg::Stream(value)
	}
}

impl From<Rpcified> for Arg {
	fn from(value: Rpcified) -> Self {
		Arg::Rpcified(Arc::new(value))
	}
}

impl From<Arc<Rpcified>> for Arg {
	fn from(value: Arc<Rpcified>) -> Self {
		Arg::Rpcified(value)
	}
}

impl From<RemoteObject> for Arg {
	fn from(value: RemoteObject) -> Self {
		Arg::Remote(value)
	}
}

/// Positional argument list.
///
/// Accessors return `None` for a missing index or a different variant.
#[derive(Debug, Default)]
pub struct Args(Vec<Arg>);

impl Args {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&Arg> {
		self.0.get(index)
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
		self.0.iter()
	}

	pub fn push(&mut self, arg: impl Into<Arg>) {
		self.0.push(arg.into());
	}

	pub fn str(&self, index: usize) -> Option<&str> {
		self.get(index).and_then(Arg::as_str)
	}

	pub fn json(&self, index: usize) -> Option<&Value> {
		self.get(index).and_then(Arg::as_json)
	}

	pub fn bytes(&self, index: usize) -> Option<&Bytes> {
		self.get(index).and_then(Arg::as_bytes)
	}

	pub fn error(&self, index: usize) -> Option<&RemoteError> {
		self.get(index).and_then(Arg::as_error)
	}

	pub fn remote(&self, index: usize) -> Option<&RemoteObject> {
		self.get(index).and_then(Arg::as_remote)
	}

	/// Callbacks are handles, so this clones rather than takes.
	pub fn callback(&self, index: usize) -> Option<Callback> {
		match self.get(index) {
			Some(Arg::Callback(cb)) => Some(cb.clone()),
			_ => None,
		}
	}

	/// Moves the argument out, leaving null in its place.
	pub fn take(&mut self, index: usize) -> Option<Arg> {
		self.0.get_mut(index).map(|slot| std::mem::replace(slot, Arg::null()))
	}

	/// Moves a stream argument out, leaving null in its place.
	pub fn take_stream(&mut self, index: usize) -> Option<RpcStream> {
		if !matches!(self.get(index), Some(Arg::Stream(_))) {
			return None;
		}
		match self.take(index) {
			Some(Arg::Stream(stream)) => Some(stream),
			_ => None,
		}
	}

	/// First argument, or null when there is none.
	pub fn into_first(self) -> Arg {
		self.0.into_iter().next().unwrap_or_else(Arg::null)
	}

	pub fn into_vec(self) -> Vec<Arg> {
		self.0
	}
}

impl From<Vec<Arg>> for Args {
	fn from(args: Vec<Arg>) -> Self {
		Self(args)
	}
}

impl From<()> for Args {
	fn from(_: ()) -> Self {
		Self::default()
	}
}

impl From<Arg> for Args {
	fn from(arg: Arg) -> Self {
		Self(vec![arg])
	}
}

impl FromIterator<Arg> for Args {
	fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl IntoIterator for Args {
	type Item = Arg;
	type IntoIter = std::vec::IntoIter<Arg>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

/// An error as it crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
	pub message: String,
	/// Error type name (e.g., "TypeError")
	pub name: Option<String>,
	pub stack: Option<String>,
}

impl RemoteError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			name: None,
			stack: None,
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
		self.stack = Some(stack.into());
		self
	}

	pub(crate) fn to_payload(&self, fields: ErrorFields) -> ErrorPayload {
		match fields {
			ErrorFields::MessageOnly => ErrorPayload {
				message: self.message.clone(),
				name: None,
				stack: None,
			},
			ErrorFields::Full => ErrorPayload {
				message: self.message.clone(),
				name: self.name.clone(),
				stack: self.stack.clone(),
			},
		}
	}
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.name {
			Some(name) => write!(f, "{}: {}", name, self.message),
			None => f.write_str(&self.message),
		}
	}
}

impl std::error::Error for RemoteError {}

impl From<ErrorPayload> for RemoteError {
	fn from(payload: ErrorPayload) -> Self {
		Self {
			message: payload.message,
			name: payload.name,
			stack: payload.stack,
		}
	}
}

impl From<&str> for RemoteError {
	fn from(message: &str) -> Self {
		Self::new(message)
	}
}

impl From<String> for RemoteError {
	fn from(message: String) -> Self {
		Self::new(message)
	}
}

/// What a local handler hands back to the dispatcher.
///
/// In promise mode every reply settles the caller's pending invocation exactly
/// once; otherwise replies are discarded (futures are still driven).
pub enum Reply {
	/// Resolves with no value.
	Unit,
	Value(Arg),
	Rejected(RemoteError),
	Future(BoxFuture<'static, Result<Arg, RemoteError>>),
}

impl Reply {
	pub fn ok(value: impl Into<Arg>) -> Self {
		Reply::Value(value.into())
	}

	pub fn err(err: impl Into<RemoteError>) -> Self {
		Reply::Rejected(err.into())
	}

	/// Reply settled when `future` completes.
	pub fn future<F>(future: F) -> Self
	where
		F: Future<Output = Result<Arg, RemoteError>> + Send + 'static,
	{
		Reply::Future(Box::pin(future))
	}
}

impl From<()> for Reply {
	fn from(_: ()) -> Self {
		Reply::Unit
	}
}

impl From<Arg> for Reply {
	fn from(value: Arg) -> Self {
		Reply::Value(value)
	}
}

impl From<Result<Arg, RemoteError>> for Reply {
	fn from(result: Result<Arg, RemoteError>) -> Self {
		match result {
			Ok(value) => Reply::Value(value),
			Err(err) => Reply::Rejected(err),
		}
	}
}

impl fmt::Debug for Reply {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Reply::Unit => f.write_str("Unit"),
			Reply::Value(arg) => f.debug_tuple("Value").field(arg).finish(),
			Reply::Rejected(err) => f.debug_tuple("Rejected").field(err).finish(),
			Reply::Future(_) => f.write_str("Future(..)"),
		}
	}
}
