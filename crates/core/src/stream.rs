//! Live streams passed as arguments.
//!
//! An [`RpcStream`] is whatever end of a stream the holder does not keep:
//! a [`StreamSource`] for the readable direction and a [`StreamSink`] for the
//! writable one. When sent, the session pumps the source into sub-stream
//! `<id>-1` and sub-stream `<id>-2` into the sink. The receiving side gets a
//! stand-in with the same direction bits, wired to the same sub-streams.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use rpcstream_protocol::{DUPLEX, READABLE, StreamSpec, WRITABLE};
use rpcstream_runtime::{SubStreamReceiver, SubStreamSender};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::options::DEFAULT_STREAM_BUFFER;

/// One unit of stream data.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
	Bytes(Bytes),
	/// A value from an object-mode stream.
	Object(Value),
}

impl Chunk {
	pub fn as_bytes(&self) -> Option<&Bytes> {
		match self {
			Chunk::Bytes(bytes) => Some(bytes),
			Chunk::Object(_) => None,
		}
	}

	pub fn as_object(&self) -> Option<&Value> {
		match self {
			Chunk::Object(value) => Some(value),
			Chunk::Bytes(_) => None,
		}
	}

	/// Bytes for the sub-stream. Objects are JSON-encoded, bytes pass through.
	pub(crate) fn into_wire(self) -> Result<Bytes> {
		match self {
			Chunk::Bytes(bytes) => Ok(bytes),
			Chunk::Object(value) => serde_json::to_vec(&value)
				.map(Bytes::from)
				.map_err(|e| Error::Codec(rpcstream_protocol::CodecError::Encode(e))),
		}
	}

	/// Inverse of [`into_wire`](Self::into_wire) for the stream's mode.
	pub(crate) fn from_wire(bytes: Bytes, object_mode: bool) -> Result<Self> {
		if !object_mode {
			return Ok(Chunk::Bytes(bytes));
		}
		serde_json::from_slice(&bytes)
			.map(Chunk::Object)
			.map_err(|e| Error::Codec(rpcstream_protocol::CodecError::Decode(e)))
	}
}

impl From<Bytes> for Chunk {
	fn from(bytes: Bytes) -> Self {
		Chunk::Bytes(bytes)
	}
}

impl From<&'static [u8]> for Chunk {
	fn from(bytes: &'static [u8]) -> Self {
		Chunk::Bytes(Bytes::from_static(bytes))
	}
}

impl From<Vec<u8>> for Chunk {
	fn from(bytes: Vec<u8>) -> Self {
		Chunk::Bytes(Bytes::from(bytes))
	}
}

impl From<Value> for Chunk {
	fn from(value: Value) -> Self {
		Chunk::Object(value)
	}
}

/// Writing end of a stream direction.
#[derive(Clone)]
pub struct StreamSink {
	tx: mpsc::Sender<Chunk>,
}

impl StreamSink {
	/// Waits for buffer space, then queues the chunk.
	pub async fn send(&self, chunk: impl Into<Chunk>) -> Result<()> {
		self.tx
			.send(chunk.into())
			.await
			.map_err(|_| Error::Transport(rpcstream_runtime::Error::ChannelClosed))
	}

	/// Queues a serializable value as an object chunk.
	pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
		let value = serde_json::to_value(value).map_err(|e| Error::Codec(rpcstream_protocol::CodecError::Encode(e)))?;
		self.send(Chunk::Object(value)).await
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

impl fmt::Debug for StreamSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StreamSink").field("closed", &self.is_closed()).finish()
	}
}

/// Reading end of a stream direction. Ends once every sink is dropped.
pub struct StreamSource {
	rx: mpsc::Receiver<Chunk>,
}

impl StreamSource {
	pub async fn recv(&mut self) -> Option<Chunk> {
		self.rx.recv().await
	}
}

impl Stream for StreamSource {
	type Item = Chunk;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.rx.poll_recv(cx)
	}
}

impl fmt::Debug for StreamSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StreamSource").finish_non_exhaustive()
	}
}

fn channel(capacity: usize) -> (StreamSink, StreamSource) {
	let (tx, rx) = mpsc::channel(capacity.max(1));
	(StreamSink { tx }, StreamSource { rx })
}

/// A stream argument.
#[derive(Debug)]
pub struct RpcStream {
	object_mode: bool,
	source: Option<StreamSource>,
	sink: Option<StreamSink>,
}

impl RpcStream {
	/// Stream the peer reads; write into the returned sink.
	pub fn readable(object_mode: bool) -> (Self, StreamSink) {
		let (sink, source) = channel(DEFAULT_STREAM_BUFFER);
		let stream = Self {
			object_mode,
			source: Some(source),
			sink: None,
		};
		(stream, sink)
	}

	/// Stream the peer writes; read from the returned source.
	pub fn writable(object_mode: bool) -> (Self, StreamSource) {
		let (sink, source) = channel(DEFAULT_STREAM_BUFFER);
		let stream = Self {
			object_mode,
			source: None,
			sink: Some(sink),
		};
		(stream, source)
	}

	/// Both directions at once.
	pub fn duplex(object_mode: bool) -> (Self, StreamSink, StreamSource) {
		let (outgoing, source) = channel(DEFAULT_STREAM_BUFFER);
		let (sink, incoming) = channel(DEFAULT_STREAM_BUFFER);
		let stream = Self {
			object_mode,
			source: Some(source),
			sink: Some(sink),
		};
		(stream, outgoing, incoming)
	}

	/// Builds the stand-in for a received spec along with the ends the
	/// session pumps: a sink feeding the stand-in's source, and a source
	/// draining the stand-in's sink.
	pub(crate) fn stand_in(spec: StreamSpec, capacity: usize) -> (Self, Option<StreamSink>, Option<StreamSource>) {
		let mut stream = Self {
			object_mode: spec.object_mode,
			source: None,
			sink: None,
		};

		let feed = spec.is_readable().then(|| {
			let (sink, source) = channel(capacity);
			stream.source = Some(source);
			sink
		});
		let drain = spec.is_writable().then(|| {
			let (sink, source) = channel(capacity);
			stream.sink = Some(sink);
			source
		});

		(stream, feed, drain)
	}

	pub fn spec(&self) -> StreamSpec {
		let mut direction = 0;
		if self.source.is_some() {
			direction |= READABLE;
		}
		if self.sink.is_some() {
			direction |= WRITABLE;
		}
		StreamSpec {
			direction,
			object_mode: self.object_mode,
		}
	}

	pub fn is_readable(&self) -> bool {
		self.source.is_some()
	}

	pub fn is_writable(&self) -> bool {
		self.sink.is_some()
	}

	pub fn is_duplex(&self) -> bool {
		self.spec().direction == DUPLEX
	}

	pub fn object_mode(&self) -> bool {
		self.object_mode
	}

	/// Takes the readable end; on a received stand-in this yields what the peer writes.
	pub fn take_source(&mut self) -> Option<StreamSource> {
		self.source.take()
	}

	/// Takes the writable end; on a received stand-in this feeds the peer.
	pub fn take_sink(&mut self) -> Option<StreamSink> {
		self.sink.take()
	}

	pub fn into_parts(self) -> (Option<StreamSource>, Option<StreamSink>) {
		(self.source, self.sink)
	}
}

/// Sub-stream name for one direction of a stream argument.
pub(crate) fn channel_name(id: &str, direction: u8) -> String {
	format!("{id}-{direction}")
}

/// Copies chunks from a local source onto a sub-stream, then half-closes it.
///
/// Byte chunks larger than one frame go out as several frames. An object
/// chunk that does not fit aborts the sub-stream without END.
pub(crate) async fn pump_out(mut source: StreamSource, tx: SubStreamSender) {
	let max = tx.max_payload_len().max(1);
	while let Some(chunk) = source.recv().await {
		let split = matches!(chunk, Chunk::Bytes(_));
		let mut bytes = match chunk.into_wire() {
			Ok(bytes) => bytes,
			Err(e) => {
				tracing::warn!(name = tx.name(), "Skipping stream chunk: {}", e);
				continue;
			}
		};

		let sent = if split {
			loop {
				let piece = bytes.split_to(bytes.len().min(max));
				let sent = tx.send(piece);
				if sent.is_err() || bytes.is_empty() {
					break sent;
				}
			}
		} else {
			tx.send(bytes)
		};

		match sent {
			Ok(()) => {}
			Err(rpcstream_runtime::Error::ChannelClosed) => {
				tracing::debug!(name = tx.name(), "Stream pump stopped: connection closed");
				return;
			}
			Err(e) => {
				tracing::warn!(name = tx.name(), "Aborting stream: {}", e);
				tx.abort();
				return;
			}
		}
	}
	tx.close();
}

/// Copies a sub-stream into a local sink until the peer half-closes.
pub(crate) async fn pump_in(mut rx: SubStreamReceiver, sink: StreamSink, object_mode: bool) {
	while let Some(bytes) = rx.recv().await {
		let chunk = match Chunk::from_wire(bytes, object_mode) {
			Ok(chunk) => chunk,
			Err(e) => {
				tracing::warn!(name = rx.name(), "Skipping undecodable stream chunk: {}", e);
				continue;
			}
		};
		if sink.send(chunk).await.is_err() {
			tracing::debug!(name = rx.name(), "Stream reader dropped, discarding remaining data");
			return;
		}
	}
}
