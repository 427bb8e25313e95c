//! Argument conversion between [`Arg`] and [`TaggedArg`].
//!
//! Every argument gets a capability id derived from the id of the message
//! carrying it: `<message id>.<index>`. Exported capabilities, callbacks and
//! stream sub-streams are all keyed by that id, so both sides agree on them
//! without extra round trips.

use std::sync::Arc;

use bytes::Bytes;
use rpcstream_protocol::{READABLE, StreamSpec, TaggedArg, WRITABLE};

use crate::arg::{Arg, Args, RemoteError};
use crate::callback::Callback;
use crate::remote::RemoteObject;
use crate::session::Shared;
use crate::stream::{self, RpcStream};

/// Id of the argument at `index` in the message `id`.
pub(crate) fn arg_id(id: &str, index: usize) -> Arc<str> {
	Arc::from(format!("{id}.{index}"))
}

/// Converts outgoing arguments, registering whatever the peer may call back into.
pub(crate) fn prepare(shared: &Arc<Shared>, id: &str, args: Args) -> Vec<TaggedArg> {
	args.into_iter()
		.enumerate()
		.map(|(index, arg)| prepare_arg(shared, arg_id(id, index), arg))
		.collect()
}

fn prepare_arg(shared: &Arc<Shared>, id: Arc<str>, arg: Arg) -> TaggedArg {
	match arg {
		Arg::Rpcified(wrapper) => {
			let manifest = wrapper.to_manifest();
			shared.registry.export(id, wrapper);
			TaggedArg::Rpcified(manifest)
		}
		Arg::Remote(object) => {
			tracing::warn!(
				id = %id,
				object = object.id(),
				"Remote objects cannot be passed back to a peer, sending null"
			);
			TaggedArg::Json(serde_json::Value::Null)
		}
		Arg::Error(err) => TaggedArg::Error(err.to_payload(shared.options.error_fields)),
		Arg::Callback(callback) => {
			let wire_id = id.to_string();
			shared.registry.register_callback(id, callback);
			TaggedArg::Callback(wire_id)
		}
		Arg::Stream(rpc_stream) => TaggedArg::Stream(splice_out(shared, &id, rpc_stream)),
		Arg::Bytes(bytes) => TaggedArg::Bytes(bytes.to_vec()),
		Arg::Json(value) => TaggedArg::Json(value),
	}
}

/// Converts incoming arguments into local values and stand-ins.
pub(crate) fn resolve(shared: &Arc<Shared>, id: &str, args: Vec<TaggedArg>) -> Args {
	args.into_iter()
		.enumerate()
		.map(|(index, arg)| resolve_arg(shared, arg_id(id, index), arg))
		.collect()
}

fn resolve_arg(shared: &Arc<Shared>, id: Arc<str>, arg: TaggedArg) -> Arg {
	match arg {
		TaggedArg::Rpcified(manifest) => Arg::Remote(RemoteObject::new(&Arc::downgrade(shared), &manifest, id, None)),
		TaggedArg::Error(payload) => Arg::Error(RemoteError::from(payload)),
		TaggedArg::Callback(callback_id) => Arg::Callback(Callback::remote(Arc::from(callback_id), Arc::downgrade(shared))),
		TaggedArg::Stream(spec) => Arg::Stream(splice_in(shared, &id, spec)),
		TaggedArg::Bytes(bytes) => Arg::Bytes(Bytes::from(bytes)),
		TaggedArg::Json(value) => Arg::Json(value),
	}
}

/// Wires a local stream to its sub-streams: the source feeds `<id>-1`, `<id>-2` feeds the sink.
fn splice_out(shared: &Shared, id: &str, rpc_stream: RpcStream) -> StreamSpec {
	let spec = rpc_stream.spec();
	let object_mode = spec.object_mode;
	let (source, sink) = rpc_stream.into_parts();

	if let Some(source) = source {
		let name = stream::channel_name(id, READABLE);
		match shared.mux.sender(&name) {
			Ok(tx) => {
				tokio::spawn(stream::pump_out(source, tx));
			}
			Err(e) => tracing::warn!(name = %name, "Cannot open stream channel: {}", e),
		}
	}
	if let Some(sink) = sink {
		let name = stream::channel_name(id, WRITABLE);
		match shared.mux.receiver(&name) {
			Ok(rx) => {
				tokio::spawn(stream::pump_in(rx, sink, object_mode));
			}
			Err(e) => tracing::warn!(name = %name, "Cannot open stream channel: {}", e),
		}
	}

	spec
}

/// Builds the stand-in for a received stream and wires it to the same sub-streams.
fn splice_in(shared: &Shared, id: &str, spec: StreamSpec) -> RpcStream {
	let (stand_in, feed, drain) = RpcStream::stand_in(spec, shared.options.stream_buffer);

	if let Some(feed) = feed {
		let name = stream::channel_name(id, READABLE);
		match shared.mux.receiver(&name) {
			Ok(rx) => {
				tokio::spawn(stream::pump_in(rx, feed, spec.object_mode));
			}
			Err(e) => tracing::warn!(name = %name, "Cannot open stream channel: {}", e),
		}
	}
	if let Some(drain) = drain {
		let name = stream::channel_name(id, WRITABLE);
		match shared.mux.sender(&name) {
			Ok(tx) => {
				tokio::spawn(stream::pump_out(drain, tx));
			}
			Err(e) => tracing::warn!(name = %name, "Cannot open stream channel: {}", e),
		}
	}

	stand_in
}
