//! Routing of inbound CALL and RETURN messages.

use std::sync::Arc;

use rpcstream_protocol::{Call, CallKind, Message, PromiseResult, Return, ReturnKind};
use serde_json::Value;

use crate::api::ApiEntry;
use crate::arg::{Arg, Args, RemoteError, Reply};
use crate::error::Error;
use crate::marshal;
use crate::session::Shared;

/// Handles one message once the session is ready.
pub(crate) fn dispatch(shared: &Arc<Shared>, message: Message) {
	match message {
		Message::Call(call) => on_call(shared, call),
		Message::Return(ret) => match ret.kind {
			ReturnKind::Callback => on_callback(shared, ret),
			ReturnKind::Promise => on_promise(shared, ret),
		},
		Message::Manifest { .. } => {
			tracing::debug!("Ignoring repeated manifest");
		}
	}
}

fn on_call(shared: &Arc<Shared>, call: Call) {
	let Call {
		kind,
		id,
		name,
		object_id,
		method,
		args,
	} = call;
	let args = marshal::resolve(shared, &id, args);

	let reply = match kind {
		CallKind::Api => {
			let Some(name) = name else {
				tracing::warn!(id = %id, "API call without a name, dropping");
				return;
			};
			match shared.api.resolve(&name) {
				Some(ApiEntry::Function(handler)) => Some(handler(args)),
				Some(ApiEntry::Constructor(wrapper)) => match object_id {
					None => {
						wrapper.make_new(shared.registry.instances(), &id, args);
						return;
					}
					Some(object_id) => {
						let Some(method) = method else {
							tracing::warn!(id = %id, name = %name, "Method call without a method name, dropping");
							return;
						};
						wrapper.make_call(shared.registry.instances(), &method, &object_id, args)
					}
				},
				Some(_) => {
					tracing::warn!(id = %id, name = %name, "Call target is not callable, dropping");
					return;
				}
				None => {
					tracing::warn!(id = %id, name = %name, "Call to unknown path, dropping");
					return;
				}
			}
		}
		CallKind::Object => {
			let (Some(object_id), Some(method)) = (object_id, method) else {
				tracing::warn!(id = %id, "Object call without object id or method, dropping");
				return;
			};
			let Some(wrapper) = shared.registry.export_of(&object_id) else {
				tracing::debug!(id = %id, object_id = %object_id, "Call to unknown object (ignored)");
				return;
			};
			wrapper.make_call(shared.registry.instances(), &method, &object_id, args)
		}
	};

	if let Some(reply) = reply {
		settle(shared, Arc::from(id), reply);
	}
}

/// Turns a handler reply into at most one RETURN PROMISE.
///
/// Outside promise mode nothing is sent, but reply futures still run.
fn settle(shared: &Arc<Shared>, id: Arc<str>, reply: Reply) {
	let promise = shared.options.promise;
	match reply {
		Reply::Unit if promise => send_settlement(shared, &id, Ok(None)),
		Reply::Value(value) if promise => send_settlement(shared, &id, Ok(Some(value))),
		Reply::Rejected(err) if promise => send_settlement(shared, &id, Err(err)),
		Reply::Future(future) => {
			let session = Arc::downgrade(shared);
			tokio::spawn(async move {
				let outcome = future.await;
				if !promise {
					return;
				}
				let Some(shared) = session.upgrade() else {
					tracing::debug!(id = %id, "Session closed before reply settled");
					return;
				};
				send_settlement(&shared, &id, outcome.map(Some));
			});
		}
		Reply::Unit | Reply::Value(_) | Reply::Rejected(_) => {}
	}
}

/// Sends the RETURN PROMISE for `id`. A settlement that cannot be sent (too
/// large for a frame, unencodable) is replaced by a rejection saying so.
fn send_settlement(shared: &Arc<Shared>, id: &Arc<str>, outcome: Result<Option<Arg>, RemoteError>) {
	let (result, args) = match outcome {
		Ok(value) => (PromiseResult::Resolve, value.map(Args::from).unwrap_or_default()),
		Err(err) => (PromiseResult::Reject, Args::from(Arg::Error(err))),
	};
	let e = match shared.send(&settlement(shared, id, result, args)) {
		Ok(()) => return,
		Err(Error::SessionClosed) => {
			tracing::debug!(id = %id, "Session closed before the settlement was sent");
			return;
		}
		Err(e) => e,
	};

	tracing::warn!(id = %id, "Could not send promise settlement, rejecting instead: {}", e);
	let reason = RemoteError::new(format!("Could not send result: {e}"));
	let fallback = settlement(shared, id, PromiseResult::Reject, Args::from(Arg::Error(reason)));
	if let Err(e) = shared.send(&fallback) {
		tracing::error!(id = %id, "Could not send promise rejection: {}", e);
	}
}

fn settlement(shared: &Arc<Shared>, id: &Arc<str>, result: PromiseResult, args: Args) -> Message {
	Message::Return(Return {
		kind: ReturnKind::Promise,
		id: id.to_string(),
		args: marshal::prepare(shared, id, args),
		promise_result: Some(result),
	})
}

fn on_callback(shared: &Arc<Shared>, ret: Return) {
	let Some(callback) = shared.registry.callback(&ret.id) else {
		tracing::warn!(id = %ret.id, "Invalid callback");
		return;
	};
	let args = marshal::resolve(shared, &ret.id, ret.args);
	if let Err(e) = callback.call(args) {
		tracing::debug!(id = %ret.id, "Callback forwarding failed: {}", e);
	}
}

fn on_promise(shared: &Arc<Shared>, ret: Return) {
	if !shared.options.promise {
		tracing::debug!(id = %ret.id, "Promise return without promise mode (ignored)");
		return;
	}
	let Some(tx) = shared.registry.take_pending(&ret.id) else {
		return;
	};

	let args = marshal::resolve(shared, &ret.id, ret.args);
	let result = match ret.promise_result {
		Some(PromiseResult::Reject) => Err(rejection(args.into_first())),
		Some(PromiseResult::Resolve) | None => Ok(args.into_first()),
	};
	// Receiver gone means the invocation was dropped after settling began.
	let _ = tx.send(result);
}

fn rejection(reason: Arg) -> Error {
	match reason {
		Arg::Error(err) => Error::from(err),
		Arg::Json(Value::String(message)) => Error::from(RemoteError::new(message)),
		Arg::Json(Value::Null) => Error::from(RemoteError::new("Promise rejected")),
		Arg::Json(value) => Error::from(RemoteError::new(value.to_string())),
		other => Error::from(RemoteError::new(format!("Promise rejected with {}", other.kind()))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_rejection_reasons() {
		let err = rejection(Arg::Error(RemoteError::new("nope").with_name("RangeError")));
		assert_eq!(err.error_name(), Some("RangeError"));
		assert_eq!(err.to_string(), "RangeError: nope");

		let err = rejection(Arg::from("plain"));
		assert_eq!(err.to_string(), "Error: plain");

		let err = rejection(Arg::null());
		assert!(matches!(err, Error::Remote { ref message, .. } if message == "Promise rejected"));
	}
}
