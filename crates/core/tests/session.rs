// Integration tests for session setup, function calls, callbacks and promises.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use common::{RawPeer, capture, next_str, pair, serve, serve_promises, within};
use rpcstream::protocol::{Call, CallKind, Manifest, ManifestEntry, Message, PromiseResult, Return, ReturnKind, TaggedArg};
use rpcstream::{Api, Arg, Args, Error, ErrorFields, RemoteError, Reply, Rpcified, Session, SessionOptions};
use serde_json::json;

fn upper_api() -> Api {
	Api::new().function("upper", |args: Args| {
		let text = args.str(0).unwrap_or_default().to_uppercase();
		if let Some(cb) = args.callback(1) {
			let _ = cb.call(Arg::from(text));
		}
		Reply::Unit
	})
}

#[tokio::test]
async fn test_remote_tree_mirrors_manifest() {
	let api = upper_api()
		.value("version", 3)
		.value("label", "rpc")
		.value("enabled", true)
		.value("tags", json!(["not", "a", "literal"]))
		.value("a.b", 1)
		.namespace("math", Api::new().function("add", |_| Reply::Unit))
		.constructor("myclass", Rpcified::class::<common::MyClass>());
	let (_server, client) = serve(api);

	let remote = within(client.remote()).await.unwrap();
	assert_eq!(remote.value("version").unwrap(), &json!(3));
	assert_eq!(remote.value("label").unwrap(), &json!("rpc"));
	assert_eq!(remote.value("enabled").unwrap(), &json!(true));
	assert!(remote.function("upper").is_ok());
	assert!(remote.function("math.add").is_ok());
	assert_eq!(remote.constructor("myclass").unwrap().methods(), ["setPrefix", "getUpper"]);

	assert!(matches!(remote.get("tags"), Err(Error::NotFound(_))));
	assert!(!remote.names().any(|name| name == "a.b"));
	assert!(client.is_ready());
}

#[tokio::test]
async fn test_prefixes_are_disjoint() {
	let (server, client) = serve(Api::new());
	within(server.remote()).await.unwrap();
	within(client.remote()).await.unwrap();

	let (s, c) = (server.prefix().unwrap(), client.prefix().unwrap());
	assert_ne!(s, c);
	if server.nonce() != client.nonce() {
		let mut both = [s, c];
		both.sort();
		assert_eq!(both, ["A", "B"]);
	}
}

#[tokio::test]
async fn test_callback_fires_exactly_once() {
	let (_server, client) = serve(upper_api());
	let remote = within(client.remote()).await.unwrap();

	let (cb, mut rx) = capture();
	remote.call("upper", vec![Arg::from("abc"), Arg::from(cb)]).unwrap();

	assert_eq!(next_str(&mut rx).await, "ABC");
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_callbacks_fire_repeatedly_unless_once() {
	let api = Api::new().function("repeat", |args: Args| {
		let times = args.json(0).and_then(|v| v.as_u64()).unwrap_or(0);
		if let Some(cb) = args.callback(1) {
			for i in 0..times {
				let _ = cb.call(Arg::from(i));
			}
		}
		Reply::Unit
	});
	let (_server, client) = serve(api);
	let remote = within(client.remote()).await.unwrap();

	let (cb, mut rx) = capture();
	remote.call("repeat", vec![Arg::from(3u64), Arg::from(cb)]).unwrap();
	for expected in 0..3u64 {
		let args = within(rx.recv()).await.unwrap();
		assert_eq!(args.json(0), Some(&json!(expected)));
	}

	let fired = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&fired);
	let once = rpcstream::Callback::once(move |_| {
		counter.fetch_add(1, Ordering::SeqCst);
	});
	remote.call("repeat", vec![Arg::from(3u64), Arg::from(once)]).unwrap();

	// A later round trip proves the earlier invocations were processed.
	let (cb, mut rx) = capture();
	remote.call("repeat", vec![Arg::from(1u64), Arg::from(cb)]).unwrap();
	within(rx.recv()).await.unwrap();
	assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_promise_resolves_with_value() {
	let api = Api::new()
		.function("add", |args: Args| {
			let sum: i64 = args.iter().filter_map(|a| a.as_json()?.as_i64()).sum();
			Reply::ok(sum)
		})
		.function("noop", |_| Reply::Unit);
	let (_server, client) = serve_promises(api);
	let remote = within(client.remote()).await.unwrap();

	let invocation = remote.call("add", vec![Arg::from(2i64), Arg::from(3i64)]).unwrap();
	assert!(invocation.is_pending());
	let sum = within(invocation).await.unwrap();
	assert_eq!(sum.as_json().and_then(|v| v.as_i64()), Some(5));

	let unit = within(remote.call("noop", ()).unwrap()).await.unwrap();
	assert!(unit.is_null());
}

#[tokio::test]
async fn test_promise_rejection_carries_error_fields() {
	let fail = |_: Args| Reply::err(RemoteError::new("too big").with_name("RangeError").with_stack("at fail"));

	let (_server, client) = serve_promises(Api::new().function("fail", fail));
	let remote = within(client.remote()).await.unwrap();
	let err = within(remote.call("fail", ()).unwrap()).await.unwrap_err();
	assert_eq!(err.error_name(), Some("Error"));
	assert!(err.stack_trace().is_none());
	assert_eq!(err.to_string(), "Error: too big");

	let (_server, client) = pair(
		Api::new().function("fail", fail),
		SessionOptions::new().promise(true).error_fields(ErrorFields::Full),
		Api::new(),
		SessionOptions::new().promise(true),
	);
	let remote = within(client.remote()).await.unwrap();
	let err = within(remote.call("fail", ()).unwrap()).await.unwrap_err();
	assert_eq!(err.error_name(), Some("RangeError"));
	assert_eq!(err.stack_trace(), Some("at fail"));
}

#[tokio::test]
async fn test_future_replies_settle_later() {
	let api = Api::new().function("slow", |args: Args| {
		let n = args.json(0).and_then(|v| v.as_i64()).unwrap_or(0);
		Reply::future(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			if n < 0 {
				Err(RemoteError::new("negative"))
			} else {
				Ok(Arg::from(n * 2))
			}
		})
	});
	let (_server, client) = serve_promises(api);
	let remote = within(client.remote()).await.unwrap();

	let doubled = within(remote.call("slow", vec![Arg::from(21i64)]).unwrap()).await.unwrap();
	assert_eq!(doubled.as_json(), Some(&json!(42)));

	let err = within(remote.call("slow", vec![Arg::from(-1i64)]).unwrap()).await.unwrap_err();
	assert!(matches!(err, Error::Remote { ref message, .. } if message == "negative"));
}

#[tokio::test]
async fn test_awaiting_without_promise_mode_fails() {
	let (_server, client) = serve(upper_api());
	let remote = within(client.remote()).await.unwrap();

	let invocation = remote.call("upper", vec![Arg::from("x")]).unwrap();
	assert!(!invocation.is_pending());
	assert!(matches!(invocation.await, Err(Error::PromiseModeDisabled)));
}

#[tokio::test]
async fn test_argument_fidelity() {
	let api = Api::new().function("echo", |args: Args| Reply::ok(args.into_first()));
	let (_server, client) = serve_promises(api);
	let remote = within(client.remote()).await.unwrap();

	let raw = Bytes::from_static(&[0, 1, 2, 254, 255]);
	let back = within(remote.call("echo", vec![Arg::bytes(raw.clone())]).unwrap()).await.unwrap();
	assert_eq!(back.as_bytes(), Some(&raw));

	let value = json!({"list": [1, 2.5, "three"], "nested": {"none": null, "yes": true}});
	let back = within(remote.call("echo", vec![Arg::json(&value)]).unwrap()).await.unwrap();
	assert_eq!(back.as_json(), Some(&value));

	let back = within(remote.call("echo", vec![Arg::error("bad input")]).unwrap()).await.unwrap();
	assert_eq!(back.as_error().map(|e| e.message.as_str()), Some("bad input"));
}

#[tokio::test]
async fn test_pending_calls_fail_when_peer_goes_away() {
	let api = Api::new().function("never", |_| Reply::future(std::future::pending()));
	let (server, client) = serve_promises(api);
	let remote = within(client.remote()).await.unwrap();

	let invocation = remote.call("never", ()).unwrap();
	drop(server);

	let err = within(invocation).await.unwrap_err();
	assert!(err.is_closed(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unsendable_result_rejects_the_promise() {
	let api = Api::new().function("huge", |_| Reply::ok("x".repeat(8000)));
	let (_server, client) = pair(
		api,
		SessionOptions::new().promise(true).max_frame_len(4096),
		Api::new(),
		SessionOptions::new().promise(true),
	);
	let remote = within(client.remote()).await.unwrap();

	let err = within(remote.call("huge", ()).unwrap()).await.unwrap_err();
	assert!(
		matches!(err, Error::Remote { ref message, .. } if message.contains("4096 byte limit")),
		"unexpected error: {err}"
	);
}

#[tokio::test]
async fn test_handler_panic_surfaces_on_closed() {
	let api = Api::new().function("explode", |_| panic!("handler exploded"));
	let (server, client) = serve(api);
	let remote = within(client.remote()).await.unwrap();

	remote.call("explode", ()).unwrap();

	let err = within(server.closed()).await.unwrap_err();
	assert!(matches!(err, Error::DriverPanicked(ref msg) if msg.contains("handler exploded")));
}

#[tokio::test]
async fn test_dropped_invocation_ignores_late_reply() {
	let api = Api::new().function("slow", |_| {
		Reply::future(async {
			tokio::time::sleep(Duration::from_millis(30)).await;
			Ok(Arg::from("late"))
		})
	});
	let (_server, client) = serve_promises(api);
	let remote = within(client.remote()).await.unwrap();

	drop(remote.call("slow", ()).unwrap());
	tokio::time::sleep(Duration::from_millis(60)).await;

	let value = within(remote.call("slow", ()).unwrap()).await.unwrap();
	assert_eq!(value.as_str(), Some("late"));
}

#[tokio::test]
async fn test_calls_before_manifest_are_queued() {
	let (seen_tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
	let api = Api::new().function("note", move |args: Args| {
		let _ = seen_tx.send(args.str(0).unwrap_or_default().to_string());
		Reply::Unit
	});
	let (session, mut peer) = RawPeer::connect(api, SessionOptions::new());

	for (i, text) in ["first", "second"].into_iter().enumerate() {
		peer.send(&Message::Call(Call {
			kind: CallKind::Api,
			id: format!("R.{i}"),
			name: Some("note".into()),
			object_id: None,
			method: None,
			args: vec![TaggedArg::Json(json!(text))],
		}));
	}
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(seen.try_recv().is_err());
	assert!(!session.is_ready());

	peer.send_manifest(Manifest::new(), 7);
	assert_eq!(within(seen.recv()).await.unwrap(), "first");
	assert_eq!(within(seen.recv()).await.unwrap(), "second");
	assert!(session.is_ready());

	// The session's own manifest went out first.
	assert!(matches!(peer.recv().await, Message::Manifest { .. }));
}

#[tokio::test]
async fn test_wire_shape_of_callback_return() {
	let (_session, mut peer) = RawPeer::connect(upper_api(), SessionOptions::new());
	peer.send_manifest(Manifest::new(), 7);

	peer.send(&Message::Call(Call {
		kind: CallKind::Api,
		id: "R.0".into(),
		name: Some("upper".into()),
		object_id: None,
		method: None,
		args: vec![TaggedArg::Json(json!("abc")), TaggedArg::Callback("R.0.1".into())],
	}));

	assert_eq!(
		peer.recv_non_manifest().await,
		Message::Return(Return {
			kind: ReturnKind::Callback,
			id: "R.0.1".into(),
			args: vec![TaggedArg::Json(json!("ABC"))],
			promise_result: None,
		})
	);
}

#[tokio::test]
async fn test_only_first_promise_return_counts() {
	let (session, mut peer) = RawPeer::connect(Api::new(), SessionOptions::new().promise(true));
	let mut manifest = Manifest::new();
	manifest.insert("ask".into(), ManifestEntry::Function);
	peer.send_manifest(manifest, 7);

	let remote = within(session.remote()).await.unwrap();
	let first = remote.call("ask", ()).unwrap();
	let id = first.id().to_string();

	let Message::Call(call) = peer.recv_non_manifest().await else {
		panic!("expected a call");
	};
	assert_eq!(call.id, id);
	assert_eq!(call.name.as_deref(), Some("ask"));

	for answer in ["one", "two"] {
		peer.send(&Message::Return(Return {
			kind: ReturnKind::Promise,
			id: id.clone(),
			args: vec![TaggedArg::Json(json!(answer))],
			promise_result: Some(PromiseResult::Resolve),
		}));
	}
	assert_eq!(within(first).await.unwrap().as_str(), Some("one"));

	// Still healthy afterwards.
	let second = remote.call("ask", ()).unwrap();
	let Message::Call(call) = peer.recv_non_manifest().await else {
		panic!("expected a call");
	};
	peer.send(&Message::Return(Return {
		kind: ReturnKind::Promise,
		id: call.id,
		args: vec![TaggedArg::Json(json!("three"))],
		promise_result: Some(PromiseResult::Reject),
	}));
	let err = within(second).await.unwrap_err();
	assert_eq!(err.to_string(), "Error: three");
}

#[tokio::test]
async fn test_garbage_from_peer_is_ignored() {
	let (session, mut peer) = RawPeer::connect(upper_api(), SessionOptions::new());
	let mut manifest = Manifest::new();
	manifest.insert("first".into(), ManifestEntry::Function);
	peer.send_manifest(manifest, 7);
	let remote = within(session.remote()).await.unwrap();

	// Repeated manifest.
	let mut other = Manifest::new();
	other.insert("second".into(), ManifestEntry::Function);
	peer.send_manifest(other, 8);

	// Channel name the session never accepts.
	let bogus = peer.mux.sender("bogus").unwrap();
	bogus.send(Bytes::from_static(b"noise")).unwrap();

	// Undecodable control message.
	peer.send_raw(Bytes::from_static(b"{\"type\":\"NOPE\"}"));

	// Unknown path, unknown object, unknown callback.
	peer.send(&Message::Call(Call {
		kind: CallKind::Api,
		id: "R.0".into(),
		name: Some("missing.path".into()),
		object_id: None,
		method: None,
		args: vec![TaggedArg::Callback("R.0.0".into())],
	}));
	peer.send(&Message::Call(Call {
		kind: CallKind::Object,
		id: "R.1".into(),
		name: None,
		object_id: Some("R.99".into()),
		method: Some("getUpper".into()),
		args: Vec::new(),
	}));
	peer.send(&Message::Return(Return {
		kind: ReturnKind::Callback,
		id: "B.404".into(),
		args: Vec::new(),
		promise_result: None,
	}));

	// A normal call still goes through.
	peer.send(&Message::Call(Call {
		kind: CallKind::Api,
		id: "R.2".into(),
		name: Some("upper".into()),
		object_id: None,
		method: None,
		args: vec![TaggedArg::Json(json!("ok")), TaggedArg::Callback("R.2.1".into())],
	}));
	let Message::Return(ret) = peer.recv_non_manifest().await else {
		panic!("expected a return");
	};
	assert_eq!(ret.id, "R.2.1");
	assert_eq!(ret.args, vec![TaggedArg::Json(json!("OK"))]);

	assert!(remote.function("first").is_ok());
	assert!(within(session.remote()).await.unwrap().function("second").is_err());
}

#[tokio::test]
async fn test_close_drops_the_connection() {
	let (server, client) = serve(upper_api());
	within(client.remote()).await.unwrap();

	server.close();
	within(client.closed()).await.unwrap();
}

#[tokio::test]
async fn test_options_are_exposed() {
	let (a, _b) = tokio::io::duplex(1024);
	let session = Session::connect(a, upper_api(), SessionOptions::new().name("named").stream_buffer(0)).unwrap();

	assert_eq!(session.options().name, "named");
	assert_eq!(session.options().stream_buffer, 1);
	assert!(session.api().get("upper").is_some());
	assert!(session.try_remote().is_none());
}
