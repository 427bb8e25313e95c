// Shared helpers for the session integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpcstream::protocol::{self, Manifest, Message};
use rpcstream::runtime::{CONTROL_CHANNEL, DEFAULT_MAX_FRAME_LEN, Multiplex, SubStreamReceiver, SubStreamSender};
use rpcstream::{Api, Arg, Args, Callback, Capability, Construct, Interface, Reply, Session, SessionOptions};
use tokio::sync::mpsc;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rpcstream=debug")),
		)
		.with_test_writer()
		.try_init();
}

/// Connects two sessions over an in-memory pipe.
pub fn pair(server_api: Api, server: SessionOptions, client_api: Api, client: SessionOptions) -> (Session, Session) {
	init_tracing();
	let (a, b) = tokio::io::duplex(1 << 20);
	let server = Session::connect(a, server_api, server.name("server")).expect("server session");
	let client = Session::connect(b, client_api, client.name("client")).expect("client session");
	(server, client)
}

/// Server exposing `api`, client exposing nothing.
pub fn serve(api: Api) -> (Session, Session) {
	pair(api, SessionOptions::new(), Api::new(), SessionOptions::new())
}

/// Same as [`serve`] with promise mode on both sides.
pub fn serve_promises(api: Api) -> (Session, Session) {
	pair(
		api,
		SessionOptions::new().promise(true),
		Api::new(),
		SessionOptions::new().promise(true),
	)
}

pub async fn within<F: Future>(future: F) -> F::Output {
	tokio::time::timeout(TIMEOUT, future).await.expect("timed out")
}

/// A callback that forwards every invocation to the returned receiver.
pub fn capture() -> (Callback, mpsc::UnboundedReceiver<Args>) {
	let (tx, rx) = mpsc::unbounded_channel();
	let cb = Callback::new(move |args: Args| {
		let _ = tx.send(args);
	});
	(cb, rx)
}

/// Receives the next captured invocation's first argument as a string.
pub async fn next_str(rx: &mut mpsc::UnboundedReceiver<Args>) -> String {
	let args = within(rx.recv()).await.expect("callback channel closed");
	args.str(0).expect("string argument").to_string()
}

/// Test class: `getUpper(suffix, cb?)` yields `(prefix + key + suffix).to_uppercase()`.
pub struct MyClass {
	pub key: String,
	pub prefix: String,
}

impl Capability for MyClass {
	fn interface() -> Interface {
		Interface::new("MyClass").methods(["setPrefix", "getUpper", "_private"])
	}

	fn invoke(&mut self, method: &str, args: Args) -> Reply {
		match method {
			"setPrefix" => {
				self.prefix = args.str(0).unwrap_or_default().to_string();
				Reply::Unit
			}
			"getUpper" => {
				let upper = format!("{}{}{}", self.prefix, self.key, args.str(0).unwrap_or_default()).to_uppercase();
				if let Some(cb) = args.callback(1) {
					let _ = cb.call(Arg::from(upper.as_str()));
				}
				Reply::ok(upper)
			}
			"_private" => Reply::ok("private"),
			other => Reply::err(format!("no method {other}")),
		}
	}
}

impl Construct for MyClass {
	fn construct(args: Args) -> Self {
		MyClass {
			key: args.str(0).unwrap_or_default().to_string(),
			prefix: String::new(),
		}
	}
}

/// Counts factory invocations.
pub fn counting_factory(counter: Arc<AtomicUsize>) -> impl Fn(Args) -> MyClass + Send + Sync + 'static {
	move |args| {
		counter.fetch_add(1, Ordering::SeqCst);
		MyClass::construct(args)
	}
}

/// A peer speaking the wire protocol by hand.
pub struct RawPeer {
	pub mux: Multiplex,
	tx: SubStreamSender,
	rx: SubStreamReceiver,
	driver: tokio::task::JoinHandle<()>,
}

impl RawPeer {
	/// Connects a raw peer to a real session exposing `api`.
	pub fn connect(api: Api, options: SessionOptions) -> (Session, RawPeer) {
		init_tracing();
		let (a, b) = tokio::io::duplex(1 << 20);
		let session = Session::connect(a, api, options.name("session")).expect("session");

		let (mux, driver) = Multiplex::from_io(b, |_: &str| true, DEFAULT_MAX_FRAME_LEN);
		let (tx, rx) = mux.shared_stream(CONTROL_CHANNEL).expect("control channel").split();
		let driver = tokio::spawn(async move {
			let _ = driver.run().await;
		});

		(session, RawPeer { mux, tx, rx, driver })
	}

	pub fn send(&self, message: &Message) {
		let bytes = protocol::encode(message).expect("encode");
		self.tx.send(bytes).expect("send");
	}

	pub fn send_raw(&self, bytes: bytes::Bytes) {
		self.tx.send(bytes).expect("send");
	}

	pub fn send_manifest(&self, manifest: Manifest, nonce: u32) {
		self.send(&Message::Manifest { manifest, nonce });
	}

	pub async fn recv(&mut self) -> Message {
		let bytes = within(self.rx.recv()).await.expect("control channel closed");
		protocol::decode(&bytes).expect("decode")
	}

	/// Skips messages until one that is not a manifest arrives.
	pub async fn recv_non_manifest(&mut self) -> Message {
		loop {
			match self.recv().await {
				Message::Manifest { .. } => continue,
				other => return other,
			}
		}
	}
}

impl Drop for RawPeer {
	fn drop(&mut self) {
		self.driver.abort();
	}
}
