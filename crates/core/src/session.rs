//! Session lifecycle and the driver loop.
//!
//! # Message Flow
//!
//! 1. [`Session::connect`] sends this side's MANIFEST and spawns two tasks:
//!    the multiplexer driver and the session driver
//! 2. The session driver reads the control channel; anything but a MANIFEST
//!    arriving before the peer's manifest is queued
//! 3. The first MANIFEST fixes the id prefix, builds the [`Remote`] tree and
//!    drains the queue in arrival order
//! 4. Every later CALL/RETURN goes straight to the dispatcher
//! 5. When the connection ends, pending invocations fail with
//!    [`Error::SessionClosed`] and every registry is cleared

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

use regex_lite::Regex;
use rpcstream_protocol::{Message, codec};
use rpcstream_runtime::{CONTROL_CHANNEL, Multiplex, SubStreamReceiver, SubStreamSender};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::api::Api;
use crate::capability::Instances;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::manifest::{build_manifest, negotiate};
use crate::options::SessionOptions;
use crate::registry::Registry;
use crate::remote::Remote;

/// Sub-stream names the peer may open on its own: `<capability id>-<direction>`.
static STREAM_CHANNEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.]+-[0-3]$").unwrap());

/// State shared by the session handle, the driver and every proxy.
pub(crate) struct Shared {
	pub(crate) options: SessionOptions,
	pub(crate) nonce: u32,
	prefix: OnceLock<Arc<str>>,
	counter: AtomicU64,
	pub(crate) api: Api,
	pub(crate) registry: Registry,
	pub(crate) mux: Multiplex,
	control: SubStreamSender,
}

impl Shared {
	/// Encodes and queues one control message.
	pub(crate) fn send(&self, message: &Message) -> Result<()> {
		if self.options.log {
			tracing::trace!(direction = "send", ?message, "control message");
		}
		let bytes = codec::encode(message)?;
		self.control.send(bytes).map_err(|e| match e {
			rpcstream_runtime::Error::ChannelClosed => Error::SessionClosed,
			other => Error::Transport(other),
		})
	}

	/// Allocates the next capability id: `<prefix>.<counter>`.
	pub(crate) fn next_id(&self) -> Result<Arc<str>> {
		let prefix = self.prefix.get().ok_or(Error::NotReady)?;
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::from(format!("{prefix}.{n}")))
	}

	fn settle_prefix(&self, remote_nonce: u32) -> Arc<str> {
		Arc::clone(
			self.prefix
				.get_or_init(|| Arc::from(negotiate(self.nonce, remote_nonce))),
		)
	}
}

/// One side of an rpcstream connection.
///
/// The session lives as long as this handle: dropping it stops both tasks
/// and closes the connection.
pub struct Session {
	shared: Arc<Shared>,
	remote: watch::Receiver<Option<Remote>>,
	driver: Option<JoinHandle<()>>,
	transport: JoinHandle<()>,
}

impl Session {
	/// Starts a session over `io`, exposing `api` to the peer.
	///
	/// Must be called inside a Tokio runtime.
	pub fn connect<T>(io: T, api: Api, options: SessionOptions) -> Result<Self>
	where
		T: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (mux, mux_driver) = Multiplex::from_io(io, |name: &str| STREAM_CHANNEL.is_match(name), options.max_frame_len);
		let (control, control_rx) = mux.shared_stream(CONTROL_CHANNEL)?.split();

		let prefix = OnceLock::new();
		if let Some(fixed) = options.prefix.as_deref() {
			let _ = prefix.set(Arc::from(fixed));
		}

		let shared = Arc::new(Shared {
			nonce: rand::random(),
			prefix,
			counter: AtomicU64::new(0),
			api,
			registry: Registry::default(),
			mux,
			control,
			options,
		});

		let span = tracing::debug_span!(
			"session",
			name = %shared.options.name,
			prefix = tracing::field::Empty
		);

		let transport = tokio::spawn(
			async move {
				if let Err(e) = mux_driver.run().await {
					tracing::error!("Transport read error: {}", e);
				}
			}
			.instrument(span.clone()),
		);

		shared.send(&Message::Manifest {
			manifest: build_manifest(&shared.api),
			nonce: shared.nonce,
		})?;

		let (remote_tx, remote) = watch::channel(None);
		let driver = tokio::spawn(drive(Arc::clone(&shared), control_rx, remote_tx).instrument(span));

		Ok(Self {
			shared,
			remote,
			driver: Some(driver),
			transport,
		})
	}

	/// Waits for the peer's manifest and returns its capability tree.
	pub async fn remote(&self) -> Result<Remote> {
		let mut rx = self.remote.clone();
		let ready = rx.wait_for(Option::is_some).await.map_err(|_| Error::SessionClosed)?;
		ready.clone().ok_or(Error::SessionClosed)
	}

	/// The peer's capability tree, if its manifest has arrived.
	pub fn try_remote(&self) -> Option<Remote> {
		self.remote.borrow().clone()
	}

	pub fn is_ready(&self) -> bool {
		self.remote.borrow().is_some()
	}

	/// Id prefix in use, once fixed.
	pub fn prefix(&self) -> Option<&str> {
		self.shared.prefix.get().map(|p| &**p)
	}

	/// Random nonce sent with this side's manifest.
	pub fn nonce(&self) -> u32 {
		self.shared.nonce
	}

	pub fn options(&self) -> &SessionOptions {
		&self.shared.options
	}

	pub fn api(&self) -> &Api {
		&self.shared.api
	}

	/// Instances the peer constructed over this session. Emptied on teardown.
	pub fn instances(&self) -> Arc<Instances> {
		Arc::clone(self.shared.registry.instances())
	}

	/// Waits until the peer disconnects.
	///
	/// Returns [`Error::DriverPanicked`] if a local handler panicked.
	pub async fn closed(mut self) -> Result<()> {
		let Some(driver) = self.driver.take() else {
			return Ok(());
		};
		match driver.await {
			Ok(()) => Ok(()),
			Err(e) if e.is_panic() => {
				let payload = e.into_panic();
				let message = payload
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| payload.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic".to_string());
				Err(Error::DriverPanicked(message))
			}
			Err(_) => Err(Error::SessionClosed),
		}
	}

	/// Closes the connection and releases every registry entry.
	pub fn close(self) {
		drop(self);
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Some(driver) = self.driver.take() {
			driver.abort();
		}
		self.transport.abort();
		self.shared.registry.clear();
	}
}

/// Reads the control channel until the connection ends.
async fn drive(shared: Arc<Shared>, mut control: SubStreamReceiver, remote_tx: watch::Sender<Option<Remote>>) {
	let mut backlog: VecDeque<Message> = VecDeque::new();
	let mut ready = false;

	while let Some(bytes) = control.recv().await {
		let message = match codec::decode(&bytes) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!("Dropping undecodable control message: {}", e);
				continue;
			}
		};
		if shared.options.log {
			tracing::trace!(direction = "recv", ?message, "control message");
		}

		match message {
			Message::Manifest { manifest, nonce } if !ready => {
				let prefix = shared.settle_prefix(nonce);
				tracing::Span::current().record("prefix", &*prefix);
				tracing::debug!(remote_nonce = nonce, entries = manifest.len(), "Received remote manifest");

				remote_tx.send_replace(Some(Remote::build(&Arc::downgrade(&shared), manifest)));
				ready = true;

				for queued in backlog.drain(..) {
					dispatch::dispatch(&shared, queued);
				}
			}
			other if !ready => {
				tracing::debug!(queued = backlog.len() + 1, "Queueing message until the remote manifest arrives");
				backlog.push_back(other);
			}
			other => dispatch::dispatch(&shared, other),
		}
	}

	tracing::debug!("Control channel closed");
	shared.registry.clear();
}
