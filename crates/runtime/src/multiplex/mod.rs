//! Named sub-streams over one byte stream.
//!
//! # Message Flow
//!
//! 1. A caller asks for [`Multiplex::sender`] / [`Multiplex::receiver`] by name
//! 2. The channel slot is created if absent, reused otherwise
//! 3. [`SubStreamSender::send`] queues a DATA frame for the writer task
//! 4. The peer's reader loop routes the frame to its slot of the same name
//! 5. The peer's [`SubStreamReceiver::recv`] yields the payload
//!
//! Frames for a name the local side never opened create the slot on arrival,
//! provided the acceptor admits the name; others are logged and dropped. Until
//! a receiver claims such a slot it buffers at most [`UNCLAIMED_BACKLOG`]
//! frames. Each slot has its own inbound queue, so one slow consumer never
//! stalls the reader loop or any other sub-stream.
//!
//! A slot is removed once every half handed out for it has been dropped and,
//! if its receiver was taken, the peer's END has arrived.

mod frame;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use self::frame::{DEFAULT_MAX_FRAME_LEN, Frame, FrameKind};
use crate::error::{Error, Result};

/// Well-known name of the shared control channel.
pub const CONTROL_CHANNEL: &str = "rpc";

/// Frames buffered for a sub-stream no local receiver has claimed yet.
pub const UNCLAIMED_BACKLOG: usize = 1024;

type Acceptor = Box<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Half {
	Untaken,
	Live,
	Dropped,
}

/// Per-name channel state on one side of the connection.
struct Slot {
	inbound_tx: Option<mpsc::UnboundedSender<Bytes>>,
	inbound_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
	sender: Half,
	receiver: Half,
	unclaimed: usize,
}

impl Slot {
	fn new(open: bool) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			inbound_tx: open.then_some(tx),
			inbound_rx: Some(rx),
			sender: Half::Untaken,
			receiver: Half::Untaken,
			unclaimed: 0,
		}
	}

	fn is_spent(&self) -> bool {
		let released = self.sender != Half::Live && self.receiver != Half::Live;
		let used = self.sender == Half::Dropped || self.receiver == Half::Dropped;
		let drained = self.receiver == Half::Untaken || self.inbound_tx.is_none();
		released && used && drained
	}
}

struct Inner {
	channels: DashMap<Arc<str>, Slot>,
	outbound: mpsc::UnboundedSender<Frame>,
	accept: Acceptor,
	max_frame_len: usize,
	closed: AtomicBool,
}

impl Inner {
	/// Creates the slot if absent. Slots created after close start at EOF.
	fn slot(&self, name: &Arc<str>) -> RefMut<'_, Arc<str>, Slot> {
		self.channels
			.entry(Arc::clone(name))
			.or_insert_with(|| Slot::new(!self.closed.load(Ordering::SeqCst)))
	}

	fn route(&self, frame: Frame) {
		if !self.channels.contains_key(&frame.name) && !(self.accept)(&frame.name) {
			tracing::warn!(name = %frame.name, "received unrecognized stream, dropping frame");
			return;
		}

		{
			let mut slot = self.slot(&frame.name);
			match frame.kind {
				FrameKind::Data => {
					if slot.receiver == Half::Untaken {
						if slot.unclaimed >= UNCLAIMED_BACKLOG {
							tracing::warn!(name = %frame.name, "Unclaimed sub-stream backlog full, dropping frame");
							return;
						}
						slot.unclaimed += 1;
					}
					if let Some(tx) = &slot.inbound_tx {
						if tx.send(frame.payload).is_err() {
							tracing::debug!(name = %frame.name, "Data for dropped sub-stream receiver (ignored)");
						}
					}
				}
				FrameKind::End => {
					slot.inbound_tx = None;
				}
			}
		}
		self.reap(&frame.name);
	}

	/// Updates a slot after one of its halves went away, removing it if spent.
	fn release(&self, name: &str, update: impl FnOnce(&mut Slot)) {
		if let Some(mut slot) = self.channels.get_mut(name) {
			update(&mut *slot);
		}
		self.reap(name);
	}

	fn reap(&self, name: &str) {
		if self.channels.remove_if(name, |_, slot| slot.is_spent()).is_some() {
			tracing::trace!(name, "Released sub-stream slot");
		}
	}

	fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		for mut slot in self.channels.iter_mut() {
			slot.inbound_tx = None;
		}
		self.channels.retain(|_, slot| !slot.is_spent());
	}
}

/// Handle for opening named sub-streams on a multiplexed connection.
///
/// Cheap to clone; all clones share the same channel table and writer.
#[derive(Clone)]
pub struct Multiplex {
	inner: Arc<Inner>,
}

/// Owns the I/O halves; [`run`](Self::run) must be polled for any frame to move.
pub struct MultiplexDriver {
	reader: Box<dyn AsyncRead + Unpin + Send>,
	writer: Box<dyn AsyncWrite + Unpin + Send>,
	outbound_rx: mpsc::UnboundedReceiver<Frame>,
	inner: Arc<Inner>,
}

impl Multiplex {
	/// Creates a multiplexer over separate read and write halves.
	///
	/// `accept` decides whether a name first seen in an inbound frame opens a
	/// new sub-stream.
	pub fn new<R, W, A>(reader: R, writer: W, accept: A, max_frame_len: usize) -> (Self, MultiplexDriver)
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
		A: Fn(&str) -> bool + Send + Sync + 'static,
	{
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let inner = Arc::new(Inner {
			channels: DashMap::new(),
			outbound,
			accept: Box::new(accept),
			max_frame_len,
			closed: AtomicBool::new(false),
		});

		let driver = MultiplexDriver {
			reader: Box::new(reader),
			writer: Box::new(writer),
			outbound_rx,
			inner: Arc::clone(&inner),
		};

		(Self { inner }, driver)
	}

	/// Creates a multiplexer over a single bidirectional stream.
	pub fn from_io<T, A>(io: T, accept: A, max_frame_len: usize) -> (Self, MultiplexDriver)
	where
		T: AsyncRead + AsyncWrite + Send + 'static,
		A: Fn(&str) -> bool + Send + Sync + 'static,
	{
		let (reader, writer) = tokio::io::split(io);
		Self::new(reader, writer, accept, max_frame_len)
	}

	/// Returns the sending half of the named sub-stream.
	pub fn sender(&self, name: &str) -> Result<SubStreamSender> {
		let name: Arc<str> = Arc::from(name);
		let mut slot = self.inner.slot(&name);
		if slot.sender != Half::Untaken {
			return Err(Error::AlreadyTaken {
				name: name.to_string(),
				half: "sender",
			});
		}
		slot.sender = Half::Live;
		drop(slot);

		Ok(SubStreamSender {
			name,
			inner: Arc::clone(&self.inner),
			finished: false,
		})
	}

	/// Returns the receiving half of the named sub-stream.
	pub fn receiver(&self, name: &str) -> Result<SubStreamReceiver> {
		let name: Arc<str> = Arc::from(name);
		let mut slot = self.inner.slot(&name);
		let rx = slot.inbound_rx.take().ok_or_else(|| Error::AlreadyTaken {
			name: name.to_string(),
			half: "receiver",
		})?;
		slot.receiver = Half::Live;
		drop(slot);

		Ok(SubStreamReceiver {
			name,
			inner: Arc::clone(&self.inner),
			rx,
		})
	}

	/// Returns both halves of the named sub-stream.
	///
	/// Both peers calling this with the same name get a connected pair.
	pub fn shared_stream(&self, name: &str) -> Result<SubStream> {
		let sender = self.sender(name)?;
		let receiver = self.receiver(name)?;
		Ok(SubStream { sender, receiver })
	}

	/// Returns true if a slot exists for `name` on this side.
	pub fn contains(&self, name: &str) -> bool {
		self.inner.channels.contains_key(name)
	}

	/// Returns true once the reader loop has stopped.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}
}

impl MultiplexDriver {
	/// Runs the reader loop and writer task until EOF or a transport error.
	///
	/// On return every inbound queue is closed, so all receivers drain and
	/// then yield `None`.
	pub async fn run(self) -> Result<()> {
		let MultiplexDriver {
			mut reader,
			mut writer,
			mut outbound_rx,
			inner,
		} = self;

		let max_frame_len = inner.max_frame_len;
		let writer_task = WriterTask(tokio::spawn(async move {
			while let Some(frame) = outbound_rx.recv().await {
				let bytes = match frame.encode(max_frame_len) {
					Ok(bytes) => bytes,
					Err(e) => {
						tracing::error!(name = %frame.name, "Dropping outbound frame: {}", e);
						continue;
					}
				};
				if let Err(e) = writer.write_all(&bytes).await {
					tracing::error!("Transport write error: {}", e);
					break;
				}
				if let Err(e) = writer.flush().await {
					tracing::error!("Transport flush error: {}", e);
					break;
				}
			}
		}));

		let result = read_loop(&mut reader, &inner).await;
		inner.close();
		drop(writer_task);
		result
	}
}

/// Aborts the writer when the driver stops, including when the driver task
/// itself is aborted.
struct WriterTask(JoinHandle<()>);

impl Drop for WriterTask {
	fn drop(&mut self) {
		self.0.abort();
	}
}

async fn read_loop<R: AsyncRead + Unpin>(reader: &mut R, inner: &Inner) -> Result<()> {
	while let Some(frame) = Frame::read_from(reader, inner.max_frame_len).await? {
		inner.route(frame);
	}
	tracing::debug!("Multiplexed stream reached EOF");
	Ok(())
}

/// Both halves of one named sub-stream.
pub struct SubStream {
	pub sender: SubStreamSender,
	pub receiver: SubStreamReceiver,
}

impl SubStream {
	pub fn split(self) -> (SubStreamSender, SubStreamReceiver) {
		(self.sender, self.receiver)
	}
}

/// Sending half of a sub-stream. Dropping it half-closes the sub-stream.
pub struct SubStreamSender {
	name: Arc<str>,
	inner: Arc<Inner>,
	finished: bool,
}

impl SubStreamSender {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Largest payload a single [`send`](Self::send) accepts.
	pub fn max_payload_len(&self) -> usize {
		self.inner.max_frame_len.saturating_sub(frame::body_len(&self.name, 0))
	}

	/// Queues one payload as a DATA frame.
	pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
		let payload = payload.into();
		let len = frame::body_len(&self.name, payload.len());
		if len > self.inner.max_frame_len {
			return Err(Error::FrameTooLarge {
				len,
				max: self.inner.max_frame_len,
			});
		}

		self.inner
			.outbound
			.send(Frame::data(Arc::clone(&self.name), payload))
			.map_err(|_| Error::ChannelClosed)
	}

	/// Sends END; the peer's receiver yields `None` after draining.
	pub fn close(mut self) {
		self.finish(true);
	}

	/// Gives up the sub-stream without END. The peer's receiver stays open
	/// until the connection ends, so it never mistakes a cut-off stream for a
	/// complete one.
	pub fn abort(mut self) {
		self.finish(false);
	}

	fn finish(&mut self, end: bool) {
		if self.finished {
			return;
		}
		self.finished = true;
		if end {
			// Writer may already be gone during teardown.
			let _ = self.inner.outbound.send(Frame::end(Arc::clone(&self.name)));
		}
		self.inner.release(&self.name, |slot| slot.sender = Half::Dropped);
	}
}

impl Drop for SubStreamSender {
	fn drop(&mut self) {
		self.finish(true);
	}
}

/// Receiving half of a sub-stream.
pub struct SubStreamReceiver {
	name: Arc<str>,
	inner: Arc<Inner>,
	rx: mpsc::UnboundedReceiver<Bytes>,
}

impl SubStreamReceiver {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Next payload, or `None` once the peer half-closed or the connection ended.
	pub async fn recv(&mut self) -> Option<Bytes> {
		self.rx.recv().await
	}
}

impl Drop for SubStreamReceiver {
	fn drop(&mut self) {
		self.inner.release(&self.name, |slot| slot.receiver = Half::Dropped);
	}
}
