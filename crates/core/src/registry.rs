//! Per-session tables: callbacks, pending returns, exported capabilities and
//! the instances the peer constructed.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::arg::Arg;
use crate::callback::Callback;
use crate::capability::{Instances, Rpcified};
use crate::error::Result;

type PendingMap = Arc<Mutex<HashMap<Arc<str>, oneshot::Sender<Result<Arg>>>>>;

#[derive(Default)]
pub(crate) struct Registry {
	callbacks: Mutex<HashMap<Arc<str>, Callback>>,
	pending: PendingMap,
	exports: DashMap<Arc<str>, Arc<Rpcified>>,
	instances: Arc<Instances>,
}

impl Registry {
	pub(crate) fn register_callback(&self, id: Arc<str>, callback: Callback) {
		self.callbacks.lock().insert(id, callback);
	}

	/// Looks up a callback; one-shot callbacks are removed by the lookup.
	pub(crate) fn callback(&self, id: &str) -> Option<Callback> {
		let mut callbacks = self.callbacks.lock();
		let once = callbacks.get(id)?.is_once();
		if once {
			callbacks.remove(id)
		} else {
			callbacks.get(id).cloned()
		}
	}

	/// Registers a pending return. Dropping the guard before completion
	/// removes the entry again.
	pub(crate) fn register_pending(&self, id: Arc<str>) -> (oneshot::Receiver<Result<Arg>>, PendingGuard) {
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(Arc::clone(&id), tx);
		let guard = PendingGuard {
			id,
			pending: Arc::clone(&self.pending),
			completed: false,
		};
		(rx, guard)
	}

	/// Removes a pending return so it can be settled exactly once.
	pub(crate) fn take_pending(&self, id: &str) -> Option<oneshot::Sender<Result<Arg>>> {
		self.pending.lock().remove(id)
	}

	/// Exports a wrapper under a capability id. Class wrappers get a fresh
	/// instance for that id so the peer's calls have a target.
	pub(crate) fn export(&self, id: Arc<str>, wrapper: Arc<Rpcified>) {
		if !wrapper.is_singleton() {
			wrapper.make_new(&self.instances, &id, Default::default());
		}
		self.exports.insert(id, wrapper);
	}

	pub(crate) fn instances(&self) -> &Arc<Instances> {
		&self.instances
	}

	pub(crate) fn export_of(&self, id: &str) -> Option<Arc<Rpcified>> {
		self.exports.get(id).map(|entry| Arc::clone(entry.value()))
	}

	#[cfg(test)]
	pub(crate) fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	/// Session teardown: drops callbacks, fails pending returns and releases
	/// every instance held for the peer.
	pub(crate) fn clear(&self) {
		let callbacks = std::mem::take(&mut *self.callbacks.lock());
		let pending = std::mem::take(&mut *self.pending.lock());
		tracing::debug!(
			callbacks = callbacks.len(),
			pending = pending.len(),
			exports = self.exports.len(),
			instances = self.instances.len(),
			"Clearing session registry"
		);
		drop(callbacks);
		drop(pending);

		self.exports.clear();
		self.instances.clear();
	}
}

/// RAII guard removing an orphaned pending return.
pub(crate) struct PendingGuard {
	id: Arc<str>,
	pending: PendingMap,
	completed: bool,
}

impl PendingGuard {
	pub(crate) fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.lock().remove(&self.id).is_some() {
			tracing::debug!(id = %self.id, "PendingGuard: removed orphaned pending return");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::arg::{Args, Reply};
	use crate::capability::{Capability, Construct, Interface};

	#[test]
	fn test_once_callback_removed_on_lookup() {
		let registry = Registry::default();
		registry.register_callback(Arc::from("A.0.1"), Callback::once(|_| {}));
		registry.register_callback(Arc::from("A.0.2"), Callback::new(|_| {}));

		assert!(registry.callback("A.0.1").is_some());
		assert!(registry.callback("A.0.1").is_none());

		assert!(registry.callback("A.0.2").is_some());
		assert!(registry.callback("A.0.2").is_some());
		assert!(registry.callback("missing").is_none());
	}

	#[test]
	fn test_guard_removes_orphaned_entry() {
		let registry = Registry::default();
		let (_rx, guard) = registry.register_pending(Arc::from("A.3"));
		assert_eq!(registry.pending_count(), 1);

		drop(guard);
		assert_eq!(registry.pending_count(), 0);
		assert!(registry.take_pending("A.3").is_none());
	}

	#[test]
	fn test_pending_settles_once() {
		let registry = Registry::default();
		let (mut rx, mut guard) = registry.register_pending(Arc::from("A.4"));

		let tx = registry.take_pending("A.4").unwrap();
		tx.send(Ok(Arg::from("done"))).unwrap();
		guard.complete();

		assert!(registry.take_pending("A.4").is_none());
		let settled = rx.try_recv().unwrap().unwrap();
		assert_eq!(settled.as_str(), Some("done"));
	}

	#[tokio::test]
	async fn test_clear_fails_pending() {
		let registry = Registry::default();
		let (rx, _guard) = registry.register_pending(Arc::from("A.5"));
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		registry.register_callback(
			Arc::from("A.5.0"),
			Callback::new(move |_| {
				counter.fetch_add(1, Ordering::SeqCst);
			}),
		);

		registry.clear();

		assert!(rx.await.is_err());
		assert!(registry.callback("A.5.0").is_none());
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_clear_releases_only_own_instances() {
		let wrapper = Arc::new(Rpcified::class::<Blank>());
		let (first, second) = (Registry::default(), Registry::default());
		first.export(Arc::from("A.0"), Arc::clone(&wrapper));
		second.export(Arc::from("A.0"), Arc::clone(&wrapper));
		assert_eq!(wrapper.instance_count(first.instances()), 1);

		first.clear();
		assert!(first.instances().is_empty());
		assert!(first.export_of("A.0").is_none());
		assert_eq!(wrapper.instance_count(second.instances()), 1);
		assert!(second.export_of("A.0").is_some());
	}

	struct Blank;

	impl Capability for Blank {
		fn interface() -> Interface {
			Interface::new("Blank").method("noop")
		}

		fn invoke(&mut self, _: &str, _: Args) -> Reply {
			Reply::Unit
		}
	}

	impl Construct for Blank {
		fn construct(_: Args) -> Self {
			Blank
		}
	}
}
