//! Callbacks passed as arguments.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rpcstream_protocol::{Message, Return, ReturnKind};

use crate::arg::Args;
use crate::error::{Error, Result};
use crate::marshal;
use crate::session::Shared;

type LocalFn = Box<dyn Fn(Args) + Send + Sync>;
type OnceFn = Box<dyn FnOnce(Args) + Send>;

enum Target {
	Local(LocalFn),
	Once(Mutex<Option<OnceFn>>),
	/// Stub for a callback the peer registered; calls travel back as RETURN CALLBACK.
	Remote { id: Arc<str>, session: Weak<Shared> },
}

/// A function one side hands the other.
///
/// Cloning yields another handle to the same callback.
#[derive(Clone)]
pub struct Callback {
	target: Arc<Target>,
}

impl Callback {
	/// Callback the peer may invoke any number of times.
	pub fn new<F>(f: F) -> Self
	where
		F: Fn(Args) + Send + Sync + 'static,
	{
		Self {
			target: Arc::new(Target::Local(Box::new(f))),
		}
	}

	/// Callback unregistered after its first invocation.
	pub fn once<F>(f: F) -> Self
	where
		F: FnOnce(Args) + Send + 'static,
	{
		Self {
			target: Arc::new(Target::Once(Mutex::new(Some(Box::new(f))))),
		}
	}

	pub(crate) fn remote(id: Arc<str>, session: Weak<Shared>) -> Self {
		Self {
			target: Arc::new(Target::Remote { id, session }),
		}
	}

	pub fn is_once(&self) -> bool {
		matches!(*self.target, Target::Once(_))
	}

	/// True for a stub standing in for a peer's callback.
	pub fn is_remote(&self) -> bool {
		matches!(*self.target, Target::Remote { .. })
	}

	/// Invokes the callback.
	///
	/// For a stub this marshals `args` and sends them to the peer; it fails
	/// only once the session is gone.
	pub fn call(&self, args: impl Into<Args>) -> Result<()> {
		match &*self.target {
			Target::Local(f) => f(args.into()),
			Target::Once(slot) => {
				let f = slot.lock().take();
				match f {
					Some(f) => f(args.into()),
					None => tracing::debug!("One-shot callback already fired (ignored)"),
				}
			}
			Target::Remote { id, session } => {
				let shared = session.upgrade().ok_or(Error::SessionClosed)?;
				let args = marshal::prepare(&shared, id, args.into());
				shared.send(&Message::Return(Return {
					kind: ReturnKind::Callback,
					id: id.to_string(),
					args,
					promise_result: None,
				}))?;
			}
		}
		Ok(())
	}
}

impl fmt::Debug for Callback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &*self.target {
			Target::Local(_) => f.write_str("Callback::Local"),
			Target::Once(_) => f.write_str("Callback::Once"),
			Target::Remote { id, .. } => write!(f, "Callback::Remote({id})"),
		}
	}
}
