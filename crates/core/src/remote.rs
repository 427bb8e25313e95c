//! Local mirrors of the peer's capabilities.
//!
//! [`Remote`] is built once from the peer's manifest. Functions become
//! [`RemoteFunction`]s, constructors [`RemoteConstructor`]s, namespaces nested
//! [`Remote`]s, and values are copied as-is.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use rpcstream_protocol::{Call, CallKind, Manifest, ManifestEntry, Message, ObjectManifest};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::api::SEPARATOR;
use crate::arg::{Arg, Args};
use crate::error::{Error, Result};
use crate::marshal;
use crate::registry::PendingGuard;
use crate::session::Shared;

/// One node of the remote tree.
#[derive(Debug, Clone)]
pub enum RemoteEntry {
	Value(Value),
	Function(RemoteFunction),
	Constructor(RemoteConstructor),
	Namespace(Remote),
}

impl RemoteEntry {
	fn kind(&self) -> &'static str {
		match self {
			RemoteEntry::Value(_) => "value",
			RemoteEntry::Function(_) => "function",
			RemoteEntry::Constructor(_) => "constructor",
			RemoteEntry::Namespace(_) => "namespace",
		}
	}
}

/// The peer's capability tree. Cheap to clone.
#[derive(Clone, Default)]
pub struct Remote {
	entries: Arc<BTreeMap<String, RemoteEntry>>,
}

impl Remote {
	pub(crate) fn build(session: &Weak<Shared>, manifest: Manifest) -> Self {
		Self::build_at(session, manifest, &[])
	}

	fn build_at(session: &Weak<Shared>, manifest: Manifest, parents: &[&str]) -> Self {
		let mut entries = BTreeMap::new();
		for (name, entry) in manifest {
			let mut path = parents.to_vec();
			path.push(&name);
			let dotted: Arc<str> = Arc::from(path.join(&SEPARATOR.to_string()));

			let mirrored = match entry {
				ManifestEntry::Value(value) => RemoteEntry::Value(value),
				ManifestEntry::Function => RemoteEntry::Function(RemoteFunction {
					session: Weak::clone(session),
					target: Target::Path(dotted),
				}),
				ManifestEntry::Constructor(object) => RemoteEntry::Constructor(RemoteConstructor {
					session: Weak::clone(session),
					path: dotted,
					manifest: Arc::new(object),
				}),
				ManifestEntry::Object(nested) => RemoteEntry::Namespace(Self::build_at(session, nested, &path)),
			};
			entries.insert(name, mirrored);
		}
		Self {
			entries: Arc::new(entries),
		}
	}

	/// Looks up a dotted path.
	pub fn get(&self, path: &str) -> Result<&RemoteEntry> {
		let not_found = || Error::NotFound(path.to_string());
		let mut segments = path.split(SEPARATOR);
		let mut entry = self.entries.get(segments.next().ok_or_else(not_found)?).ok_or_else(not_found)?;
		for segment in segments {
			match entry {
				RemoteEntry::Namespace(remote) => entry = remote.entries.get(segment).ok_or_else(not_found)?,
				_ => return Err(not_found()),
			}
		}
		Ok(entry)
	}

	pub fn function(&self, path: &str) -> Result<&RemoteFunction> {
		match self.get(path)? {
			RemoteEntry::Function(f) => Ok(f),
			_ => Err(wrong_kind(path, "function")),
		}
	}

	pub fn constructor(&self, path: &str) -> Result<&RemoteConstructor> {
		match self.get(path)? {
			RemoteEntry::Constructor(c) => Ok(c),
			_ => Err(wrong_kind(path, "constructor")),
		}
	}

	pub fn value(&self, path: &str) -> Result<&Value> {
		match self.get(path)? {
			RemoteEntry::Value(v) => Ok(v),
			_ => Err(wrong_kind(path, "value")),
		}
	}

	pub fn namespace(&self, path: &str) -> Result<&Remote> {
		match self.get(path)? {
			RemoteEntry::Namespace(n) => Ok(n),
			_ => Err(wrong_kind(path, "namespace")),
		}
	}

	/// Shorthand for `function(path)?.call(args)`.
	pub fn call(&self, path: &str, args: impl Into<Args>) -> Result<Invocation> {
		self.function(path)?.call(args)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

impl fmt::Debug for Remote {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map()
			.entries(self.entries.iter().map(|(name, entry)| (name, entry.kind())))
			.finish()
	}
}

fn wrong_kind(path: &str, expected: &'static str) -> Error {
	Error::WrongKind {
		path: path.to_string(),
		expected,
	}
}

#[derive(Debug, Clone)]
enum Target {
	/// A function in the peer's API tree.
	Path(Arc<str>),
	/// A method on a remote object; `path` is set when the object came from a
	/// constructor in the API tree and unset when it was passed as an argument.
	Method {
		path: Option<Arc<str>>,
		object_id: Arc<str>,
		method: Arc<str>,
	},
}

/// A callable capability on the peer.
#[derive(Clone)]
pub struct RemoteFunction {
	session: Weak<Shared>,
	target: Target,
}

impl RemoteFunction {
	/// Sends the call.
	///
	/// The returned [`Invocation`] only needs awaiting in promise mode; the
	/// call is on the wire either way.
	pub fn call(&self, args: impl Into<Args>) -> Result<Invocation> {
		let shared = self.session.upgrade().ok_or(Error::SessionClosed)?;
		let id = shared.next_id()?;

		let pending = shared.options.promise.then(|| {
			let (rx, guard) = shared.registry.register_pending(Arc::clone(&id));
			Pending { rx, guard }
		});

		let args = marshal::prepare(&shared, &id, args.into());
		let call = match &self.target {
			Target::Path(path) => Call {
				kind: CallKind::Api,
				id: id.to_string(),
				name: Some(path.to_string()),
				object_id: None,
				method: None,
				args,
			},
			Target::Method {
				path,
				object_id,
				method,
			} => Call {
				kind: if path.is_some() { CallKind::Api } else { CallKind::Object },
				id: id.to_string(),
				name: path.as_deref().map(str::to_string),
				object_id: Some(object_id.to_string()),
				method: Some(method.to_string()),
				args,
			},
		};
		shared.send(&Message::Call(call))?;

		Ok(Invocation { id, pending })
	}
}

impl fmt::Debug for RemoteFunction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.target {
			Target::Path(path) => write!(f, "RemoteFunction({path})"),
			Target::Method { object_id, method, .. } => write!(f, "RemoteFunction({object_id}#{method})"),
		}
	}
}

/// A capability-wrapped class on the peer.
#[derive(Clone)]
pub struct RemoteConstructor {
	session: Weak<Shared>,
	path: Arc<str>,
	manifest: Arc<ObjectManifest>,
}

impl RemoteConstructor {
	/// Asks the peer to construct an instance and returns its stand-in at once.
	///
	/// Exactly one instance is created on the peer per call.
	pub fn construct(&self, args: impl Into<Args>) -> Result<RemoteObject> {
		let shared = self.session.upgrade().ok_or(Error::SessionClosed)?;
		let id = shared.next_id()?;

		let args = marshal::prepare(&shared, &id, args.into());
		shared.send(&Message::Call(Call {
			kind: CallKind::Api,
			id: id.to_string(),
			name: Some(self.path.to_string()),
			object_id: None,
			method: None,
			args,
		}))?;

		Ok(RemoteObject::new(&self.session, &self.manifest, id, Some(Arc::clone(&self.path))))
	}

	pub fn type_name(&self) -> &str {
		&self.manifest.name
	}

	pub fn methods(&self) -> &[String] {
		&self.manifest.methods
	}
}

impl fmt::Debug for RemoteConstructor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RemoteConstructor")
			.field("path", &self.path)
			.field("type_name", &self.manifest.name)
			.field("methods", &self.manifest.methods)
			.finish()
	}
}

/// Stand-in for one object living on the peer.
#[derive(Clone)]
pub struct RemoteObject {
	type_name: Arc<str>,
	id: Arc<str>,
	methods: Arc<BTreeMap<String, RemoteFunction>>,
}

impl RemoteObject {
	pub(crate) fn new(session: &Weak<Shared>, manifest: &ObjectManifest, id: Arc<str>, path: Option<Arc<str>>) -> Self {
		let methods = manifest
			.methods
			.iter()
			.map(|method| {
				let function = RemoteFunction {
					session: Weak::clone(session),
					target: Target::Method {
						path: path.clone(),
						object_id: Arc::clone(&id),
						method: Arc::from(method.as_str()),
					},
				};
				(method.clone(), function)
			})
			.collect();

		Self {
			type_name: Arc::from(manifest.name.as_str()),
			id,
			methods: Arc::new(methods),
		}
	}

	/// Type name declared by the peer.
	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	/// Capability id of the object on the peer.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn methods(&self) -> impl Iterator<Item = &str> {
		self.methods.keys().map(String::as_str)
	}

	pub fn has_method(&self, name: &str) -> bool {
		self.methods.contains_key(name)
	}

	pub fn method(&self, name: &str) -> Result<&RemoteFunction> {
		self.methods.get(name).ok_or_else(|| Error::UnknownMethod {
			type_name: self.type_name.to_string(),
			method: name.to_string(),
		})
	}

	/// Shorthand for `method(name)?.call(args)`.
	pub fn call(&self, name: &str, args: impl Into<Args>) -> Result<Invocation> {
		self.method(name)?.call(args)
	}
}

impl fmt::Debug for RemoteObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RemoteObject")
			.field("type_name", &self.type_name)
			.field("id", &self.id)
			.field("methods", &self.methods.keys().collect::<Vec<_>>())
			.finish()
	}
}

struct Pending {
	rx: oneshot::Receiver<Result<Arg>>,
	guard: PendingGuard,
}

/// A sent call.
///
/// In promise mode, awaiting yields the peer's resolved value or
/// [`Error::Remote`] on rejection. Dropping it first discards the pending
/// entry, so a late reply is ignored. Without promise mode, awaiting fails
/// with [`Error::PromiseModeDisabled`].
pub struct Invocation {
	id: Arc<str>,
	pending: Option<Pending>,
}

impl Invocation {
	/// Capability id allocated for this call.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn is_pending(&self) -> bool {
		self.pending.is_some()
	}
}

impl Future for Invocation {
	type Output = Result<Arg>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let Some(pending) = self.pending.as_mut() else {
			return Poll::Ready(Err(Error::PromiseModeDisabled));
		};
		match Pin::new(&mut pending.rx).poll(cx) {
			Poll::Ready(result) => {
				pending.guard.complete();
				Poll::Ready(result.map_err(|_| Error::SessionClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl fmt::Debug for Invocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Invocation")
			.field("id", &self.id)
			.field("pending", &self.is_pending())
			.finish()
	}
}
