//! Capability wrappers for stateful objects.
//!
//! A type becomes remotely usable by implementing [`Capability`]: it declares
//! its method table through [`Interface`] and routes calls by name in
//! [`Capability::invoke`]. [`Rpcified`] wraps such a type (as a constructible
//! class or a single live instance) and filters which methods the peer sees.
//! Instances the peer constructs live in the session's [`Instances`] table, so
//! one wrapper can be served to any number of sessions.
//!
//! # Example
//!
//! ```ignore
//! struct Counter { n: i64 }
//!
//! impl Capability for Counter {
//!     fn interface() -> Interface {
//!         Interface::new("Counter").method("incr").method("get")
//!     }
//!
//!     fn invoke(&mut self, method: &str, args: Args) -> Reply {
//!         match method {
//!             "incr" => { self.n += 1; Reply::Unit }
//!             "get" => Reply::ok(self.n),
//!             _ => Reply::err(format!("no method {method}")),
//!         }
//!     }
//! }
//!
//! impl Construct for Counter {
//!     fn construct(_: Args) -> Self { Counter { n: 0 } }
//! }
//!
//! let api = Api::new().constructor("counter", Rpcified::class::<Counter>());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use downcast_rs::{Downcast, impl_downcast};
use parking_lot::Mutex;
use rpcstream_protocol::ObjectManifest;

use crate::arg::{Args, Reply};

/// Method name never exposed, whatever the filters say.
const CONSTRUCTOR: &str = "constructor";

/// A stateful object callable by method name.
pub trait Capability: Downcast + Send {
	/// Declared type name and method table.
	fn interface() -> Interface
	where
		Self: Sized;

	/// Runs `method`. Only names from [`interface`](Self::interface) that
	/// survived filtering reach this.
	fn invoke(&mut self, method: &str, args: Args) -> Reply;
}
impl_downcast!(Capability);

/// Default way to build a capability from the peer's constructor arguments.
pub trait Construct: Capability + Sized {
	fn construct(args: Args) -> Self;
}

/// Declared type name plus method names, inherited ones included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
	name: String,
	methods: Vec<String>,
}

impl Interface {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			methods: Vec::new(),
		}
	}

	pub fn method(mut self, name: impl Into<String>) -> Self {
		let name = name.into();
		if !self.methods.contains(&name) {
			self.methods.push(name);
		}
		self
	}

	pub fn methods<I, S>(self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		names.into_iter().fold(self, |iface, name| iface.method(name))
	}

	/// Adds the parent's methods after this type's own.
	pub fn inherit(self, parent: &Interface) -> Self {
		parent.methods.iter().fold(self, |iface, name| iface.method(name.as_str()))
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn declared(&self) -> &[String] {
		&self.methods
	}

	pub fn declares(&self, method: &str) -> bool {
		self.methods.iter().any(|m| m == method)
	}
}

type Instance = Arc<Mutex<Box<dyn Capability>>>;

static NEXT_WRAPPER: AtomicU64 = AtomicU64::new(0);

/// Instances one session's peer constructed, keyed by wrapper and capability id.
#[derive(Default)]
pub struct Instances {
	by_wrapper: Mutex<HashMap<u64, HashMap<Arc<str>, Instance>>>,
}

impl Instances {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.by_wrapper.lock().values().map(HashMap::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops every instance.
	pub fn clear(&self) {
		let released = std::mem::take(&mut *self.by_wrapper.lock());
		drop(released);
	}

	fn insert(&self, wrapper: u64, id: Arc<str>, instance: Instance) {
		self.by_wrapper.lock().entry(wrapper).or_default().insert(id, instance);
	}

	fn get(&self, wrapper: u64, id: &str) -> Option<Instance> {
		self.by_wrapper.lock().get(&wrapper)?.get(id).cloned()
	}

	fn count(&self, wrapper: u64) -> usize {
		self.by_wrapper.lock().get(&wrapper).map_or(0, HashMap::len)
	}
}

impl fmt::Debug for Instances {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Instances").field("len", &self.len()).finish()
	}
}
type Factory = Arc<dyn Fn(Args) -> Box<dyn Capability> + Send + Sync>;
type Override = Arc<dyn Fn(&mut dyn Capability, Args) -> Reply + Send + Sync>;
type AccessCheck = Arc<dyn Fn(&dyn Capability, &str, &Args) -> bool + Send + Sync>;

enum Source {
	Factory(Factory),
	Singleton(Instance),
}

/// A capability wrapper: a class the peer can construct, or one live instance.
pub struct Rpcified {
	key: u64,
	interface: Interface,
	source: Source,
	include: Option<Vec<String>>,
	exclude: Vec<String>,
	skip_private: bool,
	overrides: HashMap<String, Override>,
	access: Option<AccessCheck>,
	/// Filtered method table, rebuilt by the builder setters.
	exposed: Vec<String>,
}

impl Rpcified {
	/// Wraps a class built with [`Construct::construct`].
	pub fn class<T: Construct>() -> Self {
		Self::with_factory(T::construct)
	}

	/// Wraps a class built by a custom factory.
	pub fn with_factory<T, F>(factory: F) -> Self
	where
		T: Capability,
		F: Fn(Args) -> T + Send + Sync + 'static,
	{
		let factory: Factory = Arc::new(move |args| -> Box<dyn Capability> { Box::new(factory(args)) });
		Self::from_source(T::interface(), Source::Factory(factory))
	}

	/// Wraps one live instance shared by every caller.
	pub fn instance<T: Capability>(value: T) -> Self {
		let instance: Box<dyn Capability> = Box::new(value);
		Self::from_source(T::interface(), Source::Singleton(Arc::new(Mutex::new(instance))))
	}

	fn from_source(interface: Interface, source: Source) -> Self {
		let mut wrapper = Self {
			key: NEXT_WRAPPER.fetch_add(1, Ordering::Relaxed),
			interface,
			source,
			include: None,
			exclude: Vec::new(),
			skip_private: true,
			overrides: HashMap::new(),
			access: None,
			exposed: Vec::new(),
		};
		wrapper.refresh();
		wrapper
	}

	fn refresh(&mut self) {
		let interface = &self.interface;
		self.exposed = match &self.include {
			Some(include) => include
				.iter()
				.filter(|m| m.as_str() != CONSTRUCTOR && interface.declares(m))
				.cloned()
				.collect(),
			None => interface
				.declared()
				.iter()
				.filter(|m| m.as_str() != CONSTRUCTOR)
				.filter(|m| !(self.skip_private && m.starts_with('_')))
				.filter(|m| !self.exclude.contains(m))
				.cloned()
				.collect(),
		};
	}

	/// Exposes only these methods (unknown names are ignored).
	pub fn include<I, S>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.include = Some(methods.into_iter().map(Into::into).collect());
		self.refresh();
		self
	}

	/// Hides these methods.
	pub fn exclude<I, S>(mut self, methods: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.exclude.extend(methods.into_iter().map(Into::into));
		self.refresh();
		self
	}

	/// Whether `_`-prefixed methods are hidden (default true).
	pub fn skip_private(mut self, skip: bool) -> Self {
		self.skip_private = skip;
		self.refresh();
		self
	}

	/// Replaces the handler for one method.
	pub fn override_method<F>(mut self, method: impl Into<String>, handler: F) -> Self
	where
		F: Fn(&mut dyn Capability, Args) -> Reply + Send + Sync + 'static,
	{
		self.overrides.insert(method.into(), Arc::new(handler));
		self
	}

	/// Gate run before every method call; `false` drops the call silently.
	pub fn access<F>(mut self, check: F) -> Self
	where
		F: Fn(&dyn Capability, &str, &Args) -> bool + Send + Sync + 'static,
	{
		self.access = Some(Arc::new(check));
		self
	}

	pub fn type_name(&self) -> &str {
		self.interface.name()
	}

	pub fn is_singleton(&self) -> bool {
		matches!(self.source, Source::Singleton(_))
	}

	/// Method names the peer sees.
	pub fn methods(&self) -> &[String] {
		&self.exposed
	}

	pub fn exposes(&self, method: &str) -> bool {
		self.exposed.iter().any(|m| m == method)
	}

	pub fn to_manifest(&self) -> ObjectManifest {
		ObjectManifest::new(self.interface.name(), self.exposed.clone())
	}

	/// Creates the instance for `id` in `instances`. A singleton ignores both
	/// arguments.
	pub fn make_new(&self, instances: &Instances, id: &str, args: Args) {
		match &self.source {
			Source::Singleton(_) => {
				tracing::debug!(type_name = self.type_name(), id, "Singleton capability, nothing to construct");
			}
			Source::Factory(factory) => {
				let instance = Arc::new(Mutex::new(factory(args)));
				instances.insert(self.key, Arc::from(id), instance);
				tracing::debug!(type_name = self.type_name(), id, "Constructed capability instance");
			}
		}
	}

	/// Calls `method` on the instance for `id`.
	///
	/// Returns `None` when the method is not exposed, no instance exists for
	/// `id`, or the access check refuses the call.
	pub fn make_call(&self, instances: &Instances, method: &str, id: &str, args: Args) -> Option<Reply> {
		if !self.exposes(method) {
			tracing::debug!(type_name = self.type_name(), method, "Refusing call to unexposed method");
			return None;
		}

		let instance = self.lookup(instances, id)?;
		let mut instance = instance.lock();

		if let Some(access) = &self.access {
			if !access(&**instance, method, &args) {
				tracing::debug!(type_name = self.type_name(), method, id, "Call vetoed by access check");
				return None;
			}
		}

		Some(match self.overrides.get(method) {
			Some(handler) => handler(&mut **instance, args),
			None => instance.invoke(method, args),
		})
	}

	fn lookup(&self, instances: &Instances, id: &str) -> Option<Instance> {
		match &self.source {
			Source::Singleton(instance) => Some(Arc::clone(instance)),
			Source::Factory(_) => {
				let found = instances.get(self.key, id);
				if found.is_none() {
					tracing::debug!(type_name = self.type_name(), id, "No instance for id");
				}
				found
			}
		}
	}

	/// Runs `f` against the instance for `id` if it is a `T`.
	pub fn inspect<T, R>(&self, instances: &Instances, id: &str, f: impl FnOnce(&T) -> R) -> Option<R>
	where
		T: Capability,
	{
		let instance = self.lookup(instances, id)?;
		let instance = instance.lock();
		(**instance).downcast_ref::<T>().map(f)
	}

	/// Number of instances of this wrapper in `instances`.
	pub fn instance_count(&self, instances: &Instances) -> usize {
		instances.count(self.key)
	}
}

impl fmt::Debug for Rpcified {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Rpcified")
			.field("type_name", &self.type_name())
			.field("methods", &self.methods())
			.field("singleton", &self.is_singleton())
			.finish()
	}
}
