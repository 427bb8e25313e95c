//! The local capability tree a session exposes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::arg::{Args, Reply};
use crate::capability::Rpcified;

/// Path separator for nested capabilities.
pub const SEPARATOR: char = '.';

/// Handler behind an exposed function.
pub type Handler = Arc<dyn Fn(Args) -> Reply + Send + Sync>;

/// One node of an [`Api`] tree.
#[derive(Clone)]
pub enum ApiEntry {
	Value(Value),
	Function(Handler),
	Namespace(Api),
	Constructor(Arc<Rpcified>),
}

impl fmt::Debug for ApiEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApiEntry::Value(value) => f.debug_tuple("Value").field(value).finish(),
			ApiEntry::Function(_) => f.write_str("Function"),
			ApiEntry::Namespace(api) => f.debug_tuple("Namespace").field(api).finish(),
			ApiEntry::Constructor(wrapper) => f.debug_tuple("Constructor").field(wrapper).finish(),
		}
	}
}

/// Tree of values, functions, namespaces and constructors, built with chained setters.
///
/// ```ignore
/// let api = Api::new()
///     .value("version", 3)
///     .function("upper", |args| Reply::ok(args.str(0).unwrap_or_default().to_uppercase()))
///     .namespace("fs", Api::new().function("read", read_file))
///     .constructor("counter", Rpcified::class::<Counter>());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Api {
	entries: BTreeMap<String, ApiEntry>,
}

impl Api {
	pub fn new() -> Self {
		Self::default()
	}

	/// Literal copied into the peer's remote tree.
	pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.entry(name, ApiEntry::Value(value.into()))
	}

	pub fn function<F>(self, name: impl Into<String>, handler: F) -> Self
	where
		F: Fn(Args) -> Reply + Send + Sync + 'static,
	{
		self.entry(name, ApiEntry::Function(Arc::new(handler)))
	}

	pub fn namespace(self, name: impl Into<String>, api: Api) -> Self {
		self.entry(name, ApiEntry::Namespace(api))
	}

	pub fn constructor(self, name: impl Into<String>, wrapper: impl Into<Arc<Rpcified>>) -> Self {
		self.entry(name, ApiEntry::Constructor(wrapper.into()))
	}

	/// Inserts or replaces an entry.
	pub fn entry(mut self, name: impl Into<String>, entry: ApiEntry) -> Self {
		self.entries.insert(name.into(), entry);
		self
	}

	pub fn get(&self, name: &str) -> Option<&ApiEntry> {
		self.entries.get(name)
	}

	/// Resolves a dotted path through nested namespaces.
	pub fn resolve(&self, path: &str) -> Option<&ApiEntry> {
		let mut segments = path.split(SEPARATOR);
		let mut entry = self.entries.get(segments.next()?)?;
		for segment in segments {
			match entry {
				ApiEntry::Namespace(api) => entry = api.entries.get(segment)?,
				_ => return None,
			}
		}
		Some(entry)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &ApiEntry)> {
		self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capability::{Capability, Construct, Interface};

	struct Nop;

	impl Capability for Nop {
		fn interface() -> Interface {
			Interface::new("Nop").method("noop")
		}

		fn invoke(&mut self, _: &str, _: Args) -> Reply {
			Reply::Unit
		}
	}

	impl Construct for Nop {
		fn construct(_: Args) -> Self {
			Nop
		}
	}

	fn sample() -> Api {
		Api::new()
			.value("version", 3)
			.function("ping", |_| Reply::Unit)
			.namespace(
				"fs",
				Api::new()
					.function("read", |_| Reply::Unit)
					.namespace("deep", Api::new().constructor("nop", Rpcified::class::<Nop>())),
			)
			.constructor("nop", Rpcified::class::<Nop>())
	}

	#[test]
	fn test_resolve_dotted_path() {
		let api = sample();

		assert!(matches!(api.resolve("ping"), Some(ApiEntry::Function(_))));
		assert!(matches!(api.resolve("fs.read"), Some(ApiEntry::Function(_))));
		assert!(matches!(api.resolve("fs.deep.nop"), Some(ApiEntry::Constructor(_))));
		assert!(matches!(api.resolve("version"), Some(ApiEntry::Value(v)) if v == 3));
	}

	#[test]
	fn test_resolve_misses() {
		let api = sample();

		assert!(api.resolve("missing").is_none());
		assert!(api.resolve("fs.missing").is_none());
		assert!(api.resolve("ping.inner").is_none());
		assert!(api.resolve("").is_none());
	}
}
