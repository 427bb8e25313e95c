//! Capability manifest exchanged once per session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One side's capability tree, keyed by capability name.
pub type Manifest = BTreeMap<String, ManifestEntry>;

/// A single capability in a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestEntry {
	/// A literal (boolean, string or number) copied to the peer as-is.
	Value(Value),
	/// A callable function.
	Function,
	/// A nested namespace.
	Object(Manifest),
	/// A capability-wrapped class; only its declared shape crosses the wire.
	Constructor(ObjectManifest),
}

/// Declared shape of a capability-wrapped class or instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectManifest {
	/// Declared type name, reported by the peer's stand-in objects.
	pub name: String,
	/// Exposed method names after filtering.
	pub methods: Vec<String>,
}

impl ObjectManifest {
	pub fn new(name: impl Into<String>, methods: Vec<String>) -> Self {
		Self {
			name: name.into(),
			methods,
		}
	}
}
