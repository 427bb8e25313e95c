//! Manifest building and id prefix negotiation.

use rand::Rng;
use rpcstream_protocol::{Manifest, ManifestEntry};
use serde_json::Value;

use crate::api::{Api, ApiEntry, SEPARATOR};

/// Describes `api` for the peer.
///
/// Only boolean, string and number literals are sent; other values are left
/// out, as are names containing the path separator.
pub fn build_manifest(api: &Api) -> Manifest {
	let mut manifest = Manifest::new();
	for (name, entry) in api.iter() {
		if name.contains(SEPARATOR) {
			tracing::warn!(name, "Capability name contains '{}', not exposing it", SEPARATOR);
			continue;
		}
		let described = match entry {
			ApiEntry::Constructor(wrapper) => ManifestEntry::Constructor(wrapper.to_manifest()),
			ApiEntry::Namespace(api) => ManifestEntry::Object(build_manifest(api)),
			ApiEntry::Function(_) => ManifestEntry::Function,
			ApiEntry::Value(value) if is_literal(value) => ManifestEntry::Value(value.clone()),
			ApiEntry::Value(_) => continue,
		};
		manifest.insert(name.to_string(), described);
	}
	manifest
}

fn is_literal(value: &Value) -> bool {
	matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Picks this side's id prefix from both nonces.
///
/// The side with the smaller nonce takes `A`, the other `B`. Equal nonces fall
/// back to `X` plus a random number, which can still collide.
pub fn negotiate(local_nonce: u32, remote_nonce: u32) -> String {
	match remote_nonce.cmp(&local_nonce) {
		std::cmp::Ordering::Greater => "A".to_string(),
		std::cmp::Ordering::Less => "B".to_string(),
		std::cmp::Ordering::Equal => format!("X{}", rand::thread_rng().gen_range(0..=1000)),
	}
}
