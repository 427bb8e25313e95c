//! Wire types for the rpcstream protocol.
//!
//! This crate contains the serde-serializable types exchanged over the
//! control channel of an rpcstream session, plus the codec that turns them
//! into bytes. These types are the "protocol layer": the shapes of data as
//! they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Live values (callbacks, streams, remote objects) are built on top of these
//! types in the `rpcstream` crate.

pub mod codec;
pub mod manifest;
pub mod message;

pub use codec::{CodecError, decode, encode};
pub use manifest::*;
pub use message::*;
