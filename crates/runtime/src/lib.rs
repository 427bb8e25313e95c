//! rpcstream runtime - the stream multiplexer under an rpcstream session
//!
//! This crate splits one bidirectional byte stream (a socket, a pipe pair, an
//! in-memory duplex) into any number of named sub-streams:
//!
//! - **Control channel**: one shared sub-stream both peers open under the
//!   well-known name [`CONTROL_CHANNEL`]
//! - **Data channels**: sub-streams created on demand by whichever side needs
//!   them first, each with its own inbound queue
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │              Multiplex               │
//! │  channels: name -> inbound queue     │
//! └───────┬───────────────────▲──────────┘
//!         │ frames            │ frames
//! ┌───────▼───────┐   ┌───────┴────────┐
//! │ writer task   │   │ reader loop    │  MultiplexDriver::run()
//! └───────┬───────┘   └───────▲────────┘
//!         │                   │
//!         ▼      byte stream  │
//! ```
//!
//! Frames are length-prefixed (`u32` little endian) and carry the channel
//! name, so the receiving side can route them without prior agreement.

pub mod error;
pub mod multiplex;

pub use error::{Error, Result};
pub use multiplex::{
	CONTROL_CHANNEL, DEFAULT_MAX_FRAME_LEN, Frame, FrameKind, Multiplex, MultiplexDriver, SubStream,
	SubStreamReceiver, SubStreamSender, UNCLAIMED_BACKLOG,
};
