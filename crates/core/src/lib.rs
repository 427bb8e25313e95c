//! rpcstream: capability-based RPC over one multiplexed byte stream
//!
//! Two peers each expose a tree of capabilities (functions, namespaces,
//! literal values and constructible classes) and get a mirror of the other
//! side's tree, with no shared schema. Arguments may carry callbacks, byte
//! buffers, errors, live streams and further capabilities.
//!
//! # Examples
//!
//! ## Calling a function with a callback
//!
//! ```ignore
//! use rpcstream::{Api, Arg, Args, Reply, Session, SessionOptions};
//!
//! #[tokio::main]
//! async fn main() -> rpcstream::Result<()> {
//!     let (left, right) = tokio::io::duplex(64 * 1024);
//!
//!     let api = Api::new().function("upper", |args: Args| {
//!         let text = args.str(0).unwrap_or_default().to_uppercase();
//!         if let Some(cb) = args.callback(1) {
//!             let _ = cb.call(Arg::from(text));
//!         }
//!         Reply::Unit
//!     });
//!
//!     let _server = Session::connect(left, api, SessionOptions::new().name("server"))?;
//!     let client = Session::connect(right, Api::new(), SessionOptions::new().name("client"))?;
//!
//!     let remote = client.remote().await?;
//!     remote.call("upper", vec![
//!         Arg::from("abc"),
//!         Arg::callback(|args| println!("{:?}", args.str(0))),
//!     ])?;
//!     Ok(())
//! }
//! ```
//!
//! ## Awaiting results
//!
//! ```ignore
//! let options = SessionOptions::new().promise(true);
//! let api = Api::new().function("add", |args: Args| {
//!     let sum: i64 = args.iter().filter_map(|a| a.as_json()?.as_i64()).sum();
//!     Reply::ok(sum)
//! });
//! // ... connect both sides with promise mode enabled ...
//! let sum = remote.call("add", vec![Arg::from(2i64), Arg::from(3i64)])?.await?;
//! assert_eq!(sum.as_json().and_then(|v| v.as_i64()), Some(5));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Session (handle)                             │
//! │   Api (local tree)      Remote (peer mirror) │
//! └──────┬───────────────────────────▲───────────┘
//!        │ marshal::prepare          │ dispatch + marshal::resolve
//! ┌──────▼───────────────────────────┴───────────┐
//! │ control channel "rpc"  +  stream channels    │
//! │ (rpcstream-runtime Multiplex)                │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Capability ids are `<prefix>.<counter>` with a per-session prefix agreed
//! from both sides' nonces, so ids allocated by the two peers never clash.

pub mod api;
pub mod arg;
pub mod callback;
pub mod capability;
mod dispatch;
pub mod error;
pub mod manifest;
mod marshal;
pub mod options;
mod registry;
pub mod remote;
pub mod session;
pub mod stream;

pub use api::{Api, ApiEntry, Handler};
pub use arg::{Arg, Args, RemoteError, Reply};
pub use callback::Callback;
pub use capability::{Capability, Construct, Instances, Interface, Rpcified};
pub use error::{Error, Result};
pub use options::{ErrorFields, SessionOptions};
pub use remote::{Invocation, Remote, RemoteConstructor, RemoteEntry, RemoteFunction, RemoteObject};
pub use rpcstream_protocol as protocol;
pub use rpcstream_runtime as runtime;
pub use session::Session;
pub use stream::{Chunk, RpcStream, StreamSink, StreamSource};
