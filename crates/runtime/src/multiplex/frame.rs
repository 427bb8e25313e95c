//! Frame layout shared by both ends of a multiplexed connection.
//!
//! ```text
//! [length: u32 LE][kind: u8][name length: u16 LE][name: utf-8][payload]
//! ```
//!
//! `length` counts everything after itself.

use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Default upper bound on a frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const KIND_LEN: usize = 1;
const NAME_LEN_LEN: usize = 2;

/// What a frame does to its sub-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
	/// Payload bytes for the named sub-stream.
	Data,
	/// The sender will not write to this sub-stream again (half close).
	End,
}

impl FrameKind {
	fn as_byte(self) -> u8 {
		match self {
			FrameKind::Data => 0,
			FrameKind::End => 1,
		}
	}

	fn from_byte(byte: u8) -> Result<Self> {
		match byte {
			0 => Ok(FrameKind::Data),
			1 => Ok(FrameKind::End),
			other => Err(Error::InvalidFrame(format!("unknown frame kind {other}"))),
		}
	}
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub kind: FrameKind,
	pub name: Arc<str>,
	pub payload: Bytes,
}

impl Frame {
	pub fn data(name: Arc<str>, payload: Bytes) -> Self {
		Self {
			kind: FrameKind::Data,
			name,
			payload,
		}
	}

	pub fn end(name: Arc<str>) -> Self {
		Self {
			kind: FrameKind::End,
			name,
			payload: Bytes::new(),
		}
	}

	/// Size of the frame body, excluding the length prefix.
	pub fn body_len(&self) -> usize {
		body_len(&self.name, self.payload.len())
	}

	/// Serializes the frame including its length prefix.
	pub fn encode(&self, max_len: usize) -> Result<Bytes> {
		let name_len = u16::try_from(self.name.len())
			.map_err(|_| Error::InvalidFrame(format!("sub-stream name too long: {} bytes", self.name.len())))?;

		let len = self.body_len();
		if len > max_len {
			return Err(Error::FrameTooLarge { len, max: max_len });
		}

		let mut buf = BytesMut::with_capacity(4 + len);
		buf.put_u32_le(len as u32);
		buf.put_u8(self.kind.as_byte());
		buf.put_u16_le(name_len);
		buf.put_slice(self.name.as_bytes());
		buf.put_slice(&self.payload);
		Ok(buf.freeze())
	}

	/// Parses a frame body (everything after the length prefix).
	pub fn decode(body: Bytes) -> Result<Self> {
		if body.len() < KIND_LEN + NAME_LEN_LEN {
			return Err(Error::InvalidFrame(format!("frame body too short: {} bytes", body.len())));
		}

		let kind = FrameKind::from_byte(body[0])?;
		let name_len = u16::from_le_bytes([body[1], body[2]]) as usize;
		let name_end = KIND_LEN + NAME_LEN_LEN + name_len;
		if body.len() < name_end {
			return Err(Error::InvalidFrame("sub-stream name overruns frame".to_string()));
		}

		let name = std::str::from_utf8(&body[KIND_LEN + NAME_LEN_LEN..name_end])
			.map_err(|e| Error::InvalidFrame(format!("sub-stream name is not utf-8: {e}")))?;

		Ok(Self {
			kind,
			name: Arc::from(name),
			payload: body.slice(name_end..),
		})
	}

	/// Reads one frame, returning `None` on a clean EOF at a frame boundary.
	pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Option<Self>> {
		let mut len_buf = [0u8; 4];
		let mut filled = 0;
		while filled < len_buf.len() {
			let n = reader.read(&mut len_buf[filled..]).await?;
			if n == 0 {
				if filled == 0 {
					return Ok(None);
				}
				return Err(Error::Io(io::Error::new(
					io::ErrorKind::UnexpectedEof,
					format!("EOF after {filled} bytes of a length prefix"),
				)));
			}
			filled += n;
		}

		let len = u32::from_le_bytes(len_buf) as usize;
		if len > max_len {
			return Err(Error::FrameTooLarge { len, max: max_len });
		}

		let mut body = vec![0u8; len];
		reader.read_exact(&mut body).await?;

		Self::decode(Bytes::from(body)).map(Some)
	}
}

pub(crate) fn body_len(name: &str, payload_len: usize) -> usize {
	KIND_LEN + NAME_LEN_LEN + name.len() + payload_len
}
