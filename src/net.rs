//! TCP plumbing for sessions.
//!
//! Sessions need a channel that preserves frame boundaries. [`framed`] gets
//! one from any byte stream by length-prefixing each text frame.

pub mod client;
pub mod server;

use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use tokio::io::{AsyncRead, AsyncWrite, BufStream};

/// A byte stream carrying whole `String` frames in both directions.
pub type Framed<S> = AsyncBincodeStream<BufStream<S>, String, String, AsyncDestination>;

pub fn framed<S>(io: S) -> Framed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    AsyncBincodeStream::<_, String, String, _>::from(BufStream::new(io)).for_async()
}
