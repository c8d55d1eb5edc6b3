//! Async I/O traits and utilities.
//!
//! Streaming HTTP bodies and media files are both exposed as `AsyncRead`, so
//! the download worker can copy between them without knowing the source.

pub use tokio::io::{
    empty, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt,
    AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Empty, ReadBuf,
};
