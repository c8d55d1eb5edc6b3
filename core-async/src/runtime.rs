//! Runtime handles.
//!
//! Lets synchronous code (tracing layers, drop handlers) find the ambient
//! runtime or fall back to driving a future on the current thread.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Drives `future` to completion on the current thread.
///
/// Must not be called from inside an async context.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}
