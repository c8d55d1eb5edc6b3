//! Async runtime facade for the sonic client core.
//!
//! All `core-*` and `bridge-*` crates depend on this crate instead of reaching
//! into tokio directly, so the runtime surface they use stays in one place.
//!
//! # Modules
//!
//! - `task`: Task spawning and execution
//! - `time`: Time-related operations (sleep, timeout, duration, instant)
//! - `sync`: Synchronization primitives (Mutex, channels, cancellation, keyed locks)
//! - `io`: Async read/write traits
//! - `runtime`: Runtime handle and a blocking entry point
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod io;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use tokio::{join, select};
pub use time::{sleep, Duration, Instant};
