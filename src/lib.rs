//! Bridges Linux `epoll` readiness notifications into a single-threaded
//! cooperative loop.
//!
//! A background thread blocks in `epoll_wait` and hands events one at a time
//! to the loop's thread, which routes them to the [`WatchHandle`] owning the
//! descriptor. The loop drives delivery by calling [`dispatch`]:
//!
//! ```no_run
//! use std::time::Duration;
//! use epwatch::{mask, WatchHandle};
//!
//! let handle = WatchHandle::new(|delivery| match delivery {
//!     Ok(ready) => println!("fd {} ready: {:?}", ready.fd, ready.events),
//!     Err(e) => eprintln!("poll failed: {}", e),
//! });
//! handle.add(0, mask::from_raw(mask::IN)?)?;
//! while !handle.descriptors().is_empty() {
//!     epwatch::dispatch(Duration::from_millis(100));
//! }
//! # Ok::<(), epwatch::WatchError>(())
//! ```
pub mod conf;
pub mod error;
mod handle;
pub mod mask;
mod registry;
pub mod utils;
pub mod watcher;

pub use conf::WatcherConfig;
pub use error::WatchError;
pub use handle::WatchHandle;
pub use mask::EventMask;
pub use watcher::{dispatch, dispatch_ready, is_active, Delivery, Readiness};
