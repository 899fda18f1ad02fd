mod context;
mod dispatch;
mod epoll;
mod interface;

pub use context::{dispatch, dispatch_ready, is_active};
pub(crate) use context::SharedContext;
pub use interface::{Delivery, EventSink, PendingEvent, Readiness};
