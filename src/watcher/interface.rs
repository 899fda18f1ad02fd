//! Types that cross the boundary between the poll thread and the cooperative
//! loop, and the seam through which events reach their owners.
//!
//! The poll thread only ever produces [`PendingEvent`]s. Everything past the
//! dispatch channel (registry lookup, the [`EventSink`] call) happens on the
//! thread that owns the watch handles.
use nix::errno::Errno;
use std::os::fd::RawFd;

use crate::{error::WatchError, mask::EventMask};

/// A descriptor reported ready by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub events: EventMask,
}

/// What a callback receives: an event, or a failure of the wait call itself.
pub type Delivery = Result<Readiness, WatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingEvent {
    Ready(Readiness),
    Failed(Errno),
}

impl PendingEvent {
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            Self::Ready(readiness) => Some(readiness.fd),
            Self::Failed(_) => None,
        }
    }

    pub fn into_delivery(self) -> Delivery {
        match self {
            Self::Ready(readiness) => Ok(readiness),
            Self::Failed(errno) => Err(WatchError::SystemCallFailure(errno)),
        }
    }
}

pub trait EventSink {
    fn dispatch_event(&self, delivery: Delivery);
}
