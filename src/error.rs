//! Errors surfaced by watch handles and the dispatch loop.
use nix::errno::Errno;
use std::os::fd::RawFd;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The descriptor is registered already, by this handle or another one.
    #[error("fd {0} is already being watched")]
    AlreadyWatched(RawFd),

    #[error("not watching fd {0}")]
    NotWatching(RawFd),

    #[error("{0} can't be called after calling close")]
    ClosedHandleMisuse(&'static str),

    #[error("system call failed: {0}")]
    SystemCallFailure(#[from] Errno),
}

impl WatchError {
    /// The platform error code, for kernel failures.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::SystemCallFailure(e) => Some(*e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
