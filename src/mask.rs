//! Event mask constants and conversions.
//!
//! The numeric values are the kernel's own `EPOLL*` bits, so masks built from
//! these constants can be handed straight to `epoll_ctl` and the masks reported
//! by `epoll_wait` compare equal to them.
use nix::{libc, sys::epoll::EpollFlags};

use crate::error::{Result, WatchError};

pub type EventMask = EpollFlags;

pub const IN: u32 = libc::EPOLLIN as u32;
pub const OUT: u32 = libc::EPOLLOUT as u32;
pub const RDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const PRI: u32 = libc::EPOLLPRI as u32;
pub const ERR: u32 = libc::EPOLLERR as u32;
pub const HUP: u32 = libc::EPOLLHUP as u32;
pub const ET: u32 = libc::EPOLLET as u32;
pub const ONESHOT: u32 = libc::EPOLLONESHOT as u32;

const NAMES: [(&str, u32); 8] = [
    ("in", IN),
    ("out", OUT),
    ("rdhup", RDHUP),
    ("pri", PRI),
    ("err", ERR),
    ("hup", HUP),
    ("et", ET),
    ("oneshot", ONESHOT),
];

/// Converts a raw mask, rejecting bits epoll doesn't know about.
pub fn from_raw(raw: u32) -> Result<EventMask> {
    EpollFlags::from_bits(raw as i32).ok_or(WatchError::InvalidArgument(
        "mask contains unknown event bits",
    ))
}

/// Looks up a single flag by name. Accepts `in`, `IN` and `EPOLLIN` alike.
pub fn parse_name(name: &str) -> Result<EventMask> {
    let lower = name.trim().to_ascii_lowercase();
    let short = lower.strip_prefix("epoll").unwrap_or(&lower);
    NAMES
        .iter()
        .find(|(n, _)| *n == short)
        .map(|(_, bits)| EpollFlags::from_bits_truncate(*bits as i32))
        .ok_or(WatchError::InvalidArgument("unknown event flag name"))
}

pub fn from_names<I, S>(names: I) -> Result<EventMask>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .try_fold(EpollFlags::empty(), |acc, name| {
            Ok(acc | parse_name(name.as_ref())?)
        })
}
