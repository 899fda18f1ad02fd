use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    unistd::read,
};
use std::os::fd::RawFd;

pub fn set_fd_nonblocking(fd: RawFd, nonblocking: bool) -> nix::Result<()> {
    let bits = fcntl(fd, FcntlArg::F_GETFL)?;
    let prev_flags = OFlag::from_bits_truncate(bits);
    let flags = if nonblocking {
        prev_flags | OFlag::O_NONBLOCK
    } else {
        prev_flags - OFlag::O_NONBLOCK
    };
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// What a non-blocking drain of a descriptor found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// Reads `fd` until it would block or hits end of file. Level-triggered
/// readiness stays asserted until this has run. `fd` must be non-blocking.
pub fn drain_fd(fd: RawFd) -> nix::Result<Drained> {
    let mut drained = Drained::default();
    let mut buffer = [0u8; 2048];
    loop {
        match read(fd, &mut buffer) {
            Ok(0) => {
                drained.eof = true;
                return Ok(drained);
            }
            Ok(n) => drained.data.extend_from_slice(&buffer[..n]),
            Err(Errno::EAGAIN) => return Ok(drained),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}
