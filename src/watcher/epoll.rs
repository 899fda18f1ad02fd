use log::{debug, error};
use nix::{
    errno::Errno,
    libc,
    sys::epoll::{Epoll, EpollEvent, EpollTimeout},
};
use std::{
    io,
    os::fd::RawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::conf::WatcherConfig;

use super::{
    dispatch::{Producer, PushError},
    PendingEvent, Readiness,
};

/// The background thread blocked in `epoll_wait`.
///
/// It owns nothing but a reference to the epoll instance and the producing end
/// of the dispatch channel. Stopping is cooperative: the abort flag is checked
/// every time a wait returns, so shutdown takes at most one poll timeout.
pub struct PollLoop {
    abort: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollLoop {
    pub fn spawn(
        epoll: Arc<Epoll>,
        producer: Producer,
        config: &WatcherConfig,
    ) -> Result<Self, Errno> {
        let abort = Arc::new(AtomicBool::new(false));
        let timeout_ms = config.wait_timeout_ms();

        let thread_abort = abort.clone();
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(&epoll, &producer, &thread_abort, timeout_ms))
            .map_err(spawn_error)?;

        Ok(Self {
            abort,
            thread: Some(thread),
        })
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Requests the stop and waits for the thread to exit.
    pub fn join(&mut self) {
        self.abort();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("poll thread panicked");
            }
        }
    }
}

fn run(epoll: &Epoll, producer: &Producer, abort: &AtomicBool, timeout_ms: u16) {
    let mut event_buffer = [EpollEvent::empty(); 1];
    let tick = Duration::from_millis(timeout_ms as u64);

    debug!("poll thread started");
    loop {
        let res = epoll.wait(&mut event_buffer, EpollTimeout::from(timeout_ms));
        if abort.load(Ordering::Acquire) {
            break;
        }

        let pending = match res {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {
                let event = event_buffer[0];
                PendingEvent::Ready(Readiness {
                    fd: event.data() as RawFd,
                    events: event.events(),
                })
            }
            Err(e) => {
                error!("epoll_wait failed: {}", e);
                PendingEvent::Failed(e)
            }
        };

        match producer.push(pending, abort, tick) {
            Ok(()) => {}
            Err(PushError::Aborted) => break,
            Err(PushError::Disconnected) => {
                debug!("dispatch channel closed");
                break;
            }
        }
    }
    debug!("poll thread exiting");
}

fn spawn_error(e: io::Error) -> Errno {
    Errno::from_raw(e.raw_os_error().unwrap_or(libc::EAGAIN))
}
