//! The polling context shared by every watch handle on a thread.
//!
//! One epoll instance and one poll thread serve all handles of the cooperative
//! thread. Handles hold it through an `Rc`; the thread-local slot only keeps a
//! `Weak`, so the context lives exactly as long as some handle references it
//! and the next handle to need one after that gets a fresh instance.
use log::{debug, info, trace};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent};
use std::{
    cell::{Cell, RefCell},
    os::fd::{BorrowedFd, RawFd},
    rc::{Rc, Weak},
    sync::Arc,
    time::Duration,
};

use crate::{
    conf::WatcherConfig,
    error::{Result, WatchError},
    mask::EventMask,
    registry::{HandleId, Owner, Registry},
};

use super::{
    dispatch::{self, Consumer},
    epoll::PollLoop,
    PendingEvent,
};

thread_local! {
    static CURRENT: RefCell<Weak<SharedContext>> = RefCell::new(Weak::new());
}

fn current() -> Option<Rc<SharedContext>> {
    CURRENT.with(|slot| slot.borrow().upgrade())
}

pub struct SharedContext {
    // field order matters for drop: the poll thread is joined in `Drop::drop`,
    // and the epoll descriptor closes with the last `Arc` after that
    registry: RefCell<Registry>,
    consumer: Consumer,
    poll_loop: PollLoop,
    epoll: Arc<Epoll>,
    last_fd: Cell<Option<RawFd>>,
}

impl SharedContext {
    /// Returns the thread's context, creating it and its poll thread if no
    /// handle currently holds one.
    pub fn acquire(config: &WatcherConfig) -> Result<Rc<Self>> {
        if let Some(ctx) = current() {
            return Ok(ctx);
        }

        let ctx = Rc::new(Self::new(config)?);
        CURRENT.with(|slot| *slot.borrow_mut() = Rc::downgrade(&ctx));
        Ok(ctx)
    }

    fn new(config: &WatcherConfig) -> Result<Self> {
        let epoll = Arc::new(Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?);
        let (producer, consumer) = dispatch::channel();
        let poll_loop = PollLoop::spawn(epoll.clone(), producer, config)?;

        info!(
            "polling context created (timeout {}ms, thread {:?})",
            config.wait_timeout_ms(), config.thread_name
        );
        Ok(Self {
            registry: RefCell::new(Registry::new()),
            consumer,
            poll_loop,
            epoll,
            last_fd: Cell::new(None),
        })
    }

    pub fn add(&self, fd: RawFd, events: EventMask, owner: Owner) -> Result<()> {
        if let Some(owner_id) = self.registry.borrow().owner_of(fd) {
            debug!("fd {} already owned by handle {}", fd, owner_id);
            return Err(WatchError::AlreadyWatched(fd));
        }

        // the caller keeps the descriptor open for as long as it is registered
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.add(borrowed, EpollEvent::new(events, fd as u64))?;

        debug!("watching fd {} for {:?} (handle {})", fd, events, owner.id());
        self.registry.borrow_mut().insert(fd, owner)
    }

    pub fn modify(&self, fd: RawFd, events: EventMask) -> Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll
            .modify(borrowed, &mut EpollEvent::new(events, fd as u64))?;
        debug!("fd {} now watched for {:?}", fd, events);
        Ok(())
    }

    /// Unregisters `fd`. The registry entry goes away even if the kernel
    /// refuses, since the caller no longer wants the descriptor watched.
    pub fn remove(&self, fd: RawFd) -> Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let res = self.epoll.delete(borrowed);
        let owner = self.registry.borrow_mut().erase(fd);
        debug!("stopped watching fd {} (handle {:?})", fd, owner);
        Ok(res?)
    }

    pub fn forget_owner(&self, id: HandleId) -> usize {
        let forgotten = self.registry.borrow_mut().forget_owner(id);
        if forgotten > 0 {
            debug!("forgot {} fds of handle {}", forgotten, id);
        }
        forgotten
    }

    fn deliver(&self, event: PendingEvent) {
        let fd = event.fd();
        let sink = {
            let registry = self.registry.borrow();
            match fd {
                Some(fd) => registry.lookup(fd),
                // wait failures go to whoever got the last event, if still around
                None => self
                    .last_fd
                    .get()
                    .and_then(|last| registry.lookup(last))
                    .or_else(|| registry.first_owner()),
            }
        };

        match sink {
            Some(sink) => {
                if fd.is_some() {
                    self.last_fd.set(fd);
                }
                trace!("dispatching {:?}", event);
                sink.dispatch_event(event.into_delivery());
            }
            None => trace!("dropping {:?}: no owner", event),
        }
    }
}

impl Drop for SharedContext {
    fn drop(&mut self) {
        self.poll_loop.abort();
        let discarded = self.consumer.drain();
        self.poll_loop.join();

        let registry = self.registry.get_mut();
        if !registry.is_empty() {
            debug!("{} fds still registered at teardown", registry.len());
        }
        info!(
            "polling context torn down ({} pending events discarded)",
            discarded
        );
    }
}

/// Whether a polling context exists on this thread.
pub fn is_active() -> bool {
    current().is_some()
}

/// Runs one turn of the cooperative loop: waits up to `timeout` for the next
/// event and hands it to its owner. Returns the number of events taken off the
/// channel (0 or 1), including ones dropped for lack of an owner.
pub fn dispatch(timeout: Duration) -> usize {
    let Some(ctx) = current() else {
        return 0;
    };
    let Some(in_flight) = ctx.consumer.recv(timeout) else {
        return 0;
    };
    ctx.deliver(in_flight.event());
    // acknowledge before `ctx` can go away, its teardown joins the poll thread
    drop(in_flight);
    1
}

/// Delivers every event that is already waiting, without blocking.
pub fn dispatch_ready() -> usize {
    let Some(ctx) = current() else {
        return 0;
    };
    let mut delivered = 0;
    while let Some(in_flight) = ctx.consumer.try_recv() {
        ctx.deliver(in_flight.event());
        drop(in_flight);
        delivered += 1;
    }
    delivered
}
