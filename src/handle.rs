//! The per-caller watch handle.
//!
//! A handle is either open or closed, and closed is terminal. It references the
//! thread's shared polling context only while it owns at least one descriptor: the
//! reference is taken on the first successful `add` and given back when the
//! owned set drains or the handle closes. Dropping an open handle closes it.
use log::{debug, warn};
use std::{
    cell::{Cell, RefCell},
    fmt,
    os::fd::RawFd,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    conf::WatcherConfig,
    error::{Result, WatchError},
    mask::EventMask,
    registry::{HandleId, Owner},
    watcher::{Delivery, EventSink, SharedContext},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Callback = Box<dyn FnMut(Delivery)>;

pub struct WatchHandle {
    state: Rc<HandleState>,
}

struct HandleState {
    id: HandleId,
    config: WatcherConfig,
    callback: RefCell<Callback>,
    fds: RefCell<Vec<RawFd>>,
    closed: Cell<bool>,
    context: RefCell<Option<Rc<SharedContext>>>,
}

impl WatchHandle {
    /// Creates an open handle. `callback` runs on this thread, from
    /// [`dispatch`](crate::dispatch), for every event on a descriptor this
    /// handle owns.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Delivery) + 'static,
    {
        Self::with_config(WatcherConfig::default(), callback)
    }

    /// Like [`WatchHandle::new`]. The config only matters if this handle ends
    /// up creating the thread's polling context.
    pub fn with_config<F>(config: WatcherConfig, callback: F) -> Self
    where
        F: FnMut(Delivery) + 'static,
    {
        Self {
            state: Rc::new(HandleState {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                config,
                callback: RefCell::new(Box::new(callback)),
                fds: RefCell::new(Vec::new()),
                closed: Cell::new(false),
                context: RefCell::new(None),
            }),
        }
    }

    pub fn add(&self, fd: RawFd, events: EventMask) -> Result<&Self> {
        self.ensure_open("add")?;
        if fd < 0 {
            return Err(WatchError::InvalidArgument("fd must not be negative"));
        }

        let ctx = self.state.context_or_acquire()?;
        let sink: Weak<HandleState> = Rc::downgrade(&self.state);
        let sink: Weak<dyn EventSink> = sink;
        let res = ctx.add(fd, events, Owner::new(self.state.id, sink));
        drop(ctx);

        match res {
            Ok(()) => {
                self.state.fds.borrow_mut().push(fd);
                Ok(self)
            }
            Err(e) => {
                self.state.release_if_idle();
                Err(e)
            }
        }
    }

    pub fn modify(&self, fd: RawFd, events: EventMask) -> Result<&Self> {
        self.ensure_open("modify")?;
        let ctx = self.state.owning_context(fd)?;
        ctx.modify(fd, events)?;
        Ok(self)
    }

    /// Stops watching `fd`. The descriptor is forgotten even when the kernel
    /// call fails; that failure is still reported.
    pub fn remove(&self, fd: RawFd) -> Result<&Self> {
        self.ensure_open("remove")?;
        let ctx = self.state.owning_context(fd)?;
        let res = ctx.remove(fd);
        drop(ctx);

        self.state.fds.borrow_mut().retain(|&owned| owned != fd);
        self.state.release_if_idle();
        res.map(|_| self)
    }

    /// Removes every owned descriptor and closes the handle for good.
    ///
    /// All removals are attempted; if several fail, each is logged and the last
    /// one is returned.
    pub fn close(&self) -> Result<()> {
        self.ensure_open("close")?;
        self.state.teardown()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.get()
    }

    /// Descriptors owned by this handle, in the order they were added.
    pub fn descriptors(&self) -> Vec<RawFd> {
        self.state.fds.borrow().clone()
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(WatchError::ClosedHandleMisuse(op))
        } else {
            Ok(())
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.state.teardown() {
                warn!("handle {} dropped with errors: {}", self.state.id, e);
            }
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.state.id)
            .field("fds", &self.state.fds.borrow())
            .field("closed", &self.state.closed.get())
            .finish()
    }
}

impl HandleState {
    fn context_or_acquire(&self) -> Result<Rc<SharedContext>> {
        if let Some(ctx) = self.context.borrow().as_ref() {
            return Ok(ctx.clone());
        }
        let ctx = SharedContext::acquire(&self.config)?;
        *self.context.borrow_mut() = Some(ctx.clone());
        Ok(ctx)
    }

    fn owning_context(&self, fd: RawFd) -> Result<Rc<SharedContext>> {
        let ctx = self
            .context
            .borrow()
            .clone()
            .ok_or(WatchError::NotWatching(fd))?;
        if !self.fds.borrow().contains(&fd) {
            return Err(WatchError::NotWatching(fd));
        }
        Ok(ctx)
    }

    fn release_if_idle(&self) {
        if self.fds.borrow().is_empty() {
            let released = self.context.borrow_mut().take();
            if released.is_some() {
                debug!("handle {} released the polling context", self.id);
            }
        }
    }

    fn teardown(&self) -> Result<()> {
        self.closed.set(true);
        let fds = std::mem::take(&mut *self.fds.borrow_mut());
        let Some(ctx) = self.context.borrow_mut().take() else {
            return Ok(());
        };

        let mut last_err = None;
        for fd in fds {
            if let Err(e) = ctx.remove(fd) {
                warn!("handle {}: removing fd {} failed: {}", self.id, fd, e);
                last_err = Some(e);
            }
        }
        ctx.forget_owner(self.id);
        debug!("handle {} closed", self.id);

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl EventSink for HandleState {
    fn dispatch_event(&self, delivery: Delivery) {
        match self.callback.try_borrow_mut() {
            Ok(mut callback) => (*callback)(delivery),
            Err(_) => warn!(
                "handle {}: callback re-entered, dropping {:?}",
                self.id, delivery
            ),
        }
    }
}
