//! Maps watched descriptors to the handle that owns them.
//!
//! There is exactly one owner per descriptor. The registry lives inside the
//! shared context and is only ever touched from the cooperative thread, so it
//! holds plain `Weak` back-references and needs no locking. Owners are held
//! weakly: the registry never keeps a handle alive, and handle teardown is what
//! purges its entries (see [`Registry::forget_owner`]).
use std::{collections::BTreeMap, os::fd::RawFd, rc::Rc, rc::Weak};

use crate::{
    error::{Result, WatchError},
    watcher::EventSink,
};

pub type HandleId = u64;

#[derive(Clone)]
pub struct Owner {
    id: HandleId,
    sink: Weak<dyn EventSink>,
}

impl Owner {
    pub fn new(id: HandleId, sink: Weak<dyn EventSink>) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }
}

#[derive(Default)]
pub struct Registry {
    owners: BTreeMap<RawFd, Owner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.owners.contains_key(&fd)
    }

    pub fn insert(&mut self, fd: RawFd, owner: Owner) -> Result<()> {
        if self.contains(fd) {
            return Err(WatchError::AlreadyWatched(fd));
        }
        self.owners.insert(fd, owner);
        Ok(())
    }

    pub fn erase(&mut self, fd: RawFd) -> Option<HandleId> {
        self.owners.remove(&fd).map(|owner| owner.id)
    }

    pub fn owner_of(&self, fd: RawFd) -> Option<HandleId> {
        self.owners.get(&fd).map(Owner::id)
    }

    /// The sink that should receive events for `fd` right now.
    pub fn lookup(&self, fd: RawFd) -> Option<Rc<dyn EventSink>> {
        self.owners.get(&fd).and_then(|owner| owner.sink.upgrade())
    }

    /// Owner of the lowest registered descriptor.
    pub fn first_owner(&self) -> Option<Rc<dyn EventSink>> {
        self.owners.values().find_map(|owner| owner.sink.upgrade())
    }

    /// Drops every entry that belongs to `id`, returning how many went away.
    pub fn forget_owner(&mut self, id: HandleId) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, owner| owner.id != id);
        before - self.owners.len()
    }
}
