//! Single-slot handoff from the poll thread to the cooperative loop.
//!
//! The producer does not get to fetch another kernel event until the consumer
//! has finished with the previous one: `push` returns only once the event was
//! taken *and* acknowledged, and the acknowledgement is sent when the
//! [`InFlight`] guard drops, i.e. after the callback returned. With
//! level-triggered descriptors the same readiness would otherwise be reported
//! on every `epoll_wait` until the owner gets around to clearing it.
//!
//! Producer waits are sliced into `tick`-sized pieces so that an abort request
//! is noticed within one tick, even when nobody is consuming anymore.
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use super::PendingEvent;

pub fn channel() -> (Producer, Consumer) {
    let (event_tx, event_rx) = channel::bounded(1);
    let (ack_tx, ack_rx) = channel::bounded(1);
    (
        Producer {
            events: event_tx,
            acks: ack_rx,
        },
        Consumer {
            events: event_rx,
            acks: ack_tx,
        },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    Aborted,
    Disconnected,
}

pub struct Producer {
    events: Sender<PendingEvent>,
    acks: Receiver<()>,
}

impl Producer {
    /// Hands `event` over and blocks until the consumer is done with it.
    pub fn push(
        &self,
        mut event: PendingEvent,
        abort: &AtomicBool,
        tick: Duration,
    ) -> Result<(), PushError> {
        loop {
            match self.events.send_timeout(event, tick) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if abort.load(Ordering::Acquire) {
                        return Err(PushError::Aborted);
                    }
                    event = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(PushError::Disconnected),
            }
        }

        loop {
            match self.acks.recv_timeout(tick) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    if abort.load(Ordering::Acquire) {
                        return Err(PushError::Aborted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(PushError::Disconnected),
            }
        }
    }
}

pub struct Consumer {
    events: Receiver<PendingEvent>,
    acks: Sender<()>,
}

impl Consumer {
    pub fn recv(&self, timeout: Duration) -> Option<InFlight<'_>> {
        self.events
            .recv_timeout(timeout)
            .ok()
            .map(|event| self.in_flight(event))
    }

    pub fn try_recv(&self) -> Option<InFlight<'_>> {
        self.events.try_recv().ok().map(|event| self.in_flight(event))
    }

    /// Takes whatever sits in the slot and releases the producer. Returns the
    /// number of events discarded.
    pub fn drain(&self) -> usize {
        let mut discarded = 0;
        while self.try_recv().is_some() {
            discarded += 1;
        }
        discarded
    }

    fn in_flight(&self, event: PendingEvent) -> InFlight<'_> {
        InFlight {
            event,
            acks: &self.acks,
        }
    }
}

/// An event taken out of the slot. The producer stays blocked until this is
/// dropped.
pub struct InFlight<'a> {
    event: PendingEvent,
    acks: &'a Sender<()>,
}

impl InFlight<'_> {
    pub fn event(&self) -> PendingEvent {
        self.event
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // never blocks: at most one event is outstanding, so the ack slot is free
        // unless the producer already gave up on it
        let _ = self.acks.try_send(());
    }
}
