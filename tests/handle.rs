use epwatch::{
    dispatch, dispatch_ready, is_active, mask,
    utils::{drain_fd, set_fd_nonblocking},
    Delivery, EventMask, Readiness, WatchError, WatchHandle,
};
use nix::{
    errno::Errno,
    unistd::{dup2, pipe},
};
use std::{
    cell::RefCell,
    fs::File,
    io::Write,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

const WINDOW: Duration = Duration::from_millis(200);
const QUIET: Duration = Duration::from_millis(150);
const NEVER_OPEN: RawFd = 1 << 30;

type Seen = Rc<RefCell<Vec<Delivery>>>;

fn nonblocking_pipe() -> (OwnedFd, File) {
    let (rx, tx) = pipe().unwrap();
    set_fd_nonblocking(rx.as_raw_fd(), true).unwrap();
    (rx, File::from(tx))
}

/// Records every delivery and reads the descriptor dry, clearing level-triggered
/// readiness before the next event can be fetched.
fn draining_recorder() -> (Seen, impl FnMut(Delivery) + 'static) {
    let seen: Seen = Rc::default();
    let sink = seen.clone();
    let callback = move |delivery: Delivery| {
        if let Ok(ready) = &delivery {
            drain_fd(ready.fd).unwrap();
        }
        sink.borrow_mut().push(delivery);
    };
    (seen, callback)
}

/// Records every delivery and leaves the descriptor alone.
fn recorder() -> (Seen, impl FnMut(Delivery) + 'static) {
    let seen: Seen = Rc::default();
    let sink = seen.clone();
    (seen, move |delivery: Delivery| sink.borrow_mut().push(delivery))
}

fn readable() -> EventMask {
    mask::from_raw(mask::IN).unwrap()
}

#[test]
fn pipe_write_is_delivered_once() {
    let (rx, mut tx) = nonblocking_pipe();
    let (seen, callback) = draining_recorder();
    let handle = WatchHandle::new(callback);
    handle.add(rx.as_raw_fd(), readable()).unwrap();

    tx.write_all(b"x").unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    assert_eq!(
        *seen.borrow(),
        vec![Ok(Readiness {
            fd: rx.as_raw_fd(),
            events: EventMask::EPOLLIN,
        })]
    );

    // the byte was consumed in the callback, nothing fires again
    assert_eq!(dispatch(QUIET), 0);
    assert_eq!(seen.borrow().len(), 1);

    handle.close().unwrap();
}

#[test]
fn nothing_is_delivered_without_dispatch() {
    let (rx, mut tx) = nonblocking_pipe();
    let (seen, callback) = draining_recorder();
    let handle = WatchHandle::new(callback);
    handle.add(rx.as_raw_fd(), readable()).unwrap();

    tx.write_all(b"x").unwrap();
    // level-triggered: the poll thread would see this on every wait if it could
    thread::sleep(WINDOW);
    assert!(seen.borrow().is_empty());

    assert_eq!(dispatch_ready(), 1);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(dispatch(QUIET), 0);
}

#[test]
fn second_add_is_rejected_from_any_handle() {
    let (rx, _tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, first_cb) = recorder();
    let (_, second_cb) = recorder();
    let first = WatchHandle::new(first_cb);
    let second = WatchHandle::new(second_cb);

    first.add(fd, readable()).unwrap();
    assert_eq!(
        first.add(fd, readable()).unwrap_err(),
        WatchError::AlreadyWatched(fd)
    );
    assert_eq!(
        second.add(fd, readable()).unwrap_err(),
        WatchError::AlreadyWatched(fd)
    );
    assert_eq!(first.descriptors(), vec![fd]);
    assert!(second.descriptors().is_empty());
}

#[test]
fn closed_handle_rejects_everything() {
    let (rx, _tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, callback) = recorder();
    let handle = WatchHandle::new(callback);
    handle.add(fd, readable()).unwrap();

    assert!(!handle.is_closed());
    handle.close().unwrap();
    assert!(handle.is_closed());
    assert!(handle.descriptors().is_empty());

    assert_eq!(
        handle.add(fd, readable()).unwrap_err(),
        WatchError::ClosedHandleMisuse("add")
    );
    assert_eq!(
        handle.modify(fd, readable()).unwrap_err(),
        WatchError::ClosedHandleMisuse("modify")
    );
    assert_eq!(
        handle.remove(fd).unwrap_err(),
        WatchError::ClosedHandleMisuse("remove")
    );
    assert_eq!(
        handle.close().unwrap_err(),
        WatchError::ClosedHandleMisuse("close")
    );
}

#[test]
fn close_frees_descriptors_for_other_handles() {
    let (rx, mut tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (first_seen, first_cb) = draining_recorder();
    let (second_seen, second_cb) = draining_recorder();
    let first = WatchHandle::new(first_cb);
    let second = WatchHandle::new(second_cb);

    first.add(fd, readable()).unwrap();
    first.close().unwrap();
    second.add(fd, readable()).unwrap();

    tx.write_all(b"x").unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    assert!(first_seen.borrow().is_empty());
    assert_eq!(second_seen.borrow().len(), 1);
}

#[test]
fn dropping_an_open_handle_purges_its_descriptors() {
    let (rx, _tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, first_cb) = recorder();
    let (_, second_cb) = recorder();

    let first = WatchHandle::new(first_cb);
    first.add(fd, readable()).unwrap();
    drop(first);
    assert!(!is_active());

    let second = WatchHandle::new(second_cb);
    second.add(fd, readable()).unwrap();
    assert_eq!(second.descriptors(), vec![fd]);
}

#[test]
fn invalid_descriptor_leaves_nothing_behind() {
    let (_, callback) = recorder();
    let handle = WatchHandle::new(callback);

    assert_eq!(
        handle.add(NEVER_OPEN, readable()).unwrap_err(),
        WatchError::SystemCallFailure(Errno::EBADF)
    );
    assert!(handle.descriptors().is_empty());
    // the context was only needed for this add
    assert!(!is_active());

    assert_eq!(
        handle.add(-1, readable()).unwrap_err(),
        WatchError::InvalidArgument("fd must not be negative")
    );
    assert!(!handle.is_closed());
}

#[test]
fn event_for_a_removed_descriptor_is_dropped() {
    let (rx, mut tx) = nonblocking_pipe();
    let (other_rx, _other_tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (seen, callback) = recorder();
    let handle = WatchHandle::new(callback);
    handle.add(fd, readable()).unwrap();
    // keeps the context alive once `fd` goes away
    handle.add(other_rx.as_raw_fd(), readable()).unwrap();

    tx.write_all(b"x").unwrap();
    // give the poll thread time to fetch the event and park it in the channel
    thread::sleep(WINDOW);
    handle.remove(fd).unwrap();

    assert_eq!(dispatch(WINDOW), 1);
    assert!(seen.borrow().is_empty());
    assert_eq!(dispatch(QUIET), 0);
}

#[test]
fn modify_and_remove_need_ownership() {
    let (rx, _tx) = nonblocking_pipe();
    let (other_rx, _other_tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, first_cb) = recorder();
    let (_, second_cb) = recorder();
    let first = WatchHandle::new(first_cb);
    let second = WatchHandle::new(second_cb);

    // no context yet
    assert_eq!(
        second.modify(fd, readable()).unwrap_err(),
        WatchError::NotWatching(fd)
    );
    assert_eq!(second.remove(fd).unwrap_err(), WatchError::NotWatching(fd));

    first.add(fd, readable()).unwrap();
    second.add(other_rx.as_raw_fd(), readable()).unwrap();
    assert_eq!(
        second.modify(fd, readable()).unwrap_err(),
        WatchError::NotWatching(fd)
    );
    assert_eq!(second.remove(fd).unwrap_err(), WatchError::NotWatching(fd));
    assert_eq!(first.descriptors(), vec![fd]);
}

#[test]
fn modify_changes_what_is_reported() {
    let (rx, mut tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (seen, callback) = draining_recorder();
    let handle = WatchHandle::new(callback);

    // a pipe's read end never becomes writable
    handle
        .add(fd, mask::from_raw(mask::OUT).unwrap())
        .unwrap();
    tx.write_all(b"x").unwrap();
    assert_eq!(dispatch(QUIET), 0);

    handle.modify(fd, readable()).unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn oneshot_needs_rearming() {
    let (rx, mut tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (seen, callback) = recorder();
    let handle = WatchHandle::new(callback);
    let oneshot = mask::from_raw(mask::IN | mask::ONESHOT).unwrap();

    handle.add(fd, oneshot).unwrap();
    tx.write_all(b"x").unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    // still unread, but disarmed
    assert_eq!(dispatch(QUIET), 0);

    handle.modify(fd, oneshot).unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn handles_share_one_context() {
    let (first_rx, _first_tx) = nonblocking_pipe();
    let (second_rx, _second_tx) = nonblocking_pipe();
    let (_, first_cb) = recorder();
    let (_, second_cb) = recorder();
    let first = WatchHandle::new(first_cb);
    let second = WatchHandle::new(second_cb);

    assert!(!is_active());
    first.add(first_rx.as_raw_fd(), readable()).unwrap();
    second.add(second_rx.as_raw_fd(), readable()).unwrap();
    assert!(is_active());

    first.close().unwrap();
    assert!(is_active());

    // emptying the owned set releases the reference just like close
    second.remove(second_rx.as_raw_fd()).unwrap();
    assert!(!is_active());
    assert!(!second.is_closed());
}

#[test]
fn events_go_to_the_owner_only() {
    let (first_rx, mut first_tx) = nonblocking_pipe();
    let (second_rx, mut second_tx) = nonblocking_pipe();
    let (first_seen, first_cb) = draining_recorder();
    let (second_seen, second_cb) = draining_recorder();
    let first = WatchHandle::new(first_cb);
    let second = WatchHandle::new(second_cb);
    first.add(first_rx.as_raw_fd(), readable()).unwrap();
    second.add(second_rx.as_raw_fd(), readable()).unwrap();

    second_tx.write_all(b"x").unwrap();
    assert_eq!(dispatch(WINDOW), 1);
    first_tx.write_all(b"y").unwrap();
    assert_eq!(dispatch(WINDOW), 1);

    let fds = |seen: &Seen| -> Vec<RawFd> {
        seen.borrow()
            .iter()
            .map(|delivery| delivery.as_ref().unwrap().fd)
            .collect()
    };
    assert_eq!(fds(&first_seen), vec![first_rx.as_raw_fd()]);
    assert_eq!(fds(&second_seen), vec![second_rx.as_raw_fd()]);
}

#[test]
fn close_reports_removal_failures_and_still_closes() {
    let (rx, tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, callback) = recorder();
    let handle = WatchHandle::new(callback);
    handle.add(fd, readable()).unwrap();

    // closing the descriptor behind the handle's back makes EPOLL_CTL_DEL fail
    drop(rx);
    drop(tx);
    let err = handle.close().unwrap_err();
    assert!(matches!(err, WatchError::SystemCallFailure(_)));
    assert!(err.errno().is_some());
    assert!(handle.is_closed());
    assert!(handle.descriptors().is_empty());
    assert!(!is_active());
}

#[test]
fn failed_remove_still_forgets_the_descriptor() {
    let (rx, _tx) = nonblocking_pipe();
    let (other_rx, _other_tx) = nonblocking_pipe();
    let fd = rx.as_raw_fd();
    let (_, callback) = recorder();
    let handle = WatchHandle::new(callback);
    handle.add(fd, readable()).unwrap();

    // swap another pipe in under the same number: the old file is closed
    // behind the handle's back and EPOLL_CTL_DEL no longer finds it
    dup2(other_rx.as_raw_fd(), fd).unwrap();
    let err = handle.remove(fd).unwrap_err();
    assert_eq!(err, WatchError::SystemCallFailure(Errno::ENOENT));
    assert_eq!(err.errno(), Some(Errno::ENOENT));
    assert!(handle.descriptors().is_empty());
    assert!(!is_active());

    // the number is free to be watched again
    handle.add(fd, readable()).unwrap();
    assert_eq!(handle.descriptors(), vec![fd]);
}

#[test]
fn last_close_tears_down_within_a_window() {
    let (rx, _tx) = nonblocking_pipe();
    let (_, callback) = recorder();
    let handle = WatchHandle::new(callback);
    handle.add(rx.as_raw_fd(), readable()).unwrap();
    assert!(is_active());

    let start = Instant::now();
    handle.close().unwrap();
    assert!(start.elapsed() <= WINDOW);
    assert!(!is_active());
    assert_eq!(dispatch(Duration::ZERO), 0);
}
