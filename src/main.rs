mod cli;

use crate::cli::Cli;
use clap::Parser;
use epwatch::{
    conf::Config,
    mask,
    utils::{drain_fd, set_fd_nonblocking},
    Delivery, EventMask, WatchHandle,
};
use log::{debug, error, info, warn};
use std::{cell::RefCell, error::Error, os::fd::RawFd, rc::Rc};

/// Logs what a descriptor has to say. Descriptors that reached end of file or
/// hung up are queued in `finished` and removed by the loop.
fn on_event(delivery: Delivery, finished: &RefCell<Vec<RawFd>>) {
    let ready = match delivery {
        Ok(ready) => ready,
        Err(e) => {
            error!("poll failed: {}", e);
            return;
        }
    };

    let mut done = false;
    if ready.events.intersects(EventMask::EPOLLIN | EventMask::EPOLLPRI) {
        match drain_fd(ready.fd) {
            Ok(drained) => {
                if !drained.data.is_empty() {
                    info!(
                        "fd {}: {}",
                        ready.fd,
                        String::from_utf8_lossy(&drained.data).trim_end()
                    );
                }
                done = drained.eof;
            }
            Err(e) => {
                error!("reading fd {} failed: {}", ready.fd, e);
                done = true;
            }
        }
    } else if ready
        .events
        .intersects(EventMask::EPOLLHUP | EventMask::EPOLLERR | EventMask::EPOLLRDHUP)
    {
        done = true;
    }

    let mut finished = finished.borrow_mut();
    if done && !finished.contains(&ready.fd) {
        finished.push(ready.fd);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    env_logger::builder().filter_level(cli.log_level()).init();

    let config = Config::load(&cli.config)?;
    debug!("{:#?}", config);

    let finished = Rc::new(RefCell::new(Vec::new()));
    let sink = finished.clone();
    let handle = WatchHandle::with_config(config.watcher.clone(), move |delivery| {
        on_event(delivery, &sink)
    });

    for watch in &config.watch {
        // drain_fd relies on reads returning EAGAIN once the data runs out
        set_fd_nonblocking(watch.fd, true)?;
        handle.add(watch.fd, mask::from_names(&watch.events)?)?;
    }
    info!("watching {:?}", handle.descriptors());

    let tick = config.watcher.poll_timeout();
    while !handle.descriptors().is_empty() {
        epwatch::dispatch(tick);

        let done: Vec<RawFd> = finished.borrow_mut().drain(..).collect();
        for fd in done {
            info!("fd {} finished", fd);
            if let Err(e) = handle.remove(fd) {
                warn!("couldn't stop watching fd {}: {}", fd, e);
            }
        }
    }
    handle.close()?;

    for watch in &config.watch {
        if let Err(e) = set_fd_nonblocking(watch.fd, false) {
            warn!("couldn't restore blocking mode on fd {}: {}", watch.fd, e);
        }
    }
    Ok(())
}
