//! Small worker pool for one-shot callbacks.
//!
//! The message bus and the periodic marker timer hand work off to this pool
//! instead of running callbacks on the sender's thread, so a slow registrant
//! never stalls a transfer thread.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of worker threads draining a FIFO of one-shot tasks.
pub struct Scheduler {
    tx: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl Scheduler {
    /// Spawn a pool with `threads` workers.
    pub fn new(threads: usize) -> Result<Arc<Scheduler>> {
        let (tx, rx) = channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads.max(1) {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("dsi-dispatch-{n}"))
                .spawn(move || worker_main(&rx))
                .map_err(|_| Error::OutOfMemory("dispatch worker thread"))?;
            workers.push(handle);
        }
        Ok(Arc::new(Scheduler {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }))
    }

    /// Queue a one-shot task. Tasks run in FIFO order per worker; ordering
    /// across workers is not defined.
    pub fn spawn_oneshot(&self, task: impl FnOnce() + Send + 'static) {
        let tx = self.tx.lock();
        if let Some(tx) = tx.as_ref() {
            // Send only fails when every worker is gone, i.e. at teardown.
            let _ = tx.send(Box::new(task));
        }
    }
}

fn worker_main(rx: &Mutex<Receiver<Task>>) {
    loop {
        let task = {
            let guard = rx.lock();
            guard.recv()
        };
        match task {
            Ok(task) => task(),
            Err(_) => break,
        }
    }
    debug!("dispatch worker exiting");
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        self.tx.lock().take();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_queued_tasks() {
        let sched = Scheduler::new(2).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let count = Arc::clone(&count);
            sched.spawn_oneshot(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) != 16 {
            assert!(std::time::Instant::now() < deadline, "tasks did not run");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn drop_joins_workers() {
        let sched = Scheduler::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        sched.spawn_oneshot(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        drop(sched);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
