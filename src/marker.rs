//! Command-layer performance markers.
//!
//! A marker handle listens for range-complete messages, accumulates the
//! byte total under a lock, and a periodic timer emits an intermediate
//! command response carrying the running decimal total. Used by long
//! checksum commands; transfers proper get their markers from the
//! framework.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::gridftp::ServerOps;
use crate::msg::{CompIds, MsgBody, MsgBus, RegistrationId};

struct Shared {
    total_bytes: Mutex<u64>,
    stop: Mutex<bool>,
    stop_cond: Condvar,
}

/// A running marker emitter. Stop (or drop) it at command end.
pub struct MarkerHandle {
    bus: MsgBus,
    registration: Option<RegistrationId>,
    timer: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MarkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerHandle")
            .field("total_bytes", &*self.shared.total_bytes.lock())
            .finish()
    }
}

impl MarkerHandle {
    /// Start emitting markers for the current command.
    ///
    /// The update interval is negotiated with the framework once, here;
    /// zero or negative disables markers and returns `None`.
    pub fn start(bus: MsgBus, server: Arc<dyn ServerOps>) -> Option<MarkerHandle> {
        let interval = server.update_interval();
        if interval <= 0 {
            return None;
        }
        let interval = Duration::from_secs(interval as u64);

        let shared = Arc::new(Shared {
            total_bytes: Mutex::new(0),
            stop: Mutex::new(false),
            stop_cond: Condvar::new(),
        });

        let recv_shared = Arc::clone(&shared);
        let registration = bus.register(CompIds::DATA_RANGES, CompIds::MARKERS, move |msg| {
            if let MsgBody::RangeComplete { length, .. } = msg.body {
                *recv_shared.total_bytes.lock() += length;
            }
            Ok(())
        });

        let timer_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("cksm-markers".to_string())
            .spawn(move || timer_main(&timer_shared, &*server, interval));
        let Ok(timer) = spawned else {
            // Without a timer nothing will ever emit or stop this handle;
            // drain the registration rather than leave it on the bus.
            bus.unregister(registration);
            return None;
        };

        Some(MarkerHandle { bus, registration: Some(registration), timer: Some(timer), shared })
    }

    /// Bytes accumulated so far.
    pub fn total_bytes(&self) -> u64 {
        *self.shared.total_bytes.lock()
    }

    /// Unregister from the bus (draining in-flight deliveries), stop the
    /// timer, and join it.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.bus.unregister(registration);
        }
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_cond.notify_all();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl Drop for MarkerHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn timer_main(shared: &Shared, server: &dyn ServerOps, interval: Duration) {
    loop {
        let mut stop = shared.stop.lock();
        if *stop {
            break;
        }
        shared.stop_cond.wait_for(&mut stop, interval);
        if *stop {
            break;
        }
        drop(stop);
        let total = *shared.total_bytes.lock();
        server.intermediate_command(&total.to_string());
    }
    debug!("marker timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::error::Result;
    use crate::gridftp::{ReadComplete, WriteComplete};
    use crate::sched::Scheduler;

    struct TimerServer {
        interval: i32,
        markers: Mutex<Vec<String>>,
    }

    impl ServerOps for TimerServer {
        fn block_size(&self) -> u32 {
            0
        }
        fn optimal_concurrency(&self) -> usize {
            0
        }
        fn update_interval(&self) -> i32 {
            self.interval
        }
        fn begin_transfer(&self) {}
        fn finished_transfer(&self, _result: Result<()>) {}
        fn register_write(
            &self,
            _buffer: Buffer,
            _offset: u64,
            _length: usize,
            _done: WriteComplete,
        ) -> Result<()> {
            unreachable!("markers never move data")
        }
        fn register_read(&self, _buffer: Buffer, _done: ReadComplete) -> Result<()> {
            unreachable!("markers never move data")
        }
        fn intermediate_command(&self, text: &str) {
            self.markers.lock().push(text.to_string());
        }
        fn finished_command(&self, _result: Result<()>, _response: &str) {}
    }

    #[test]
    fn disabled_when_interval_is_not_positive() {
        let bus = MsgBus::new(Scheduler::new(1).unwrap());
        for interval in [0, -5] {
            let server = Arc::new(TimerServer { interval, markers: Mutex::new(Vec::new()) });
            assert!(MarkerHandle::start(bus.clone(), server as Arc<dyn ServerOps>).is_none());
        }
    }

    #[test]
    fn accumulates_range_completions_and_emits_totals() {
        let bus = MsgBus::new(Scheduler::new(1).unwrap());
        let server = Arc::new(TimerServer { interval: 1, markers: Mutex::new(Vec::new()) });
        let handle = MarkerHandle::start(bus.clone(), Arc::clone(&server) as Arc<dyn ServerOps>)
            .expect("interval is positive");

        bus.send(
            CompIds::ANY,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 0, length: 700 },
        );
        bus.send(
            CompIds::ANY,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 700, length: 300 },
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.total_bytes() != 1000 {
            assert!(std::time::Instant::now() < deadline, "completions not delivered");
            thread::sleep(Duration::from_millis(5));
        }
        // Let one timer tick fire with the accumulated total.
        thread::sleep(Duration::from_millis(1300));
        handle.stop();
        let markers = server.markers.lock();
        assert!(markers.iter().any(|m| m == "1000"), "markers: {markers:?}");
    }
}
