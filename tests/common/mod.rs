//! Scripted server-framework double shared by the scenario tests.

// Each test binary uses a different subset of the mock.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use hss_dsi::gridftp::{ReadComplete, ServerOps, WriteComplete};
use hss_dsi::{Buffer, Error, Result};

#[derive(Default)]
struct MockState {
    /// Chunks still to hand to register_read, in delivery order.
    inbound: Vec<(u64, Vec<u8>)>,
    /// Writes observed through register_write.
    written: Vec<(u64, Vec<u8>)>,
    /// Intermediate command responses observed.
    markers: Vec<String>,
    transfer_result: Option<Result<()>>,
    begin_count: usize,
    finished_count: usize,
    command: Option<(Result<()>, String)>,
}

/// A scripted [`ServerOps`]: inbound chunks come from a prepared list,
/// outbound writes are recorded, and completions are signaled so tests can
/// block on them. Callbacks are dispatched on short-lived threads, matching
/// the framework's everything-is-asynchronous contract.
pub struct MockServer {
    block_size: u32,
    concurrency: usize,
    update_interval: i32,
    state: Mutex<MockState>,
    cond: Condvar,
}

impl MockServer {
    pub fn new(block_size: u32, concurrency: usize) -> Arc<MockServer> {
        Arc::new(MockServer {
            block_size,
            concurrency,
            update_interval: 0,
            state: Mutex::new(MockState::default()),
            cond: Condvar::new(),
        })
    }

    pub fn with_update_interval(block_size: u32, interval: i32) -> Arc<MockServer> {
        Arc::new(MockServer {
            block_size,
            concurrency: 2,
            update_interval: interval,
            state: Mutex::new(MockState::default()),
            cond: Condvar::new(),
        })
    }

    /// Queue inbound chunks, delivered to register_read in this order.
    pub fn script_inbound(&self, chunks: &[(u64, &[u8])]) {
        let mut state = self.state.lock();
        state.inbound = chunks.iter().map(|(o, d)| (*o, d.to_vec())).collect();
    }

    /// Block until finished_transfer fires, returning its result.
    pub fn wait_transfer(&self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(30);
        let mut state = self.state.lock();
        while state.transfer_result.is_none() {
            let timeout = deadline.saturating_duration_since(Instant::now());
            assert!(!timeout.is_zero(), "transfer did not finish");
            self.cond.wait_for(&mut state, timeout);
        }
        state.transfer_result.clone().unwrap()
    }

    /// Block until finished_command fires, returning (result, response).
    pub fn wait_command(&self) -> (Result<()>, String) {
        let deadline = Instant::now() + Duration::from_secs(30);
        let mut state = self.state.lock();
        while state.command.is_none() {
            let timeout = deadline.saturating_duration_since(Instant::now());
            assert!(!timeout.is_zero(), "command did not finish");
            self.cond.wait_for(&mut state, timeout);
        }
        state.command.clone().unwrap()
    }

    /// Writes observed so far, sorted by offset.
    pub fn written(&self) -> Vec<(u64, Vec<u8>)> {
        let mut writes = self.state.lock().written.clone();
        writes.sort_by_key(|(o, _)| *o);
        writes
    }

    pub fn markers(&self) -> Vec<String> {
        self.state.lock().markers.clone()
    }

    pub fn begin_count(&self) -> usize {
        self.state.lock().begin_count
    }

    pub fn finished_count(&self) -> usize {
        self.state.lock().finished_count
    }
}

impl ServerOps for MockServer {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn optimal_concurrency(&self) -> usize {
        self.concurrency
    }

    fn update_interval(&self) -> i32 {
        self.update_interval
    }

    fn begin_transfer(&self) {
        self.state.lock().begin_count += 1;
    }

    fn finished_transfer(&self, result: Result<()>) {
        let mut state = self.state.lock();
        state.finished_count += 1;
        state.transfer_result = Some(result);
        self.cond.notify_all();
    }

    fn register_write(
        &self,
        buffer: Buffer,
        offset: u64,
        length: usize,
        done: WriteComplete,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.written.push((offset, buffer.bytes()[..length].to_vec()));
        }
        thread::spawn(move || done(buffer, Ok(())));
        Ok(())
    }

    fn register_read(&self, mut buffer: Buffer, done: ReadComplete) -> Result<()> {
        let next = {
            let mut state = self.state.lock();
            if state.inbound.is_empty() { None } else { Some(state.inbound.remove(0)) }
        };
        thread::spawn(move || match next {
            Some((offset, data)) => {
                if data.len() > buffer.bytes().len() {
                    done(buffer, Err(Error::Peer("chunk larger than buffer".to_string())));
                    return;
                }
                buffer.bytes_mut()[..data.len()].copy_from_slice(&data);
                done(buffer, Ok(Some((offset, data.len()))));
            }
            None => done(buffer, Ok(None)),
        });
        Ok(())
    }

    fn intermediate_command(&self, text: &str) {
        self.state.lock().markers.push(text.to_string());
    }

    fn finished_command(&self, result: Result<()>, response: &str) {
        let mut state = self.state.lock();
        state.command = Some((result, response.to_string()));
        self.cond.notify_all();
    }
}
