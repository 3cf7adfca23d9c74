//! Control channel: stick commands, enable/disable, takeoff and land.
//!
//! The gateway answers every control command with one acknowledgment line but
//! never says which command it belongs to. Replies are therefore matched purely
//! by order:
//! - a caller that wants the reply calls `read()` after sending,
//! - a caller that does not calls `dispose_next()`, so the next line to arrive
//!   is dropped instead of being handed to someone else.
//!
//! This only lines up when there is one outstanding control request at a
//! time. Two threads mixing waited and fire-and-forget commands can receive
//! each other's acknowledgments; the protocol carries nothing that would let
//! the channel tell them apart. Callers must serialise control requests.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{lock, read_until_closed, LineWriter, Reader, ReaderExit};
use crate::error::{ChannelKind, Result};
use crate::framing::LineFramer;

pub struct ControlChannel {
    writer: LineWriter,
    shared: Arc<ControlState>,
    reader: Reader,
}

#[derive(Default)]
struct ControlState {
    dispose: Mutex<u64>,
    acks: Mutex<AckQueue>,
    arrived: Condvar,
}

#[derive(Default)]
struct AckQueue {
    lines: VecDeque<String>,
    closed: bool,
}

impl ControlState {
    fn on_line(&self, line: String) {
        {
            let mut dispose = lock(&self.dispose);
            if *dispose > 0 {
                *dispose -= 1;
                log::debug!("control channel: disposed {:?} ({} left)", line, *dispose);
                return;
            }
        }
        lock(&self.acks).lines.push_back(line);
        self.arrived.notify_all();
    }

    fn close(&self) {
        lock(&self.acks).closed = true;
        self.arrived.notify_all();
    }
}

impl ControlChannel {
    /// Takes over a connected control socket and starts its reader.
    pub fn start(stream: TcpStream, chunk_size: usize) -> Result<Self> {
        let writer = LineWriter::new(ChannelKind::Control, &stream)?;
        let shared = Arc::new(ControlState::default());
        let state = shared.clone();
        let reader = Reader::spawn(ChannelKind::Control, &stream, move |socket, stopping| {
            run_reader(socket, chunk_size, &stopping, &state)
        })?;
        log::info!("control channel started");
        Ok(Self {
            writer,
            shared,
            reader,
        })
    }

    /// Sends `command`; does not wait for the acknowledgment.
    pub fn send_command(&self, command: &str) -> Result<()> {
        self.writer.send(command)
    }

    /// Pops the oldest acknowledgment.
    ///
    /// With `block` false this never waits. With `block` true it waits for
    /// one to arrive, at most `timeout` if given. Once the channel has closed
    /// and the queue is drained it returns `None` at once instead of waiting
    /// for a reply that can no longer come.
    ///
    /// When nothing is returned from an open channel, the next acknowledgment
    /// to arrive is marked for disposal, exactly as if `dispose_next()` had
    /// been called: the reply the caller gave up on is assumed to still be on
    /// its way.
    pub fn read(&self, block: bool, timeout: Option<Duration>) -> Option<String> {
        let mut acks = lock(&self.shared.acks);
        if block {
            let deadline = timeout.map(|t| Instant::now() + t);
            while acks.lines.is_empty() && !acks.closed {
                acks = match deadline {
                    None => self
                        .shared
                        .arrived
                        .wait(acks)
                        .unwrap_or_else(std::sync::PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        self.shared
                            .arrived
                            .wait_timeout(acks, deadline - now)
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .0
                    }
                };
            }
        }
        if let Some(line) = acks.lines.pop_front() {
            return Some(line);
        }
        if acks.closed {
            return None;
        }
        drop(acks);
        self.dispose_next();
        None
    }

    /// Drops the next acknowledgment to arrive instead of queueing it.
    pub fn dispose_next(&self) {
        let mut dispose = lock(&self.shared.dispose);
        *dispose += 1;
    }

    /// Acknowledgments still waiting to be disposed of.
    pub fn pending_disposals(&self) -> u64 {
        *lock(&self.shared.dispose)
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Closes the socket and joins the reader.
    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.stop(timeout)
    }
}

fn run_reader(socket: TcpStream, chunk_size: usize, stopping: &AtomicBool, state: &ControlState) {
    let mut framer = LineFramer::new();
    let exit = read_until_closed(ChannelKind::Control, socket, chunk_size, stopping, |chunk| {
        for line in framer.push(chunk) {
            state.on_line(line);
        }
    });
    let dropped = framer.discard();
    if dropped > 0 {
        log::debug!("control channel: dropped {} unterminated bytes", dropped);
    }
    if exit == ReaderExit::Closed {
        log::info!("control channel: reader exited, no further acknowledgments");
    }
    state.close();
}
