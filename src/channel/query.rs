//! Query channel: key/value requests and pushed updates.
//!
//! Every incoming line is routed by its `<module> <key>` prefix:
//! 1. a one-shot wait registered for the key receives the body and is removed,
//! 2. otherwise a persistent listener for the key receives the body,
//! 3. otherwise the full line goes to the unbound queue.
//!
//! Lines that cannot name a key (help output, anything with fewer than two
//! spaces) always go to the unbound queue. One-shot waits are checked before
//! listeners because the acknowledgment of `listen`/`unlisten` shares the key
//! with the pushed values.
//!
//! Listeners run on the reader thread while the listener table is locked.
//! They must not block on this channel (`read_once`, `read_unbound`) or
//! register/remove listeners from inside `on_value`.

use std::collections::{HashMap, VecDeque};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{lock, read_until_closed, LineWriter, Reader, ReaderExit};
use crate::error::{ChannelKind, Result};
use crate::framing::LineFramer;
use crate::listener::SharedListener;
use crate::protocol::{classify, Classified, UniqueKey};

pub struct QueryChannel {
    writer: LineWriter,
    shared: Arc<QueryState>,
    reader: Reader,
}

#[derive(Default)]
struct QueryState {
    pending: Mutex<HashMap<UniqueKey, Arc<PendingReply>>>,
    listeners: Mutex<HashMap<UniqueKey, SharedListener<str>>>,
    unbound: Mutex<VecDeque<String>>,
    unbound_ready: Condvar,
}

/// Result slot shared by every caller waiting on the same key.
#[derive(Default)]
struct PendingReply {
    body: Mutex<Option<String>>,
    ready: Condvar,
}

impl PendingReply {
    fn fulfil(&self, body: String) {
        *lock(&self.body) = Some(body);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Option<Duration>) -> Option<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut body = lock(&self.body);
        loop {
            if let Some(value) = body.as_ref() {
                return Some(value.clone());
            }
            body = match deadline {
                None => self.ready.wait(body).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.ready
                        .wait_timeout(body, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl QueryState {
    fn on_line(&self, line: String) {
        let (key, body) = match classify(&line) {
            Classified::Keyed { key, body } => (key, body),
            Classified::Unbound => {
                self.push_unbound(line);
                return;
            }
        };

        if let Some(reply) = lock(&self.pending).remove(&key) {
            log::debug!("query channel: reply for {}", key);
            reply.fulfil(body.to_string());
            return;
        }

        {
            let listeners = lock(&self.listeners);
            if let Some(listener) = listeners.get(&key) {
                listener.on_value(body);
                return;
            }
        }

        self.push_unbound(line);
    }

    fn push_unbound(&self, line: String) {
        log::debug!("query channel: unbound {:?}", line);
        lock(&self.unbound).push_back(line);
        self.unbound_ready.notify_one();
    }

    fn pop_unbound(&self, timeout: Option<Duration>) -> Option<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = lock(&self.unbound);
        loop {
            if let Some(line) = queue.pop_front() {
                return Some(line);
            }
            queue = match deadline {
                None => self
                    .unbound_ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.unbound_ready
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn notify_listeners_closed(&self) {
        let listeners = lock(&self.listeners);
        for (key, listener) in listeners.iter() {
            log::debug!("query channel: notifying listener on {} of closure", key);
            listener.on_error();
        }
    }
}

impl QueryChannel {
    /// Takes over a connected query socket and starts its reader.
    pub fn start(stream: TcpStream, chunk_size: usize) -> Result<Self> {
        let writer = LineWriter::new(ChannelKind::Query, &stream)?;
        let shared = Arc::new(QueryState::default());
        let state = shared.clone();
        let reader = Reader::spawn(ChannelKind::Query, &stream, move |socket, stopping| {
            run_reader(socket, chunk_size, &stopping, &state)
        })?;
        log::info!("query channel started");
        Ok(Self {
            writer,
            shared,
            reader,
        })
    }

    /// Sends `command` without registering for any reply.
    pub fn send_command(&self, command: &str) -> Result<()> {
        self.writer.send(command)
    }

    /// Sends `command` and blocks until a line for `key` arrives, returning
    /// its body.
    ///
    /// If another caller is already waiting on `key`, no command is sent and
    /// this call shares that caller's reply. There is no timeout: if the reply
    /// never comes (or the channel dies) this never returns. Use
    /// [`read_once_timeout`](Self::read_once_timeout) for a bounded wait.
    pub fn read_once(&self, key: &UniqueKey, command: &str) -> Result<String> {
        let reply = self.register_once(key, command)?;
        Ok(reply.wait(None).unwrap_or_default())
    }

    /// Like [`read_once`](Self::read_once) but gives up after `timeout`.
    ///
    /// A timed-out call leaves the wait registered, so a late reply is still
    /// consumed by it (or by whoever joins it next) rather than leaking to a
    /// listener or the unbound queue.
    pub fn read_once_timeout(
        &self,
        key: &UniqueKey,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let reply = self.register_once(key, command)?;
        Ok(reply.wait(Some(timeout)))
    }

    fn register_once(&self, key: &UniqueKey, command: &str) -> Result<Arc<PendingReply>> {
        let mut pending = lock(&self.shared.pending);
        if let Some(reply) = pending.get(key) {
            log::debug!("query channel: joining outstanding request for {}", key);
            return Ok(reply.clone());
        }
        let reply = Arc::new(PendingReply::default());
        pending.insert(key.clone(), reply.clone());
        // Sent under the lock so a joiner never shares a request that was not sent.
        if let Err(e) = self.writer.send(command) {
            pending.remove(key);
            return Err(e);
        }
        Ok(reply)
    }

    /// Sends `command` and returns the next unbound line, waiting for one if
    /// necessary. Unbound lines are shared by all callers in arrival order.
    pub fn read_unbound(&self, command: &str) -> Result<String> {
        self.writer.send(command)?;
        Ok(self.shared.pop_unbound(None).unwrap_or_default())
    }

    /// Like [`read_unbound`](Self::read_unbound) but gives up after `timeout`.
    pub fn read_unbound_timeout(&self, command: &str, timeout: Duration) -> Result<Option<String>> {
        self.writer.send(command)?;
        Ok(self.shared.pop_unbound(Some(timeout)))
    }

    /// Routes every future value for `key` to `listener`, replacing any
    /// listener already registered for it.
    pub fn set_listener(&self, key: UniqueKey, listener: SharedListener<str>) {
        log::debug!("query channel: listener set for {}", key);
        lock(&self.shared.listeners).insert(key, listener);
    }

    /// Removes the listener for `key`. Once this returns no further values
    /// reach it.
    pub fn remove_listener(&self, key: &UniqueKey) {
        if lock(&self.shared.listeners).remove(key).is_some() {
            log::debug!("query channel: listener removed for {}", key);
        }
    }

    pub fn has_listener(&self, key: &UniqueKey) -> bool {
        lock(&self.shared.listeners).contains_key(key)
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Closes the socket and joins the reader.
    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.stop(timeout)
    }
}

fn run_reader(socket: TcpStream, chunk_size: usize, stopping: &AtomicBool, state: &QueryState) {
    let mut framer = LineFramer::new();
    let exit = read_until_closed(ChannelKind::Query, socket, chunk_size, stopping, |chunk| {
        for line in framer.push(chunk) {
            state.on_line(line);
        }
    });
    let dropped = framer.discard();
    if dropped > 0 {
        log::debug!("query channel: dropped {} unterminated bytes", dropped);
    }
    if exit == ReaderExit::Closed {
        state.notify_listeners_closed();
    }
}
