//! Per-socket channel managers.
//!
//! Each channel owns one TCP connection and one background reader thread:
//! - `VideoChannel`: H264 stream, latest-frame cache
//! - `ControlChannel`: movement commands and their acknowledgments
//! - `QueryChannel`: key/value get, set, action, listen and help
//!
//! Readers block on `read()`; stopping a channel shuts the socket down, which
//! wakes the reader with EOF or an error and lets it exit.

pub mod control;
pub mod query;
pub mod video;

pub use control::ControlChannel;
pub use query::QueryChannel;
pub use video::VideoChannel;

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{ChannelKind, Error, Result};
use crate::framing::encode_line;

/// Default size of a single socket read.
pub const READ_CHUNK_SIZE: usize = 1 << 20;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Locks a mutex, carrying on with the inner value if a listener panicked
/// while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a reader loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReaderExit {
    /// `stop()` was called.
    Stopped,
    /// Peer closed the connection or the socket failed.
    Closed,
}

/// Background reader thread plus the socket handle used to interrupt it.
pub(crate) struct Reader {
    kind: ChannelKind,
    socket: TcpStream,
    stopping: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Reader {
    /// Spawns `body` on a named thread. The body is given its own clone of the
    /// socket and decides what to do with each chunk.
    pub(crate) fn spawn<F>(kind: ChannelKind, stream: &TcpStream, body: F) -> Result<Self>
    where
        F: FnOnce(TcpStream, Arc<AtomicBool>) + Send + 'static,
    {
        let socket = stream.try_clone()?;
        let thread_socket = stream.try_clone()?;
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_stopping = stopping.clone();
        let join = std::thread::Builder::new()
            .name(format!("msdk-{kind}-reader"))
            .spawn(move || body(thread_socket, thread_stopping))?;
        Ok(Self {
            kind,
            socket,
            stopping,
            join: Mutex::new(Some(join)),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        lock(&self.join)
            .as_ref()
            .map(|join| !join.is_finished())
            .unwrap_or(false)
    }

    /// Shuts the socket down and joins the thread, waiting at most `timeout`
    /// if one is given. On timeout the thread keeps running, `is_running()`
    /// still reports it, and a later `stop()` can join it. Calling it again
    /// after it returned `Ok` is a no-op.
    pub(crate) fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                log::debug!("{} channel: shutdown failed: {}", self.kind, e);
            }
        }

        if let Some(timeout) = timeout {
            let deadline = Instant::now() + timeout;
            loop {
                match lock(&self.join).as_ref() {
                    None => return Ok(()),
                    Some(join) if join.is_finished() => break,
                    Some(_) => {}
                }
                if Instant::now() >= deadline {
                    log::warn!(
                        "{} channel: reader still running after {:?}",
                        self.kind,
                        timeout
                    );
                    return Err(Error::JoinTimeout(self.kind));
                }
                std::thread::sleep(JOIN_POLL_INTERVAL);
            }
        }

        let Some(join) = lock(&self.join).take() else {
            return Ok(());
        };
        join.join().map_err(|_| Error::ThreadPanic(self.kind))?;
        log::info!("{} channel stopped", self.kind);
        Ok(())
    }
}

// A channel dropped without `stop()` (e.g. a half-built client) must not leave
// its reader blocked on a live socket. The thread is detached, not joined.
impl Drop for Reader {
    fn drop(&mut self) {
        if lock(&self.join).is_some() {
            self.stopping.store(true, Ordering::SeqCst);
            let _ = self.socket.shutdown(Shutdown::Both);
        }
    }
}

/// Reads `stream` until EOF, error or stop, passing every chunk to `on_chunk`.
pub(crate) fn read_until_closed(
    kind: ChannelKind,
    mut stream: TcpStream,
    chunk_size: usize,
    stopping: &AtomicBool,
    mut on_chunk: impl FnMut(&[u8]),
) -> ReaderExit {
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("{} channel: connection closed by peer", kind);
                break;
            }
            Ok(n) => {
                log::trace!("{} channel: read {} bytes", kind, n);
                on_chunk(&buf[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                if !stopping.load(Ordering::SeqCst) {
                    log::warn!("{} channel: read failed: {}", kind, e);
                }
                break;
            }
        }
    }
    if stopping.load(Ordering::SeqCst) {
        ReaderExit::Stopped
    } else {
        ReaderExit::Closed
    }
}

/// Serialised writer for the text channels.
pub(crate) struct LineWriter {
    kind: ChannelKind,
    stream: Mutex<TcpStream>,
}

impl LineWriter {
    pub(crate) fn new(kind: ChannelKind, stream: &TcpStream) -> Result<Self> {
        Ok(Self {
            kind,
            stream: Mutex::new(stream.try_clone()?),
        })
    }

    /// Writes `command` followed by the line terminator.
    pub(crate) fn send(&self, command: &str) -> Result<()> {
        let line = encode_line(command);
        let mut stream = lock(&self.stream);
        stream.write_all(&line)?;
        log::debug!("{} channel: sent {:?}", self.kind, command);
        Ok(())
    }
}
