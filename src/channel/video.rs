//! Video channel: raw H264 in, latest decoded frame out.
//!
//! Only the freshest frame matters to callers, so there is no queue: every
//! decoded frame replaces the cached one and is handed to the frame listener,
//! if any. Reading the cache is a lock-free snapshot.

use arc_swap::ArcSwapOption;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{lock, read_until_closed, Reader, ReaderExit};
use crate::decode::VideoDecoder;
use crate::error::{ChannelKind, Result};
use crate::frame::Frame;
use crate::listener::SharedListener;

pub struct VideoChannel {
    shared: Arc<VideoState>,
    reader: Reader,
}

#[derive(Default)]
struct VideoState {
    latest: ArcSwapOption<Frame>,
    listener: Mutex<Option<SharedListener<Frame>>>,
    frames: AtomicU64,
}

impl VideoState {
    fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        self.latest.store(Some(frame.clone()));
        self.frames.fetch_add(1, Ordering::Relaxed);

        // Snapshot so (un)registering never waits on a slow listener.
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_value(&frame);
        }
    }
}

impl VideoChannel {
    /// Takes over a connected video socket and starts decoding it.
    pub fn start(
        stream: TcpStream,
        decoder: Box<dyn VideoDecoder>,
        chunk_size: usize,
    ) -> Result<Self> {
        let shared = Arc::new(VideoState::default());
        let state = shared.clone();
        let reader = Reader::spawn(ChannelKind::Video, &stream, move |socket, stopping| {
            run_reader(socket, decoder, chunk_size, &stopping, &state)
        })?;
        log::info!("video channel started");
        Ok(Self { shared, reader })
    }

    /// Most recently decoded frame, or `None` before the first frame and after
    /// the stream ended.
    pub fn read(&self) -> Option<Arc<Frame>> {
        self.shared.latest.load_full()
    }

    /// Pushes every future frame to `listener`, replacing the previous one.
    pub fn register_listener(&self, listener: SharedListener<Frame>) {
        *lock(&self.shared.listener) = Some(listener);
    }

    pub fn unregister_listener(&self) {
        *lock(&self.shared.listener) = None;
    }

    /// Frames decoded since the channel started.
    pub fn frames_decoded(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Closes the socket and joins the decoder thread.
    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.stop(timeout)
    }
}

fn run_reader(
    socket: TcpStream,
    mut decoder: Box<dyn VideoDecoder>,
    chunk_size: usize,
    stopping: &AtomicBool,
    state: &VideoState,
) {
    let mut decode_errors = 0u64;
    let exit = read_until_closed(ChannelKind::Video, socket, chunk_size, stopping, |chunk| {
        if let Err(e) = decoder.decode(chunk, &mut |frame| state.publish(frame)) {
            decode_errors += 1;
            log::warn!("video channel: decode failed ({} so far): {}", decode_errors, e);
        }
    });

    state.latest.store(None);
    log::info!(
        "video channel: stream ended after {} frames",
        state.frames.load(Ordering::Relaxed)
    );
    if exit == ReaderExit::Closed {
        let listener = lock(&state.listener).clone();
        if let Some(listener) = listener {
            listener.on_error();
        }
    }
}
