//! Client facade over the three gateway channels.
//!
//! `Client` connects video, control and query together and tears them down
//! together. Control methods take `get_result`: when true they wait for the
//! gateway's acknowledgment and return it, when false they mark that
//! acknowledgment for disposal and return `None` straight away. See
//! [`ControlChannel`] for why control requests must not overlap.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channel::{ControlChannel, QueryChannel, VideoChannel};
use crate::config::ClientConfig;
use crate::decode::{default_decoder, VideoDecoder};
use crate::error::{ChannelKind, Error, Result};
use crate::frame::Frame;
use crate::listener::SharedListener;
use crate::protocol::{ControlCommand, QueryCommand, UniqueKey};

pub struct Client {
    host: String,
    video: VideoChannel,
    control: ControlChannel,
    query: QueryChannel,
    closed: AtomicBool,
}

impl Client {
    /// Connects all three channels using the H264 decoder compiled into the
    /// crate.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let decoder = default_decoder()?;
        Self::connect_with_decoder(config, decoder)
    }

    /// Connects all three channels, decoding video with `decoder`.
    ///
    /// Either every channel connects or none stays open: a failure on any of
    /// them closes the ones already connected.
    pub fn connect_with_decoder(
        config: &ClientConfig,
        decoder: Box<dyn VideoDecoder>,
    ) -> Result<Self> {
        let video_stream = open_channel(config, ChannelKind::Video, config.video_port)?;
        let control_stream = open_channel(config, ChannelKind::Control, config.control_port)
            .inspect_err(|_| log::warn!("closing video connection after failed setup"))?;
        let query_stream = open_channel(config, ChannelKind::Query, config.query_port)
            .inspect_err(|_| log::warn!("closing video/control connections after failed setup"))?;

        let chunk = config.read_chunk_size;
        let video = VideoChannel::start(video_stream, decoder, chunk)?;
        let control = ControlChannel::start(control_stream, chunk)?;
        let query = QueryChannel::start(query_stream, chunk)?;

        log::info!("connected to gateway at {}", config.host);
        Ok(Self {
            host: config.host.clone(),
            video,
            control,
            query,
            closed: AtomicBool::new(false),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn video(&self) -> &VideoChannel {
        &self.video
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn query(&self) -> &QueryChannel {
        &self.query
    }

    /// Stops all three channels. Safe to call more than once; also runs on drop.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let results = [
            self.video.stop(None),
            self.control.stop(None),
            self.query.stop(None),
        ];
        log::info!("disconnected from gateway at {}", self.host);
        results.into_iter().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Video
    // ------------------------------------------------------------------

    /// Latest decoded frame, if any.
    pub fn get_frame(&self) -> Option<Arc<Frame>> {
        self.video.read()
    }

    /// Calls `listener` with every new frame, on the video thread.
    pub fn frame_listener(&self, listener: SharedListener<Frame>) {
        self.video.register_listener(listener);
    }

    pub fn remove_frame_listener(&self) {
        self.video.unregister_listener();
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Sets the virtual sticks. Each axis is clamped to `[-1.0, 1.0]`:
    /// - `yaw`: clockwise (1.0) or counter-clockwise (-1.0)
    /// - `ascent`: up (1.0) or down (-1.0)
    /// - `roll`: right (1.0) or left (-1.0)
    /// - `pitch`: forward (1.0) or backward (-1.0)
    pub fn move_sticks(
        &self,
        yaw: f64,
        ascent: f64,
        roll: f64,
        pitch: f64,
        get_result: bool,
    ) -> Result<Option<String>> {
        self.control_request(ControlCommand::sticks(yaw, ascent, roll, pitch), get_result)
    }

    /// Takes control away from the remote controller. Required before any
    /// stick command has an effect.
    pub fn enable_control(&self, get_result: bool) -> Result<Option<String>> {
        self.control_request(ControlCommand::Enable, get_result)
    }

    /// Hands control back to the remote controller.
    pub fn disable_control(&self, get_result: bool) -> Result<Option<String>> {
        self.control_request(ControlCommand::Disable, get_result)
    }

    pub fn takeoff(&self, get_result: bool) -> Result<Option<String>> {
        self.control_request(ControlCommand::Takeoff, get_result)
    }

    pub fn land(&self, get_result: bool) -> Result<Option<String>> {
        self.control_request(ControlCommand::Land, get_result)
    }

    fn control_request(&self, command: ControlCommand, get_result: bool) -> Result<Option<String>> {
        self.control.send_command(&command.to_string())?;
        if get_result {
            Ok(self.control.read(true, None))
        } else {
            self.control.dispose_next();
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Key/value queries
    // ------------------------------------------------------------------

    /// Reads `module`/`key`. Blocks until the gateway answers.
    pub fn get_value(&self, module: &str, key: &str) -> Result<String> {
        let key = UniqueKey::new(module, key);
        self.query.read_once(&key, &QueryCommand::Get(&key).to_string())
    }

    /// Writes `value` (in the gateway's own JSON-like syntax) to `module`/`key`.
    pub fn set_value(&self, module: &str, key: &str, value: &str) -> Result<String> {
        let key = UniqueKey::new(module, key);
        self.query
            .read_once(&key, &QueryCommand::Set(&key, value).to_string())
    }

    /// Triggers the action behind `module`/`key`, optionally with a parameter.
    pub fn action(&self, module: &str, key: &str, value: Option<&str>) -> Result<String> {
        let key = UniqueKey::new(module, key);
        self.query
            .read_once(&key, &QueryCommand::Action(&key, value).to_string())
    }

    /// Installs `listener` for `module`/`key` and asks the gateway to push
    /// changes. Does not wait for the gateway's acknowledgment, which reaches
    /// the listener like any other value.
    pub fn listen(&self, module: &str, key: &str, listener: SharedListener<str>) -> Result<()> {
        let key = UniqueKey::new(module, key);
        let command = QueryCommand::Listen(&key).to_string();
        self.query.set_listener(key, listener);
        self.query.send_command(&command)
    }

    /// Asks the gateway to stop pushing `module`/`key`, waits for its answer,
    /// then removes the local listener.
    pub fn unlisten(&self, module: &str, key: &str) -> Result<String> {
        let key = UniqueKey::new(module, key);
        let result = self
            .query
            .read_once(&key, &QueryCommand::Unlisten(&key).to_string())?;
        self.query.remove_listener(&key);
        Ok(result)
    }

    /// `help`, `help <module>` or `help <module> <key>`. A key without a
    /// module is ignored.
    pub fn help(&self, module: Option<&str>, key: Option<&str>) -> Result<String> {
        self.query.read_unbound(&QueryCommand::Help(module, key).to_string())
    }

    /// Modules the gateway exposes.
    pub fn modules(&self) -> Result<String> {
        self.help(None, None)
    }

    /// Keys available inside `module`.
    pub fn module_keys(&self, module: &str) -> Result<String> {
        self.help(Some(module), None)
    }

    /// Description of a single key: permissions, parameter type, example.
    pub fn key_info(&self, module: &str, key: &str) -> Result<String> {
        self.help(Some(module), Some(key))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("error while closing gateway client: {}", e);
        }
    }
}

fn open_channel(config: &ClientConfig, channel: ChannelKind, port: u16) -> Result<TcpStream> {
    let label = format!("{}:{}", config.host, port);
    let addrs: Vec<SocketAddr> = (config.host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{label}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::InvalidAddress(label));
    }

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => {
                if channel != ChannelKind::Video {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("{} channel: could not set TCP_NODELAY: {}", channel, e);
                    }
                }
                log::debug!("{} channel connected to {}", channel, addr);
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("{} channel: connect to {} failed: {}", channel, addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(Error::Connect {
        channel,
        addr: label,
        source: last_error
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address")),
    })
}
