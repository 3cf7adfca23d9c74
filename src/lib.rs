//! MSDK Remote client runtime
//!
//! This crate talks to the MSDK Remote app, a phone app that bridges a DJI
//! aircraft's SDK onto the local network. The app listens on three TCP ports:
//!
//! 1. **Video**: a raw H264 elementary stream from the aircraft camera.
//! 2. **Control**: virtual-stick and flight commands (`rc`, `enable`,
//!    `disable`, `takeoff`, `land`), one acknowledgment line per command.
//! 3. **Query**: key/value access to the SDK (`get`, `set`, `action`,
//!    `listen`, `unlisten`, `help`).
//!
//! # Module Structure
//!
//! - `client`: `Client`, connects and owns all three channels
//! - `channel`: per-socket managers, each with its own reader thread
//! - `framing`: `\r\n` line framing for the text channels
//! - `protocol`: command grammar and response key extraction
//! - `decode`: `VideoDecoder` and the FFmpeg-backed H264 decoder
//! - `frame`: decoded BGR24 frames
//! - `listener`: `EventListener`, callbacks for pushed values
//! - `config`: `ClientConfig`, file + env configuration
//!
//! # Example
//!
//! ```no_run
//! use msdk_remote::{modules, Client, ClientConfig};
//!
//! # fn main() -> msdk_remote::Result<()> {
//! let drone = Client::connect(&ClientConfig::new("10.0.0.6"))?;
//! let name = drone.get_value(modules::FLIGHT_CONTROLLER, "AircraftName")?;
//! println!("connected to {name}");
//! drone.enable_control(true)?;
//! drone.takeoff(false)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod frame;
pub mod framing;
pub mod listener;
pub mod protocol;

pub use channel::{ControlChannel, QueryChannel, VideoChannel, READ_CHUNK_SIZE};
pub use client::Client;
pub use config::ClientConfig;
#[cfg(feature = "video-ffmpeg")]
pub use decode::H264Decoder;
pub use decode::{default_decoder, VideoDecoder};
pub use error::{ChannelKind, Error, Result};
pub use frame::Frame;
pub use framing::LineFramer;
pub use listener::{EventListener, SharedListener};
pub use protocol::{classify, modules, Classified, ControlCommand, QueryCommand, UniqueKey};
