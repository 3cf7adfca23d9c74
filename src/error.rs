//! Error types for the gateway client.

use std::fmt;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The three connections a [`Client`](crate::Client) holds to the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Video,
    Control,
    Query,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Video => "video",
            ChannelKind::Control => "control",
            ChannelKind::Query => "query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One of the initial connections failed. Nothing stays open.
    #[error("failed to connect {channel} channel to {addr}: {source}")]
    Connect {
        channel: ChannelKind,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Host/port pair did not resolve to a socket address.
    #[error("invalid gateway address: {0}")]
    InvalidAddress(String),

    /// Writing a command to a channel failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The background reader panicked.
    #[error("{0} reader thread panicked")]
    ThreadPanic(ChannelKind),

    /// A bounded stop expired before the reader finished.
    #[error("{0} reader thread did not stop in time")]
    JoinTimeout(ChannelKind),

    /// The video decoder could not be created.
    #[error("video decoder unavailable: {0}")]
    Decoder(String),
}
