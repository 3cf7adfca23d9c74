//! Video decoders for the gateway's raw H264 stream.
//!
//! The video socket carries an elementary stream with no application framing:
//! arbitrary byte chunks go in, whole frames come out whenever the codec's own
//! parser finds a complete access unit. A decoder keeps that parsing state
//! between calls.
//!
//! - `H264Decoder` (feature: video-ffmpeg) uses FFmpeg's parser, decoder and
//!   swscale to produce BGR24 frames.
//! - Anything else implementing `VideoDecoder` can be handed to
//!   `Client::connect_with_decoder`.

#[cfg(feature = "video-ffmpeg")]
mod h264_ffmpeg;

#[cfg(feature = "video-ffmpeg")]
pub use h264_ffmpeg::H264Decoder;

use crate::error::Result;
use crate::frame::Frame;

/// Stateful stream decoder driven by the video channel's reader thread.
pub trait VideoDecoder: Send {
    /// Feeds one chunk of the stream and hands every frame it completes to
    /// `sink`, oldest first. A chunk may complete zero or many frames.
    fn decode(&mut self, chunk: &[u8], sink: &mut dyn FnMut(Frame)) -> Result<()>;
}

/// Decoder used by `Client::connect`.
pub fn default_decoder() -> Result<Box<dyn VideoDecoder>> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Ok(Box::new(H264Decoder::new()?))
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        Err(crate::error::Error::Decoder(
            "H264 decoding requires the video-ffmpeg feature".to_string(),
        ))
    }
}

#[cfg(all(test, not(feature = "video-ffmpeg")))]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_decoder_needs_ffmpeg_feature() {
        let err = default_decoder().err().expect("decoder should be unavailable");
        assert!(matches!(err, Error::Decoder(_)));
        assert!(err.to_string().contains("video-ffmpeg"));
    }
}
