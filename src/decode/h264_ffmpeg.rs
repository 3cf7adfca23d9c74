//! H264 elementary-stream decoder using FFmpeg.
//!
//! Chunks from the socket go through `av_parser_parse2` to recover packet
//! boundaries, each packet goes to the libavcodec H264 decoder, and every
//! decoded picture is converted to packed BGR24.

use ffmpeg_next as ffmpeg;
use ffmpeg::ffi;
use std::os::raw::c_int;
use std::ptr;

use super::VideoDecoder;
use crate::error::{Error, Result};
use crate::frame::{Frame, CHANNELS};

pub struct H264Decoder {
    parser: *mut ffi::AVCodecParserContext,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<Scaler>,
    decoded: ffmpeg::frame::Video,
    bgr: ffmpeg::frame::Video,
    packets: u64,
    dropped: u64,
}

struct Scaler {
    context: ffmpeg::software::scaling::Context,
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
}

// The parser context is owned exclusively by this value and only touched
// through `&mut self`.
unsafe impl Send for H264Decoder {}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(|e| Error::Decoder(format!("initialize ffmpeg: {e}")))?;
        let codec = ffmpeg::codec::decoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| Error::Decoder("ffmpeg build has no H264 decoder".to_string()))?;
        let decoder = ffmpeg::codec::context::Context::new()
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(|e| Error::Decoder(format!("open H264 decoder: {e}")))?;

        let parser = unsafe { ffi::av_parser_init(ffi::AVCodecID::AV_CODEC_ID_H264 as c_int) };
        if parser.is_null() {
            return Err(Error::Decoder("create H264 parser".to_string()));
        }

        Ok(Self {
            parser,
            decoder,
            scaler: None,
            decoded: ffmpeg::frame::Video::empty(),
            bgr: ffmpeg::frame::Video::empty(),
            packets: 0,
            dropped: 0,
        })
    }

    fn decode_packet(&mut self, data: &[u8], sink: &mut dyn FnMut(Frame)) {
        self.packets += 1;
        let packet = ffmpeg::Packet::copy(data);
        if let Err(e) = self.decoder.send_packet(&packet) {
            // Typically a slice arriving before the first SPS/PPS.
            log::debug!("h264: packet {} rejected: {}", self.packets, e);
            return;
        }
        self.drain_frames(sink);
    }

    // A picture that fails conversion is dropped; later pictures still flow.
    fn drain_frames(&mut self, sink: &mut dyn FnMut(Frame)) {
        while self.decoder.receive_frame(&mut self.decoded).is_ok() {
            match self.convert() {
                Ok(frame) => sink(frame),
                Err(e) => {
                    self.dropped += 1;
                    log::warn!("h264: dropped picture ({} so far): {}", self.dropped, e);
                }
            }
        }
    }

    /// Pictures decoded but not delivered because conversion failed.
    pub fn dropped_pictures(&self) -> u64 {
        self.dropped
    }

    /// Signals end of stream: emits the access unit the parser is still
    /// holding and every picture the decoder buffered. Feeding more data
    /// afterwards starts a new stream.
    pub fn flush(&mut self, sink: &mut dyn FnMut(Frame)) -> Result<()> {
        let mut out: *mut u8 = ptr::null_mut();
        let mut out_size: c_int = 0;
        unsafe {
            ffi::av_parser_parse2(
                self.parser,
                self.decoder.as_mut_ptr(),
                &mut out,
                &mut out_size,
                ptr::null(),
                0,
                ffi::AV_NOPTS_VALUE,
                ffi::AV_NOPTS_VALUE,
                0,
            )
        };
        if out_size > 0 && !out.is_null() {
            let packet = unsafe { std::slice::from_raw_parts(out, out_size as usize) };
            self.decode_packet(packet, sink);
        }
        self.decoder
            .send_eof()
            .map_err(|e| Error::Decoder(format!("flush H264 decoder: {e}")))?;
        self.drain_frames(sink);
        self.decoder.flush();
        Ok(())
    }

    fn convert(&mut self) -> Result<Frame> {
        let format = self.decoded.format();
        let width = self.decoded.width();
        let height = self.decoded.height();
        let stale = match &self.scaler {
            Some(s) => s.format != format || s.width != width || s.height != height,
            None => true,
        };
        if stale {
            let context = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::BGR24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| Error::Decoder(format!("create BGR scaler: {e}")))?;
            log::info!("h264: stream is {}x{} ({:?})", width, height, format);
            self.scaler = Some(Scaler {
                context,
                format,
                width,
                height,
            });
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| Error::Decoder("scaler missing".to_string()))?;
        scaler
            .context
            .run(&self.decoded, &mut self.bgr)
            .map_err(|e| Error::Decoder(format!("scale frame to BGR: {e}")))?;
        packed_frame(&self.bgr)
    }
}

impl VideoDecoder for H264Decoder {
    fn decode(&mut self, chunk: &[u8], sink: &mut dyn FnMut(Frame)) -> Result<()> {
        let mut remaining = chunk;
        // An empty buffer would tell the parser the stream ended.
        while !remaining.is_empty() {
            let len = remaining.len().min(c_int::MAX as usize) as c_int;
            let mut out: *mut u8 = ptr::null_mut();
            let mut out_size: c_int = 0;
            let consumed = unsafe {
                ffi::av_parser_parse2(
                    self.parser,
                    self.decoder.as_mut_ptr(),
                    &mut out,
                    &mut out_size,
                    remaining.as_ptr(),
                    len,
                    ffi::AV_NOPTS_VALUE,
                    ffi::AV_NOPTS_VALUE,
                    0,
                )
            };
            if consumed < 0 {
                return Err(Error::Decoder(format!("h264 parser failed ({consumed})")));
            }
            remaining = &remaining[consumed as usize..];

            if out_size > 0 && !out.is_null() {
                // `out` points into the parser's buffer, valid until the next parse call.
                let packet = unsafe { std::slice::from_raw_parts(out, out_size as usize) };
                self.decode_packet(packet, sink);
            } else if consumed == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl Drop for H264Decoder {
    fn drop(&mut self) {
        unsafe { ffi::av_parser_close(self.parser) };
    }
}

fn packed_frame(frame: &ffmpeg::frame::Video) -> Result<Frame> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * CHANNELS;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .ok_or_else(|| Error::Decoder("frame buffer is short".to_string()))?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .ok_or_else(|| Error::Decoder("frame row is out of bounds".to_string()))?,
            );
        }
        pixels
    };

    Frame::from_bgr(width, height, pixels)
        .ok_or_else(|| Error::Decoder("decoded frame has unexpected size".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::Pixel;

    /// Annex-B H264 of flat grey pictures, one per entry in `lumas`. `None`
    /// when this FFmpeg build has no usable H264 encoder.
    fn encode_flat(width: u32, height: u32, lumas: &[u8]) -> Option<Vec<u8>> {
        ffmpeg::init().ok()?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)?;
        let mut video = ffmpeg::codec::context::Context::new()
            .encoder()
            .video()
            .ok()?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base((1, 25));
        video.set_frame_rate(Some((25, 1)));
        video.set_bit_rate(400_000);
        video.set_gop(10);
        video.set_max_b_frames(0);
        let mut encoder = video.open_as(codec).ok()?;

        let mut stream = Vec::new();
        for (i, &luma) in lumas.iter().enumerate() {
            let mut picture = ffmpeg::frame::Video::new(Pixel::YUV420P, width, height);
            picture.data_mut(0).fill(luma);
            picture.data_mut(1).fill(128);
            picture.data_mut(2).fill(128);
            picture.set_pts(Some(i as i64));
            encoder.send_frame(&picture).ok()?;
            drain_packets(&mut encoder, &mut stream);
        }
        encoder.send_eof().ok()?;
        drain_packets(&mut encoder, &mut stream);
        Some(stream)
    }

    fn drain_packets(encoder: &mut ffmpeg::encoder::video::Encoder, out: &mut Vec<u8>) {
        let mut packet = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            if let Some(data) = packet.data() {
                out.extend_from_slice(data);
            }
        }
    }

    fn centre(frame: &Frame) -> [u8; 3] {
        frame
            .pixel(frame.width() / 2, frame.height() / 2)
            .expect("centre pixel")
    }

    #[test]
    fn small_chunks_decode_every_picture_in_order() {
        let Some(stream) = encode_flat(64, 48, &[40, 120, 200]) else {
            eprintln!("no H264 encoder in this FFmpeg build, skipping");
            return;
        };
        let mut decoder = H264Decoder::new().expect("decoder");
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            decoder
                .decode(chunk, &mut |frame| frames.push(frame))
                .expect("decode chunk");
        }
        decoder
            .flush(&mut |frame| frames.push(frame))
            .expect("flush");

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| (f.width(), f.height()) == (64, 48)));
        assert!(centre(&frames[0]).iter().all(|&c| c < 60));
        let latest = frames.last().expect("latest frame");
        assert!(centre(latest).iter().all(|&c| c > 180));
        assert_eq!(decoder.dropped_pictures(), 0);
    }

    #[test]
    fn resolution_change_inside_one_chunk_keeps_decoding() {
        let (Some(large), Some(small)) = (
            encode_flat(64, 48, &[60, 60]),
            encode_flat(32, 24, &[180, 180, 180]),
        ) else {
            eprintln!("no H264 encoder in this FFmpeg build, skipping");
            return;
        };
        let mut stream = large;
        stream.extend_from_slice(&small);

        let mut decoder = H264Decoder::new().expect("decoder");
        let mut sizes = Vec::new();
        decoder
            .decode(&stream, &mut |frame| sizes.push((frame.width(), frame.height())))
            .expect("decode");
        decoder
            .flush(&mut |frame| sizes.push((frame.width(), frame.height())))
            .expect("flush");

        assert_eq!(sizes, [(64, 48), (64, 48), (32, 24), (32, 24), (32, 24)]);
        assert_eq!(decoder.dropped_pictures(), 0);
    }
}
